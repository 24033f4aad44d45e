//! Learning log - bounded history of fix-iteration outcomes.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::LearningRecord;
use crate::infrastructure::storage::{BoundedLog, StateStore};

const SNAPSHOT: &str = "learning";

/// Persisted, capacity-bounded log of learning records.
pub struct LearningLog {
    store: Arc<StateStore>,
    log: Mutex<BoundedLog<LearningRecord>>,
}

impl LearningLog {
    /// Create the log, restoring persisted records. A capacity change takes
    /// effect on the next append.
    pub async fn load(store: Arc<StateStore>, capacity: usize) -> DomainResult<Self> {
        let log = match store.load::<BoundedLog<LearningRecord>>(SNAPSHOT).await? {
            Some(mut existing) => {
                existing.set_capacity(capacity);
                existing
            }
            None => BoundedLog::new(capacity),
        };
        Ok(Self {
            store,
            log: Mutex::new(log),
        })
    }

    /// Append a record, evicting the oldest when at capacity.
    pub async fn record(&self, record: LearningRecord) -> DomainResult<()> {
        let mut log = self.log.lock().await;
        debug!(
            task_id = %record.task_id,
            iteration = record.iteration,
            succeeded = record.succeeded,
            "Learning record captured"
        );
        log.push(record);
        self.store.save(SNAPSHOT, &*log).await
    }

    /// All retained records, oldest first.
    pub async fn records(&self) -> Vec<LearningRecord> {
        self.log.lock().await.entries().to_vec()
    }

    /// Records for a single task, oldest first.
    pub async fn records_for(&self, task_id: Uuid) -> Vec<LearningRecord> {
        self.log
            .lock()
            .await
            .entries()
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_every_iteration_including_failures() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()));
        let log = LearningLog::load(store, 200).await.unwrap();
        let task_id = Uuid::new_v4();

        log.record(LearningRecord::new(task_id, "compile: E0308", "aaa", 1, false))
            .await
            .unwrap();
        log.record(LearningRecord::new(task_id, "compile: E0308", "bbb", 2, true))
            .await
            .unwrap();

        let records = log.records_for(task_id).await;
        assert_eq!(records.len(), 2);
        assert!(!records[0].succeeded);
        assert!(records[1].succeeded);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()));
        let log = LearningLog::load(store, 2).await.unwrap();
        let task_id = Uuid::new_v4();

        for i in 1..=3 {
            log.record(LearningRecord::new(task_id, "sig", "fp", i, false))
                .await
                .unwrap();
        }

        let records = log.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].iteration, 2);
        assert_eq!(records[1].iteration, 3);
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()));
        let task_id = Uuid::new_v4();

        let log = LearningLog::load(Arc::clone(&store), 10).await.unwrap();
        log.record(LearningRecord::new(task_id, "lint: unused", "fp1", 1, true))
            .await
            .unwrap();
        drop(log);

        let log2 = LearningLog::load(store, 10).await.unwrap();
        assert_eq!(log2.records().await.len(), 1);
    }
}
