//! Verification runner.
//!
//! Runs the configured verification command inside a task workspace and
//! parses the combined output into structured failures. Parsing is best
//! effort: anything unmatched stays in the raw tail so a fix prompt can
//! still be built when no failure is individually parseable.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{FailureCategory, VerifyConfig, VerifyFailure, VerifyResult};
use crate::domain::ports::Workspace;

/// Runs verification commands and parses their output.
pub struct Verifier {
    workspace: Arc<dyn Workspace>,
    config: VerifyConfig,
    parsers: Vec<FailureParser>,
}

struct FailureParser {
    category: FailureCategory,
    pattern: Regex,
}

impl Verifier {
    pub fn new(workspace: Arc<dyn Workspace>, config: VerifyConfig) -> Self {
        // Patterns cover the common compiler/linter/test-runner shapes:
        //   src/foo.rs:10:5: error[E0308]: mismatched types
        //   src/foo.ts(12,3): error TS2339: ...
        //   src/foo.js:3:1  error  no-unused-vars
        //   FAIL src/foo.test.ts / test foo ... FAILED
        let parsers = vec![
            FailureParser {
                category: FailureCategory::Compile,
                pattern: Regex::new(
                    r"(?m)^(?P<file>[^\s:(]+)[:(](?:\d+[:,.]?\d*)\)?:?\s*error(?:\[\w+\]| TS\d+)?:?\s*(?P<msg>.+)$",
                )
                .expect("compile pattern is valid"),
            },
            FailureParser {
                category: FailureCategory::Lint,
                pattern: Regex::new(
                    r"(?m)^(?P<file>[^\s:(]+):\d+:\d+\s+(?:error|warning)\s+(?P<msg>.+)$",
                )
                .expect("lint pattern is valid"),
            },
            FailureParser {
                category: FailureCategory::Test,
                pattern: Regex::new(r"(?m)^(?:FAIL\s+(?P<file>\S+)|test (?P<msg>.+?) \.\.\. FAILED)")
                    .expect("test pattern is valid"),
            },
        ];
        Self {
            workspace,
            config,
            parsers,
        }
    }

    /// Run the verification command for the task and parse its output.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn verify(&self, task_id: Uuid) -> DomainResult<VerifyResult> {
        let output = self.workspace.run(task_id, &self.config.command).await?;
        let combined = format!("{}\n{}", output.stdout, output.stderr);

        if output.exit_code == 0 && !output.killed {
            debug!(task_id = %task_id, "Verification passed");
            return Ok(VerifyResult::passing());
        }

        let exit_code = if output.killed { -1 } else { output.exit_code };
        let failures = self.parse_failures(&combined);
        let raw_tail = tail(&combined, self.config.raw_tail_bytes);
        debug!(
            task_id = %task_id,
            exit_code,
            parsed = failures.len(),
            "Verification failed"
        );

        Ok(VerifyResult {
            exit_code,
            failures,
            raw_tail,
        })
    }

    fn parse_failures(&self, output: &str) -> Vec<VerifyFailure> {
        let mut failures = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for parser in &self.parsers {
            for caps in parser.pattern.captures_iter(output) {
                let file = caps.name("file").map(|m| m.as_str().to_string());
                let message = caps
                    .name("msg")
                    .map_or_else(|| "test failure".to_string(), |m| m.as_str().to_string());
                let key = (parser.category, file.clone(), message.clone());
                if !seen.insert(key) {
                    continue;
                }
                let mut failure = VerifyFailure::new(parser.category, message);
                if let Some(f) = file {
                    failure = failure.in_file(f);
                }
                failures.push(failure);
            }
        }
        failures
    }
}

/// Last `max_bytes` of a string, aligned to a character boundary.
fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct FixedOutputWorkspace {
        output: CommandOutput,
    }

    #[async_trait]
    impl Workspace for FixedOutputWorkspace {
        async fn provision(&self, _: Uuid, _: &str) -> DomainResult<PathBuf> {
            Ok(PathBuf::from("/tmp/ws"))
        }
        async fn run(&self, _: Uuid, _: &[String]) -> DomainResult<CommandOutput> {
            Ok(self.output.clone())
        }
        async fn changed_files(&self, _: Uuid) -> DomainResult<Vec<String>> {
            Ok(vec![])
        }
        async fn diff(&self, _: Uuid) -> DomainResult<String> {
            Ok(String::new())
        }
        async fn diff_fingerprint(&self, _: Uuid) -> DomainResult<String> {
            Ok(String::new())
        }
        async fn commit_all(&self, _: Uuid, _: &str) -> DomainResult<String> {
            Ok("abc".into())
        }
        async fn push(&self, _: Uuid) -> DomainResult<()> {
            Ok(())
        }
        async fn open_pull_request(&self, _: Uuid, _: &str, _: &str) -> DomainResult<String> {
            Ok("https://example.test/pr/1".into())
        }
    }

    fn verifier_with(exit_code: i32, stdout: &str, stderr: &str) -> Verifier {
        let workspace = Arc::new(FixedOutputWorkspace {
            output: CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                killed: false,
            },
        });
        Verifier::new(workspace, VerifyConfig::default())
    }

    #[tokio::test]
    async fn test_exit_zero_is_success_with_no_failures() {
        let v = verifier_with(0, "all good", "");
        let result = v.verify(Uuid::new_v4()).await.unwrap();
        assert!(result.success());
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_parses_compiler_errors() {
        let stderr = "src/lib.rs:10:5: error[E0308]: mismatched types\n";
        let v = verifier_with(1, "", stderr);
        let result = v.verify(Uuid::new_v4()).await.unwrap();
        assert!(!result.success());
        assert!(result
            .failures
            .iter()
            .any(|f| f.category == FailureCategory::Compile
                && f.file.as_deref() == Some("src/lib.rs")));
    }

    #[tokio::test]
    async fn test_parses_test_failures() {
        let stdout = "test registry::creates_task ... FAILED\nFAIL src/loop.test.ts\n";
        let v = verifier_with(1, stdout, "");
        let result = v.verify(Uuid::new_v4()).await.unwrap();
        let tests: Vec<_> = result
            .failures
            .iter()
            .filter(|f| f.category == FailureCategory::Test)
            .collect();
        assert_eq!(tests.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_output_keeps_raw_tail() {
        let v = verifier_with(2, "##### mysterious harness explosion #####", "");
        let result = v.verify(Uuid::new_v4()).await.unwrap();
        assert!(!result.success());
        assert!(result.failures.is_empty());
        assert!(result.raw_tail.contains("mysterious harness explosion"));
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = tail(s, 4);
        assert!(t.len() <= 5);
        assert!(s.ends_with(&t));
    }
}
