//! Conversion of raw execution outcomes into the canonical result models.
//!
//! The local sandbox and the remote service describe the same things with
//! different shapes. Everything downstream only ever sees [`ExecutionResult`]
//! and [`GradingResult`], built here from tagged raw variants.

use std::{collections::HashSet, time::Duration};

use crate::{
    client::model::SubmitAttemptResponse,
    err::ExecErr,
    sandbox::{model::OutputCapture, ExecutionResult, FailureKind},
    tester::model::{GradingResult, TestCase},
};

/// What the sandbox observed while running code once.
#[derive(Debug)]
pub struct LocalRawResult {
    pub capture: OutputCapture,
    /// Either `Ok`, [`ExecErr::ExecutionTimeout`] or [`ExecErr::InterpreterError`]
    pub outcome: Result<(), ExecErr>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RawExecution {
    Local(LocalRawResult),
    Remote(SubmitAttemptResponse, Duration),
}

/// Verdict of one test case evaluated locally.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseVerdict {
    pub id: String,
    pub passed: bool,
}

/// What the harness gathered while grading on the local path.
#[derive(Debug, Clone, Default)]
pub struct LocalGrading {
    /// One verdict per evaluated case, in evaluation order
    pub verdicts: Vec<CaseVerdict>,
    /// Result of the last executed case
    pub last: Option<ExecutionResult>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RawGrading {
    Local(LocalGrading),
    Remote(SubmitAttemptResponse, Duration),
}

/// `round(100 * earned / total)`, or 0 when there is nothing to earn.
pub fn score(earned: f64, total: f64) -> u8 {
    if total <= 0.0 || !total.is_finite() {
        return 0;
    }
    clamp_score(100.0 * earned / total)
}

fn clamp_score(x: f64) -> u8 {
    if x.is_nan() {
        return 0;
    }
    x.round().clamp(0.0, 100.0) as u8
}

pub fn normalize_execution(raw: RawExecution) -> ExecutionResult {
    match raw {
        RawExecution::Local(LocalRawResult {
            capture,
            outcome,
            elapsed,
        }) => {
            let truncated = capture.stdout.is_truncated() || capture.stderr.is_truncated();
            if truncated {
                tracing::debug!("Captured output was truncated");
            }
            let stdout = capture.stdout.into_string();
            let res = match outcome {
                Ok(()) => ExecutionResult::succeeded(stdout, capture.stderr.into_string(), elapsed),
                Err(ExecErr::ExecutionTimeout) => ExecutionResult::failed(
                    stdout,
                    ExecErr::ExecutionTimeout.to_string(),
                    FailureKind::ExecutionTimeout,
                    elapsed,
                ),
                Err(ExecErr::InterpreterError(msg)) => {
                    ExecutionResult::failed(stdout, msg, FailureKind::InterpreterError, elapsed)
                }
                Err(e) => {
                    tracing::warn!("Unexpected local outcome: {}", e);
                    ExecutionResult::failed(
                        stdout,
                        e.to_string(),
                        FailureKind::InterpreterError,
                        elapsed,
                    )
                }
            };
            res.with_truncated(truncated)
        }
        RawExecution::Remote(raw, elapsed) => {
            let success = raw.failed_tests.is_empty();
            ExecutionResult {
                stdout: raw.stdout,
                stderr: raw.stderr,
                success,
                duration: elapsed,
                failure: (!success).then(|| FailureKind::InterpreterError),
                truncated: false,
            }
        }
    }
}

/// Turn a recoverable error surfaced by the coordinator into a failed result.
pub fn failed_from_err(err: &ExecErr, elapsed: Duration) -> ExecutionResult {
    let kind = match err {
        ExecErr::ExecutionTimeout => FailureKind::ExecutionTimeout,
        _ => FailureKind::InterpreterError,
    };
    ExecutionResult::failed(String::new(), err.to_string(), kind, elapsed)
}

pub fn normalize_grading(raw: RawGrading, cases: &[TestCase]) -> GradingResult {
    match raw {
        RawGrading::Local(local) => normalize_local_grading(local, cases),
        RawGrading::Remote(raw, elapsed) => normalize_remote_grading(raw, elapsed, cases),
    }
}

fn normalize_local_grading(local: LocalGrading, cases: &[TestCase]) -> GradingResult {
    let mut passed_test_ids = vec![];
    let mut failed_test_ids = vec![];
    let mut earned = 0.0;
    let passed: HashSet<&str> = local
        .verdicts
        .iter()
        .filter(|v| v.passed)
        .map(|v| v.id.as_str())
        .collect();

    for case in cases {
        if passed.contains(case.id.as_str()) {
            earned += case.points;
            passed_test_ids.push(case.id.clone());
        } else {
            failed_test_ids.push(case.id.clone());
        }
    }

    let total: f64 = cases.iter().map(|c| c.points).sum();
    let (stdout, stderr) = local
        .last
        .map(|r| (r.stdout, r.stderr))
        .unwrap_or_default();
    GradingResult {
        passed_test_ids,
        failed_test_ids,
        score: score(earned, total),
        stdout,
        stderr,
        duration: local.elapsed,
        hint: None,
    }
}

fn normalize_remote_grading(
    raw: SubmitAttemptResponse,
    elapsed: Duration,
    cases: &[TestCase],
) -> GradingResult {
    let requested: HashSet<&str> = cases.iter().map(|c| c.id.as_str()).collect();
    for id in raw.passed_tests.iter().chain(raw.failed_tests.iter()) {
        if !requested.contains(id.as_str()) {
            tracing::warn!(id = %id, "Remote service reported an unknown test");
        }
    }

    let reported_passed: HashSet<&str> = raw.passed_tests.iter().map(|s| s.as_str()).collect();
    let reported_failed: HashSet<&str> = raw.failed_tests.iter().map(|s| s.as_str()).collect();

    let mut passed_test_ids = vec![];
    let mut failed_test_ids = vec![];
    let mut earned = 0.0;
    for case in cases {
        let id = case.id.as_str();
        if reported_passed.contains(id) && !reported_failed.contains(id) {
            earned += case.points;
            passed_test_ids.push(case.id.clone());
        } else {
            failed_test_ids.push(case.id.clone());
        }
    }

    // The score always follows the reconciled ids, so both paths agree on it
    let total: f64 = cases.iter().map(|c| c.points).sum();
    let score = score(earned, total);
    if score != clamp_score(raw.score) {
        tracing::warn!(
            remote = raw.score,
            local = score,
            "Remote score disagrees with the reported tests"
        );
    }

    GradingResult {
        passed_test_ids,
        failed_test_ids,
        score,
        stdout: raw.stdout,
        stderr: raw.stderr,
        duration: elapsed,
        hint: raw.next_hint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::model::ExecOptions;
    use pretty_assertions::assert_eq;

    fn capture(stdout: &str, stderr: &str) -> OutputCapture {
        let mut capture = OutputCapture::new(&ExecOptions::default());
        capture.stdout.write(stdout);
        capture.stderr.write(stderr);
        capture
    }

    fn response(score: f64, passed: &[&str], failed: &[&str]) -> SubmitAttemptResponse {
        SubmitAttemptResponse {
            score,
            passed_tests: passed.iter().map(|s| s.to_string()).collect(),
            failed_tests: failed.iter().map(|s| s.to_string()).collect(),
            stdout: "out".into(),
            stderr: "".into(),
            next_hint: Some("try again".into()),
        }
    }

    #[test]
    fn test_score_rounding() {
        assert_eq!(score(40.0, 100.0), 40);
        assert_eq!(score(1.0, 3.0), 33);
        assert_eq!(score(2.0, 3.0), 67);
        assert_eq!(score(0.0, 0.0), 0);
        assert_eq!(score(5.0, 5.0), 100);
    }

    #[test]
    fn test_local_timeout_keeps_partial_stdout() {
        let res = normalize_execution(RawExecution::Local(LocalRawResult {
            capture: capture("partial\n", ""),
            outcome: Err(ExecErr::ExecutionTimeout),
            elapsed: Duration::from_millis(2000),
        }));
        assert!(!res.success);
        assert!(res.timed_out());
        assert_eq!(res.stdout, "partial\n");
        assert_eq!(res.stderr, "execution timed out");
    }

    #[test]
    fn test_local_interpreter_error() {
        let res = normalize_execution(RawExecution::Local(LocalRawResult {
            capture: capture("", "ignored"),
            outcome: Err(ExecErr::InterpreterError("NameError: name 'x' is not defined".into())),
            elapsed: Duration::from_millis(3),
        }));
        assert_eq!(res.failure, Some(FailureKind::InterpreterError));
        assert_eq!(res.stderr, "NameError: name 'x' is not defined");
    }

    #[test]
    fn test_local_success() {
        let res = normalize_execution(RawExecution::Local(LocalRawResult {
            capture: capture("hello\n", "warn\n"),
            outcome: Ok(()),
            elapsed: Duration::from_millis(3),
        }));
        assert_eq!(
            res,
            ExecutionResult::succeeded("hello\n".into(), "warn\n".into(), Duration::from_millis(3))
        );
    }

    #[test]
    fn test_remote_execution_success_follows_failed_tests() {
        let ok = normalize_execution(RawExecution::Remote(
            response(100.0, &["a"], &[]),
            Duration::from_millis(10),
        ));
        assert!(ok.success);
        assert_eq!(ok.failure, None);

        let bad = normalize_execution(RawExecution::Remote(
            response(0.0, &[], &["a"]),
            Duration::from_millis(10),
        ));
        assert!(!bad.success);
        assert_eq!(bad.failure, Some(FailureKind::InterpreterError));
    }

    #[test]
    fn test_remote_grading_reconciles_ids() {
        let cases = vec![
            TestCase::new("a", "", "", 1.0),
            TestCase::new("b", "", "", 1.0),
            TestCase::new("c", "", "", 1.0),
        ];
        // `b` is reported twice, `c` is missing, `z` was never requested
        let raw = response(66.6, &["a", "b", "z"], &["b"]);
        let res = normalize_grading(RawGrading::Remote(raw, Duration::from_millis(5)), &cases);
        assert_eq!(res.passed_test_ids, vec!["a".to_string()]);
        assert_eq!(res.failed_test_ids, vec!["b".to_string(), "c".to_string()]);
        // One of three equally weighted tests passed, whatever the service claims
        assert_eq!(res.score, 33);
        assert_eq!(res.hint.as_deref(), Some("try again"));
    }

    #[test]
    fn test_remote_score_follows_case_points() {
        let cases = vec![
            TestCase::new("a", "", "", 30.0),
            TestCase::new("b", "", "", 70.0),
        ];
        let res = normalize_grading(
            RawGrading::Remote(response(250.0, &["b"], &["a"]), Duration::ZERO),
            &cases,
        );
        assert_eq!(res.score, 70);

        let free = vec![TestCase::new("a", "", "", 0.0)];
        let res = normalize_grading(
            RawGrading::Remote(response(100.0, &["a"], &[]), Duration::ZERO),
            &free,
        );
        assert_eq!(res.passed_test_ids, vec!["a".to_string()]);
        assert_eq!(res.score, 0);
    }

    #[test]
    fn test_local_truncation_is_reported() {
        let opt = ExecOptions {
            stdout_size_limit: 4,
            ..Default::default()
        };
        let mut out = OutputCapture::new(&opt);
        out.stdout.write("hello\n");
        let res = normalize_execution(RawExecution::Local(LocalRawResult {
            capture: out,
            outcome: Ok(()),
            elapsed: Duration::ZERO,
        }));
        assert!(res.success);
        assert!(res.truncated);
        assert_eq!(res.stdout, "hell");

        let res = normalize_execution(RawExecution::Local(LocalRawResult {
            capture: capture("hi\n", ""),
            outcome: Ok(()),
            elapsed: Duration::ZERO,
        }));
        assert!(!res.truncated);
    }

    #[test]
    fn test_local_grading_partition() {
        let cases = vec![
            TestCase::new("a", "", "", 40.0),
            TestCase::new("b", "", "", 60.0),
        ];
        let local = LocalGrading {
            verdicts: vec![
                CaseVerdict {
                    id: "a".into(),
                    passed: true,
                },
                CaseVerdict {
                    id: "b".into(),
                    passed: false,
                },
            ],
            last: Some(ExecutionResult::succeeded(
                "last".into(),
                "".into(),
                Duration::ZERO,
            )),
            elapsed: Duration::from_millis(12),
        };
        let res = normalize_grading(RawGrading::Local(local), &cases);
        assert_eq!(res.passed_test_ids, vec!["a".to_string()]);
        assert_eq!(res.failed_test_ids, vec!["b".to_string()]);
        assert_eq!(res.score, 40);
        assert_eq!(res.stdout, "last");
        assert_eq!(res.duration, Duration::from_millis(12));
    }
}
