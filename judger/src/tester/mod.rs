//! Grading a submission against a suite of test cases.

pub mod model;

use std::time::Instant;

use tracing::instrument;

use self::model::{validate_suite, GradingResult, TestCase};
use crate::{
    coordinator::{Coordinator, ExecutionPath},
    err::ExecResult,
    normalize::{failed_from_err, normalize_grading, CaseVerdict, LocalGrading, RawGrading},
    sandbox::{ExecutionRequest, ExecutionResult},
};

/// Separator between the submission and the code of a test case.
const CASE_SEPARATOR: &str = "\n\n";

/// Build the code run for one test case.
pub fn compose_case(code: &str, case_code: &str) -> String {
    let mut s = String::with_capacity(code.len() + CASE_SEPARATOR.len() + case_code.len());
    s.push_str(code);
    s.push_str(CASE_SEPARATOR);
    s.push_str(case_code);
    s
}

/// Whether `res` passes a test expecting `expected` on stdout.
///
/// Only leading and trailing whitespace is ignored.
pub fn is_pass(res: &ExecutionResult, expected: &str) -> bool {
    res.success && res.stdout.trim() == expected.trim()
}

pub struct Harness<'a> {
    coordinator: &'a Coordinator,
}

impl<'a> Harness<'a> {
    pub fn new(coordinator: &'a Coordinator) -> Harness<'a> {
        Harness { coordinator }
    }

    /// Grade `code` against `cases`.
    ///
    /// A test case that times out or raises only fails itself. Any other
    /// error aborts grading and is returned as is; in particular a failing
    /// remote service never produces a zero-scored result.
    #[instrument(skip(self, code, cases), fields(cases = cases.len()))]
    pub async fn grade_submission(
        &self,
        code: &str,
        cases: &[TestCase],
    ) -> ExecResult<GradingResult> {
        validate_suite(cases)?;
        let path = self.coordinator.select_path()?;
        tracing::info!(?path, "Grading submission");

        let raw = match path {
            ExecutionPath::Local => RawGrading::Local(self.grade_locally(code, cases).await?),
            ExecutionPath::Remote if cases.is_empty() => RawGrading::Local(LocalGrading::default()),
            ExecutionPath::Remote => {
                let (res, elapsed) = self.coordinator.submit_remote(code).await?;
                RawGrading::Remote(res, elapsed)
            }
        };

        let res = normalize_grading(raw, cases);
        tracing::info!(
            passed = res.passed_test_ids.len(),
            failed = res.failed_test_ids.len(),
            score = res.score,
            "Grading finished"
        );
        Ok(res)
    }

    async fn grade_locally(&self, code: &str, cases: &[TestCase]) -> ExecResult<LocalGrading> {
        let mut grading = LocalGrading::default();
        let timeout = self.coordinator.default_timeout();
        let start = Instant::now();

        for case in cases {
            let req = ExecutionRequest::new(compose_case(code, &case.code)).with_timeout(timeout);
            let case_start = Instant::now();
            let res = match self.coordinator.run_with(ExecutionPath::Local, &req).await {
                Ok(res) => res,
                Err(e) if e.is_recoverable() => failed_from_err(&e, case_start.elapsed()),
                Err(e) => {
                    tracing::warn!(id = %case.id, "Grading aborted: {}", e);
                    return Err(e);
                }
            };

            let passed = is_pass(&res, &case.expected_output);
            tracing::debug!(id = %case.id, passed, success = res.success, "Test case finished");
            grading.verdicts.push(CaseVerdict {
                id: case.id.clone(),
                passed,
            });
            grading.last = Some(res);
        }

        grading.elapsed = start.elapsed();
        Ok(grading)
    }
}
