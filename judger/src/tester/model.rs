use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, time::Duration};

use crate::{err::ExecErr, util::duration};

/// One test of a mission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Unique id of this test within its suite.
    pub id: String,
    pub name: String,
    /// Test code appended to the submission.
    pub code: String,
    /// Expected `stdout` of the submission followed by `code`.
    #[serde(alias = "expected_output")]
    pub expected_output: String,
    /// Weight of this test in the score.
    #[serde(default = "default_points")]
    pub points: f64,
}

fn default_points() -> f64 {
    1.0
}

impl TestCase {
    pub fn new(
        id: impl Into<String>,
        code: impl Into<String>,
        expected_output: impl Into<String>,
        points: f64,
    ) -> TestCase {
        let id = id.into();
        TestCase {
            name: id.clone(),
            id,
            code: code.into(),
            expected_output: expected_output.into(),
            points,
        }
    }
}

/// Reject suites that would break the pass/fail partition or the score.
pub fn validate_suite(cases: &[TestCase]) -> Result<(), ExecErr> {
    let mut seen = HashSet::new();
    for case in cases {
        if !seen.insert(case.id.as_str()) {
            return Err(ExecErr::InvalidTestSuite(format!(
                "duplicate test id `{}`",
                case.id
            )));
        }
        if !case.points.is_finite() || case.points < 0.0 {
            return Err(ExecErr::InvalidTestSuite(format!(
                "test `{}` has invalid points {}",
                case.id, case.points
            )));
        }
    }
    Ok(())
}

/// The canonical outcome of grading a submission against a test suite.
///
/// Every evaluated test id appears in exactly one of `passed_test_ids` and
/// `failed_test_ids`, in evaluation order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
    pub passed_test_ids: Vec<String>,
    pub failed_test_ids: Vec<String>,
    /// Percentage of points earned by `passed_test_ids`, 0 to 100. Computed
    /// the same way on both paths, whatever score the remote service claims.
    pub score: u8,
    /// `stdout` of the most recent run, for display only.
    pub stdout: String,
    /// `stderr` of the most recent run, for display only.
    pub stderr: String,
    #[serde(with = "duration")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// A test suite file as stored on disk.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TestSuiteFile {
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

impl TestSuiteFile {
    /// Read a suite from a `.toml` file, or from JSON (either a bare array of
    /// cases or `{ "tests": [...] }`) for anything else.
    pub async fn load(path: &Path) -> anyhow::Result<Vec<TestCase>> {
        let s = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read test suite {}", path.display()))?;
        let is_toml = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
        let cases = if is_toml {
            toml::from_str::<TestSuiteFile>(&s)
                .context("Failed to parse TOML test suite")?
                .tests
        } else {
            Self::parse_json(&s)?
        };
        validate_suite(&cases)?;
        Ok(cases)
    }

    pub fn parse_json(s: &str) -> anyhow::Result<Vec<TestCase>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bare(Vec<TestCase>),
            Wrapped(TestSuiteFile),
        }

        let repr: Repr = serde_json::from_str(s).context("Failed to parse JSON test suite")?;
        Ok(match repr {
            Repr::Bare(v) => v,
            Repr::Wrapped(f) => f.tests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_duplicate_ids_rejected() {
        let cases = vec![
            TestCase::new("a", "f()", "1", 1.0),
            TestCase::new("a", "g()", "2", 1.0),
        ];
        assert!(matches!(
            validate_suite(&cases),
            Err(ExecErr::InvalidTestSuite(_))
        ));
    }

    #[test]
    fn test_bad_points_rejected() {
        for points in [-1.0, f64::NAN, f64::INFINITY] {
            let cases = vec![TestCase::new("a", "f()", "1", points)];
            assert!(validate_suite(&cases).is_err(), "{} accepted", points);
        }
        assert!(validate_suite(&[TestCase::new("a", "f()", "1", 0.0)]).is_ok());
    }

    #[test]
    fn test_json_suite_shapes() {
        let bare = r#"[{"id": "t1", "name": "Prints hello", "code": "main()", "expectedOutput": "hello", "points": 10}]"#;
        let wrapped = r#"{"tests": [{"id": "t1", "name": "Prints hello", "code": "main()", "expected_output": "hello", "points": 10}]}"#;
        let a = TestSuiteFile::parse_json(bare).unwrap();
        let b = TestSuiteFile::parse_json(wrapped).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].expected_output, "hello");
        assert_eq!(a[0].points, 10.0);
    }

    #[test]
    fn test_toml_suite() {
        let s = r#"
            [[tests]]
            id = "fact-5"
            name = "factorial of 5"
            code = "print(factorial(5))"
            expectedOutput = "120"

            [[tests]]
            id = "fact-0"
            name = "factorial of 0"
            code = "print(factorial(0))"
            expected_output = "1"
            points = 3
        "#;
        let suite: TestSuiteFile = toml::from_str(s).unwrap();
        assert_eq!(suite.tests.len(), 2);
        assert_eq!(suite.tests[0].points, 1.0);
        assert_eq!(suite.tests[1].expected_output, "1");
        assert_eq!(suite.tests[1].points, 3.0);
    }
}
