//! Verification records, failure classification and retry guidance.
//!
//! Everything here is pure: the controller in `crate::verify` runs the checks
//! and persists records, this module only interprets captured output.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Hard ceiling on verification attempts per task. Not configurable.
pub const MAX_VERIFICATION_ATTEMPTS: u32 = 3;

/// Category of a verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Test,
    Type,
    Lint,
    Build,
    Review,
}

impl FailureKind {
    pub fn heading(self) -> &'static str {
        match self {
            FailureKind::Test => "Test failures",
            FailureKind::Type => "Type errors",
            FailureKind::Lint => "Lint findings",
            FailureKind::Build => "Build errors",
            FailureKind::Review => "Review findings",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Test => "test",
            FailureKind::Type => "type",
            FailureKind::Lint => "lint",
            FailureKind::Build => "build",
            FailureKind::Review => "review",
        };
        f.write_str(name)
    }
}

/// Classification of a behavior-check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    /// Passed, or failed without recognizable evidence.
    #[default]
    None,
    /// Assertions fail but the code builds and runs: expected mid-TDD.
    MissingImpl,
    CompilationError,
    RuntimeError,
}

impl TestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TestOutcome::None => "none",
            TestOutcome::MissingImpl => "missing_impl",
            TestOutcome::CompilationError => "compilation_error",
            TestOutcome::RuntimeError => "runtime_error",
        }
    }
}

/// One failed check within an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Result of one verification attempt on one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub task_id: String,
    pub attempt: u32,
    pub behavior_passed: bool,
    pub quality_passed: bool,
    #[serde(default)]
    pub outcome: TestOutcome,
    #[serde(default)]
    pub failures: Vec<Failure>,
    #[serde(default)]
    pub guidance: String,
    pub timestamp: DateTime<Utc>,
}

impl VerificationRecord {
    pub fn passed(&self) -> bool {
        self.behavior_passed && self.quality_passed
    }
}

static COMPILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(error\[E\d{4}\]|could not compile|error TS\d+|SyntaxError|IndentationError|compilation (failed|error)|cannot find (module|symbol|type|value)|undefined reference|ModuleNotFoundError|ImportError)",
    )
    .expect("compile marker regex")
});

static RUNTIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(Traceback \(most recent call last\)|Segmentation fault|ReferenceError|TypeError|NullPointerException|Uncaught|RuntimeError|stack overflow|unhandled exception|core dumped)",
    )
    .expect("runtime marker regex")
});

static PANIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"panicked at").expect("panic marker regex"));

static ASSERTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(assert|AssertionError|expected .*(but|got|received|found)|left == right|to equal|toBe|mismatch|FAILED|\bFAIL\b)",
    )
    .expect("assertion marker regex")
});

static SALIENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(error|fail|panicked|assert|expected|exception|traceback|warning|cannot|undefined|not found|mismatch)",
    )
    .expect("salient line regex")
});

/// Classify a behavior check from its exit status and captured output.
///
/// Compile markers win over runtime markers, which win over assertion-style
/// evidence. A Rust panic counts as runtime only when it is not an assertion.
pub fn classify_outcome(success: bool, output: &str) -> TestOutcome {
    if success {
        return TestOutcome::None;
    }
    if COMPILE_RE.is_match(output) {
        return TestOutcome::CompilationError;
    }
    let assertion = ASSERTION_RE.is_match(output);
    if RUNTIME_RE.is_match(output) || (PANIC_RE.is_match(output) && !assertion) {
        return TestOutcome::RuntimeError;
    }
    if assertion {
        return TestOutcome::MissingImpl;
    }
    TestOutcome::None
}

/// Pick at most `max_lines` lines that look like error evidence.
///
/// Falls back to the last `max_lines` non-empty lines when nothing matches.
pub fn salient_lines(output: &str, max_lines: usize) -> Vec<String> {
    let matching: Vec<String> = output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && SALIENT_RE.is_match(line))
        .take(max_lines)
        .map(str::to_string)
        .collect();
    if !matching.is_empty() {
        return matching;
    }
    let non_empty: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = non_empty.len().saturating_sub(max_lines);
    non_empty[start..].iter().map(|s| s.to_string()).collect()
}

/// Render retry guidance for the next session, grouped by failure kind.
pub fn synthesize_guidance(
    task_id: &str,
    attempt: u32,
    outcome: TestOutcome,
    failures: &[Failure],
    max_lines: usize,
) -> String {
    if failures.is_empty() {
        return String::new();
    }

    let mut grouped: BTreeMap<FailureKind, Vec<&Failure>> = BTreeMap::new();
    for failure in failures {
        grouped.entry(failure.kind).or_default().push(failure);
    }

    let remaining = MAX_VERIFICATION_ATTEMPTS.saturating_sub(attempt);
    let mut buf = format!(
        "Verification of task '{task_id}' failed (attempt {attempt}/{MAX_VERIFICATION_ATTEMPTS}, {remaining} remaining).\n"
    );
    match outcome {
        TestOutcome::CompilationError => {
            buf.push_str("The code does not compile. Fix build and type errors before anything else.\n");
        }
        TestOutcome::RuntimeError => {
            buf.push_str("The tests crash at runtime. Look for the exception or panic below.\n");
        }
        TestOutcome::MissingImpl => {
            buf.push_str(
                "The tests run but assertions fail: the behavior is not implemented yet.\n",
            );
        }
        TestOutcome::None => {}
    }

    for (kind, items) in grouped {
        buf.push_str(&format!("\n## {}\n", kind.heading()));
        for failure in items {
            buf.push_str(&format!("- {}\n", failure.summary));
            if let Some(output) = &failure.output {
                for line in salient_lines(output, max_lines) {
                    buf.push_str(&format!("    {line}\n"));
                }
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_none_regardless_of_output() {
        assert_eq!(classify_outcome(true, "error[E0425]"), TestOutcome::None);
    }

    #[test]
    fn compile_markers_win() {
        let out = "error[E0425]: cannot find value `x` in this scope\ntest result: FAILED";
        assert_eq!(classify_outcome(false, out), TestOutcome::CompilationError);
        assert_eq!(
            classify_outcome(false, "src/a.ts(3,1): error TS2304: Cannot find name"),
            TestOutcome::CompilationError
        );
    }

    #[test]
    fn runtime_markers_are_detected() {
        let out = "Traceback (most recent call last):\n  File \"a.py\"\nKeyError: 'x'";
        assert_eq!(classify_outcome(false, out), TestOutcome::RuntimeError);
        let panic = "thread 'main' panicked at src/main.rs:3:5:\nindex out of bounds";
        assert_eq!(classify_outcome(false, panic), TestOutcome::RuntimeError);
    }

    #[test]
    fn assertion_failures_mean_missing_impl() {
        let out = "thread 'adds' panicked at src/lib.rs:9:9:\nassertion `left == right` failed\n  left: 3\n right: 4";
        assert_eq!(classify_outcome(false, out), TestOutcome::MissingImpl);
        let jest = "expect(received).toBe(expected)\nExpected: 4\nReceived: 3";
        assert_eq!(classify_outcome(false, jest), TestOutcome::MissingImpl);
    }

    #[test]
    fn unrecognized_failure_is_none() {
        assert_eq!(classify_outcome(false, "exit 1"), TestOutcome::None);
    }

    #[test]
    fn salient_lines_are_bounded() {
        let output = (0..20)
            .map(|i| format!("error: thing {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let lines = salient_lines(&output, 5);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "error: thing 0");
    }

    #[test]
    fn salient_lines_fall_back_to_tail() {
        let lines = salient_lines("one\ntwo\n\nthree\n", 2);
        assert_eq!(lines, vec!["two".to_string(), "three".to_string()]);
    }

    #[test]
    fn guidance_groups_by_kind() {
        let failures = vec![
            Failure {
                kind: FailureKind::Lint,
                summary: "lint failed".into(),
                output: Some("warning: unused variable `x`".into()),
            },
            Failure {
                kind: FailureKind::Test,
                summary: "tests failed".into(),
                output: Some("assertion failed: ok\nnoise".into()),
            },
        ];
        let text = synthesize_guidance("t1", 1, TestOutcome::MissingImpl, &failures, 10);
        assert!(text.contains("attempt 1/3, 2 remaining"));
        assert!(text.contains("not implemented yet"));
        let test_pos = text.find("## Test failures").expect("test heading");
        let lint_pos = text.find("## Lint findings").expect("lint heading");
        assert!(test_pos < lint_pos);
        assert!(text.contains("    assertion failed: ok"));
        assert!(!text.contains("noise"));
    }

    #[test]
    fn guidance_is_empty_without_failures() {
        assert!(synthesize_guidance("t1", 1, TestOutcome::None, &[], 10).is_empty());
    }
}
