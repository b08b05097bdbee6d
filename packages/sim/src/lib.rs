//! In-process simulated relay and the scripted end-to-end ride scenarios
//! that exercise the rider/driver protocol against it.

use std::fmt;
use std::time::Duration;

pub mod relay;
pub mod scenarios;

pub use relay::{SimFilter, SimRelay, SimRelayHandle, SimRelayMessage};

/// Outcome of a single scenario run.
#[derive(Debug, Clone)]
pub enum TestResult {
    Pass { name: String, duration: Duration },
    Fail { name: String, error: String, duration: Duration },
    Skip { name: String, reason: String },
}

impl TestResult {
    pub fn pass(name: impl Into<String>, duration: Duration) -> Self {
        Self::Pass { name: name.into(), duration }
    }

    pub fn fail(name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self::Fail { name: name.into(), error: error.into(), duration }
    }

    pub fn skip(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Skip { name: name.into(), reason: reason.into() }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Pass { name, .. } | Self::Fail { name, .. } | Self::Skip { name, .. } => name,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass { name, duration } => {
                write!(f, "\x1b[32mPASS\x1b[0m: {} ({:.2}ms)", name, duration.as_millis())
            }
            Self::Fail { name, error, duration } => {
                write!(f, "\x1b[31mFAIL\x1b[0m: {} - {}\n    ({:.2}ms)", name, error, duration.as_millis())
            }
            Self::Skip { name, reason } => write!(f, "\x1b[33mSKIP\x1b[0m: {} - {}", name, reason),
        }
    }
}

/// Aggregates scenario results and prints a summary, same shape as a CI
/// test runner's own suite report.
#[derive(Debug, Clone)]
pub struct TestSuite {
    name: String,
    results: Vec<TestResult>,
    start_time: std::time::Instant,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), results: Vec::new(), start_time: std::time::Instant::now() }
    }

    pub fn add_result(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.is_pass()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_fail()).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn print_summary(&self) {
        let elapsed = self.elapsed();
        println!();
        println!("Scenario Suite: {}", self.name);
        println!("----------------------------------------");
        println!("Total:   {}", self.total());
        println!("Passed:  \x1b[32m{}\x1b[0m", self.passed());
        println!("Failed:  \x1b[31m{}\x1b[0m", self.failed());
        println!("Elapsed: {:.2}ms", elapsed.as_millis());
        println!("----------------------------------------");
        if self.failed() > 0 {
            println!("\nFailed scenarios:");
            for result in &self.results {
                if result.is_fail() {
                    println!("  {}", result);
                }
            }
        }
    }
}

impl fmt::Display for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestSuite({} - {} passed, {} failed)", self.name, self.passed(), self.failed())
    }
}
