//! Problem model as seen by the grading core (read-only)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
    /// Only ever set on visible cases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[cfg(test)]
impl TestCase {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            explanation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub visible_test_cases: Vec<TestCase>,
    #[serde(default)]
    pub hidden_test_cases: Vec<TestCase>,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Problem {
    pub fn visible_count(&self) -> usize {
        self.visible_test_cases.len()
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden_test_cases.len()
    }

    pub fn total_count(&self) -> usize {
        self.visible_count() + self.hidden_count()
    }

    /// Every judged case, visible cases first
    pub fn judged_cases(&self) -> impl Iterator<Item = &TestCase> {
        self.visible_test_cases
            .iter()
            .chain(self.hidden_test_cases.iter())
    }

    pub fn requires_premium(&self, caller_is_premium: bool) -> bool {
        self.is_premium && !caller_is_premium
    }
}

/// Read-only access to problems
#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn fetch(&self, problem_id: &str) -> anyhow::Result<Option<Problem>>;
}

#[cfg(test)]
pub fn sample_problem(visible: &[(&str, &str)], hidden: &[(&str, &str)]) -> Problem {
    Problem {
        id: "p1".into(),
        title: "Echo".into(),
        difficulty: Difficulty::Easy,
        visible_test_cases: visible.iter().map(|(i, o)| TestCase::new(*i, *o)).collect(),
        hidden_test_cases: hidden.iter().map(|(i, o)| TestCase::new(*i, *o)).collect(),
        is_premium: false,
        is_active: true,
    }
}
