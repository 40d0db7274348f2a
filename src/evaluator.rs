//! Evaluator gateway - contract with the external scoring oracle
//!
//! The core never invokes an LLM or test harness itself; it hands candidate
//! content to a pluggable, possibly slow, possibly rate-limited gateway and
//! gets back a fitness vector plus an execution trace. All calls are
//! independent and safe to issue concurrently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::{FitnessVector, Segment};

/// Typed failure from a single evaluation call.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("evaluation timed out")]
    Timeout,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("evaluation cancelled")]
    Cancelled,
}

/// The fixed evaluation suite handed to the gateway alongside each
/// candidate. Opaque to the core: only the gateway interprets the payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EvaluationSuite {
    pub name: String,
    pub payload: serde_json::Value,
}

impl EvaluationSuite {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// One test case inside an execution trace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceCase {
    pub input: String,
    pub output: Option<String>,
    pub passed: bool,
    pub error: Option<String>,
}

/// Record of one evaluation. Consumed by the reflector and then discarded;
/// not part of the long-lived core state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub candidate_id: usize,
    pub cases: Vec<TraceCase>,
    pub total_cost: f64,
    pub total_latency_ms: f64,
    pub failure_excerpts: Vec<String>,
}

impl ExecutionTrace {
    /// Synthetic trace for a candidate whose evaluation call itself failed,
    /// so the reflector still sees the failure.
    pub fn from_failure(candidate_id: usize, error: &EvalError) -> Self {
        let message = error.to_string();
        Self {
            candidate_id,
            cases: vec![TraceCase {
                input: String::new(),
                output: None,
                passed: false,
                error: Some(message.clone()),
            }],
            total_cost: 0.0,
            total_latency_ms: 0.0,
            failure_excerpts: vec![message],
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TraceCase> {
        self.cases.iter().filter(|c| !c.passed)
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Coarse classification of a failed case, derived from its error text.
/// Feeds the reflector's signature grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Output did not match the requested structure or format.
    Format,
    /// The prompt lacked context the task needed.
    MissingContext,
    /// An assertion or declared constraint failed.
    Constraint,
    /// Timeout, rate limit, provider outage, cancellation.
    Infrastructure,
    Unknown,
}

impl FailureCategory {
    /// Classify an error message by keyword, mirroring how evaluation
    /// harnesses phrase their failures.
    pub fn classify(error: &str) -> Self {
        let lower = error.to_lowercase();

        if lower.contains("parse")
            || lower.contains("json")
            || lower.contains("deserialize")
            || lower.contains("format")
        {
            FailureCategory::Format
        } else if lower.contains("missing") || lower.contains("context") {
            FailureCategory::MissingContext
        } else if lower.contains("assert") || lower.contains("constraint") || lower.contains("check")
        {
            FailureCategory::Constraint
        } else if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("rate limit")
            || lower.contains("unavailable")
            || lower.contains("cancelled")
            || lower.contains("provider")
        {
            FailureCategory::Infrastructure
        } else {
            FailureCategory::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FailureCategory::Format => "format",
            FailureCategory::MissingContext => "missing_context",
            FailureCategory::Constraint => "constraint",
            FailureCategory::Infrastructure => "infrastructure",
            FailureCategory::Unknown => "unknown",
        }
    }
}

/// External scoring oracle. Implementations must be safely callable
/// concurrently with no shared mutable state across calls.
#[async_trait]
pub trait EvaluatorGateway: Send + Sync {
    async fn evaluate(
        &self,
        candidate_id: usize,
        content: &[Segment],
        suite: &EvaluationSuite,
    ) -> Result<(FitnessVector, ExecutionTrace), EvalError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_failure_categories() {
        assert_eq!(
            FailureCategory::classify("Failed to parse output as JSON"),
            FailureCategory::Format
        );
        assert_eq!(
            FailureCategory::classify("missing required context field"),
            FailureCategory::MissingContext
        );
        assert_eq!(
            FailureCategory::classify("Assertion 'non_empty' failed"),
            FailureCategory::Constraint
        );
        assert_eq!(
            FailureCategory::classify("evaluation timed out"),
            FailureCategory::Infrastructure
        );
        assert_eq!(
            FailureCategory::classify("something odd happened"),
            FailureCategory::Unknown
        );
    }

    #[test]
    fn test_failure_trace_has_one_failed_case() {
        let trace = ExecutionTrace::from_failure(7, &EvalError::Timeout);

        assert_eq!(trace.candidate_id, 7);
        assert_eq!(trace.failure_count(), 1);
        assert_eq!(
            FailureCategory::classify(trace.cases[0].error.as_deref().unwrap()),
            FailureCategory::Infrastructure
        );
    }
}
