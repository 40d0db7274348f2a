//! Reflector - turns execution traces into structured mutation hints
//!
//! Deterministic, rule-based trace analysis: failed cases are grouped by
//! shared signature (error category plus input shape), and each group above
//! an occurrence threshold yields one insight suggesting the edit kind most
//! likely to address it. Insights are advisory weighting only; the genetic
//! operators work fine with none.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::evaluator::{ExecutionTrace, FailureCategory};
use crate::operators::EditKind;

/// Coarse bucket for the size of a failing input, so failures on similar
/// inputs group together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputShape {
    Short,
    Medium,
    Long,
}

impl InputShape {
    pub fn of(input: &str) -> Self {
        match input.split_whitespace().count() {
            0..=8 => InputShape::Short,
            9..=32 => InputShape::Medium,
            _ => InputShape::Long,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InputShape::Short => "short",
            InputShape::Medium => "medium",
            InputShape::Long => "long",
        }
    }
}

/// Fixed mapping from failure category to the edit kind most likely to
/// address it: repeated format errors want an explicit constraint, missing
/// context wants an example, and so on.
fn suggested_edit(category: FailureCategory) -> EditKind {
    match category {
        FailureCategory::Format => EditKind::AddConstraint,
        FailureCategory::MissingContext => EditKind::AddExample,
        FailureCategory::Constraint => EditKind::Rephrase,
        FailureCategory::Infrastructure => EditKind::RemoveSection,
        FailureCategory::Unknown => EditKind::Reorder,
    }
}

/// A structured mutation hint derived from one failure group. Ephemeral:
/// insights live for a single generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Insight {
    /// Failure signature tag, e.g. "format/short".
    pub target_failure_pattern: String,
    /// Edit kind to bias mutation toward.
    pub edit_kind: EditKind,
    /// Group size relative to the evaluated population, capped at 1.0.
    pub confidence: f64,
    /// Candidates whose traces contributed to this group.
    pub source_candidates: Vec<usize>,
}

/// Rule-based trace analyzer. A learned reflector can replace this behind
/// the same insight-producing interface.
pub struct Reflector {
    min_occurrences: usize,
}

#[derive(Default)]
struct FailureGroup {
    count: usize,
    sources: Vec<usize>,
}

impl Reflector {
    pub fn new(min_occurrences: usize) -> Self {
        Self { min_occurrences }
    }

    /// Derive insights from one generation's traces. Returns an empty set
    /// when no failure group clears the occurrence threshold.
    pub fn reflect(&self, traces: &[ExecutionTrace], evaluated: usize) -> Vec<Insight> {
        let mut groups: IndexMap<(FailureCategory, InputShape), FailureGroup> = IndexMap::new();

        for trace in traces {
            for case in trace.failures() {
                let category = case
                    .error
                    .as_deref()
                    .map(FailureCategory::classify)
                    .unwrap_or(FailureCategory::Unknown);
                let shape = InputShape::of(&case.input);

                let group = groups.entry((category, shape)).or_default();
                group.count += 1;
                if !group.sources.contains(&trace.candidate_id) {
                    group.sources.push(trace.candidate_id);
                }
            }
        }

        let mut insights: Vec<Insight> = groups
            .into_iter()
            .filter(|(_, group)| group.count >= self.min_occurrences)
            .map(|((category, shape), group)| Insight {
                target_failure_pattern: format!("{}/{}", category.label(), shape.label()),
                edit_kind: suggested_edit(category),
                confidence: (group.count as f64 / evaluated.max(1) as f64).min(1.0),
                source_candidates: group.sources,
            })
            .collect();

        // Strongest signal first; grouping order breaks ties so output is
        // stable under a fixed seed.
        insights.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if insights.is_empty() {
            log::debug!("reflection produced no insights; mutation stays unguided");
        } else {
            log::debug!("reflection produced {} insight(s)", insights.len());
        }

        insights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::TraceCase;
    use pretty_assertions::assert_eq;

    fn trace(candidate_id: usize, cases: Vec<TraceCase>) -> ExecutionTrace {
        ExecutionTrace {
            candidate_id,
            cases,
            total_cost: 1.0,
            total_latency_ms: 10.0,
            failure_excerpts: vec![],
        }
    }

    fn failed_case(input: &str, error: &str) -> TraceCase {
        TraceCase {
            input: input.to_string(),
            output: None,
            passed: false,
            error: Some(error.to_string()),
        }
    }

    fn passed_case(input: &str) -> TraceCase {
        TraceCase {
            input: input.to_string(),
            output: Some("ok".to_string()),
            passed: true,
            error: None,
        }
    }

    #[test]
    fn test_repeated_format_failures_suggest_constraint() {
        let traces = vec![
            trace(0, vec![failed_case("short input", "could not parse JSON")]),
            trace(1, vec![failed_case("other input", "invalid output format")]),
        ];

        let insights = Reflector::new(2).reflect(&traces, 10);

        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].edit_kind, EditKind::AddConstraint);
        assert_eq!(insights[0].target_failure_pattern, "format/short");
        assert_eq!(insights[0].source_candidates, vec![0, 1]);
        assert!((insights[0].confidence - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_missing_context_failures_suggest_example() {
        let traces = vec![
            trace(0, vec![failed_case("a b", "missing context for entity")]),
            trace(2, vec![failed_case("c d", "missing context for entity")]),
        ];

        let insights = Reflector::new(2).reflect(&traces, 4);
        assert_eq!(insights[0].edit_kind, EditKind::AddExample);
    }

    #[test]
    fn test_groups_below_threshold_fail_soft() {
        let traces = vec![
            trace(0, vec![failed_case("x", "could not parse"), passed_case("y")]),
            trace(1, vec![failed_case("z", "assertion failed")]),
        ];

        // Two different signatures, each seen once.
        let insights = Reflector::new(2).reflect(&traces, 2);
        assert!(insights.is_empty());
    }

    #[test]
    fn test_confidence_is_capped() {
        let cases: Vec<TraceCase> = (0..5)
            .map(|i| failed_case(&format!("input {i}"), "bad format"))
            .collect();
        let traces = vec![trace(0, cases)];

        let insights = Reflector::new(2).reflect(&traces, 2);
        assert_eq!(insights[0].confidence, 1.0);
    }

    #[test]
    fn test_strongest_insight_first() {
        let mut cases = vec![
            failed_case("a", "bad format"),
            failed_case("b", "bad format"),
            failed_case("c", "bad format"),
        ];
        cases.extend(vec![
            failed_case("d", "assertion failed"),
            failed_case("e", "assertion failed"),
        ]);
        let traces = vec![trace(0, cases)];

        let insights = Reflector::new(2).reflect(&traces, 10);
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].edit_kind, EditKind::AddConstraint);
        assert!(insights[0].confidence > insights[1].confidence);
    }
}
