//! Error taxonomy for the optimization core
//!
//! Per-candidate evaluator failures are absorbed inside the generation loop
//! (the candidate receives a sentinel worst fitness) and never surface here.
//! Everything in this module is either a configuration problem caught before
//! seeding, or a fatal condition that halts the run.

use thiserror::Error;

use crate::optimizer::FrontCandidate;

/// Fatal conditions that halt the optimizer.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum GepaError {
    /// Rejected before seeding: the run could never converge as configured.
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    /// The Pareto ranker was invoked on zero evaluated candidates.
    #[error("cannot rank an empty population")]
    EmptyPopulation,

    /// A fitness vector arrived with a different objective set than the run
    /// was configured with.
    #[error(
        "objective set changed mid-run: expected [{}], found [{}]",
        expected.join(", "),
        found.join(", ")
    )]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Too many candidates failed evaluation in a single generation;
    /// continuing would evolve against noise.
    #[error("evaluation storm: {failed} of {total} evaluations failed this generation")]
    EvaluationStorm { failed: usize, total: usize },

    /// Two distinct candidates were stored under the same id.
    #[error("candidate id {0} already exists with different content")]
    DuplicateCandidate(usize),
}

/// A failed run: the fatal error plus the best front the optimizer had
/// fully ranked before halting. The partial result is never silently
/// discarded; callers decide whether it is still useful.
#[derive(Debug, Error)]
#[error("optimization halted: {error}")]
pub struct RunError {
    #[source]
    pub error: GepaError,
    /// Front 0 of the last fully-ranked generation, empty if the run failed
    /// before any generation completed ranking.
    pub last_front: Vec<FrontCandidate>,
}

impl RunError {
    pub fn new(error: GepaError, last_front: Vec<FrontCandidate>) -> Self {
        Self { error, last_front }
    }
}
