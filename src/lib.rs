//! Genetic-Pareto prompt optimization engine
//!
//! Evolves a population of prompt candidates against a pluggable evaluation
//! gateway. Each generation is scored concurrently on multiple objectives,
//! ranked into Pareto fronts with crowding distances, analyzed by a
//! deterministic reflector that turns failure traces into mutation hints,
//! and reproduced through tournament selection, crossover, and guided
//! mutation. Elitism preserves the best candidates, and a diversity monitor
//! injects fresh blood when the population collapses toward a single
//! phrasing.
//!
//! The crate is the optimization core only. Prompt execution, scoring, and
//! persistence live behind the [`evaluator::EvaluatorGateway`] trait; runs
//! are deterministic for a fixed seed against a deterministic gateway.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gepa_engine::{
//!     candidate::Segment, config::RunConfig, evaluator::EvaluationSuite,
//!     optimizer::GepaOptimizer,
//! };
//!
//! # async fn demo(gateway: Arc<dyn gepa_engine::evaluator::EvaluatorGateway>) -> anyhow::Result<()> {
//! let config = RunConfig::default();
//! let suite = EvaluationSuite::new("smoke", serde_json::json!({}));
//! let optimizer = GepaOptimizer::new(config, gateway, suite)?;
//! let seeds = vec![vec![
//!     Segment::text("Answer the question: "),
//!     Segment::variable("question"),
//! ]];
//! let result = optimizer.run(&seeds).await?;
//! println!("best front has {} candidate(s)", result.front.len());
//! # Ok(())
//! # }
//! ```

pub mod candidate;
pub mod config;
pub mod diversity;
pub mod error;
pub mod evaluator;
pub mod operators;
pub mod optimizer;
pub mod pareto;
pub mod reflector;
pub mod store;

pub use candidate::{Candidate, FitnessVector, Origin, Population, Segment};
pub use config::{Direction, Objective, RunConfig};
pub use error::{GepaError, RunError};
pub use evaluator::{EvalError, EvaluationSuite, EvaluatorGateway, ExecutionTrace};
pub use optimizer::{
    CancelToken, FrontCandidate, GenerationSummary, GepaOptimizer, RunResult, TerminationReason,
};
