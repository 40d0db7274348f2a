//! Run configuration - objectives, rates, and fail-fast validation
//!
//! Every knob of the evolutionary loop lives here. Validation runs before
//! seeding so a run that cannot converge is rejected up front rather than
//! discovered generations later.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::GepaError;

/// Hard cap on concurrent evaluator calls, regardless of population size.
/// Keeps fan-out polite toward rate-limited scoring backends.
pub const MAX_WORKERS: usize = 64;

/// Direction of optimization for an objective
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Higher is better (e.g., accuracy)
    Maximize,
    /// Lower is better (e.g., cost, latency)
    Minimize,
}

/// A named optimization objective with its direction, fixed for the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
    pub direction: Direction,
}

impl Objective {
    pub fn maximize(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Maximize,
        }
    }

    pub fn minimize(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Minimize,
        }
    }

    /// Parse objective arguments (e.g., "accuracy=max,cost=min").
    ///
    /// An empty argument list defaults to maximizing "accuracy" only.
    pub fn parse_list(args: &[String]) -> Result<Vec<Objective>> {
        if args.is_empty() {
            return Ok(vec![Objective::maximize("accuracy")]);
        }

        let mut objectives = Vec::new();

        for arg in args {
            for part in arg.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let pieces: Vec<&str> = part.split('=').collect();
                if pieces.len() != 2 {
                    anyhow::bail!(
                        "Invalid objective format: '{}'. Expected 'name=max' or 'name=min'",
                        part
                    );
                }

                let name = pieces[0].trim();
                let direction = match pieces[1].trim() {
                    "max" | "maximize" => Direction::Maximize,
                    "min" | "minimize" => Direction::Minimize,
                    other => anyhow::bail!(
                        "Invalid direction '{}' for objective '{}'. Expected 'max' or 'min'",
                        other,
                        name
                    ),
                };

                objectives.push(Objective {
                    name: name.to_string(),
                    direction,
                });
            }
        }

        validate_objective_names(&objectives).context("Invalid objective list")?;

        Ok(objectives)
    }
}

fn validate_objective_names(objectives: &[Objective]) -> Result<()> {
    for (i, obj) in objectives.iter().enumerate() {
        if obj.name.is_empty() {
            anyhow::bail!("Objective names must be non-empty");
        }
        if objectives[..i].iter().any(|o| o.name == obj.name) {
            anyhow::bail!("Duplicate objective: '{}'", obj.name);
        }
    }
    Ok(())
}

/// Configuration for one optimization run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Population size N, constant across generations.
    pub population_size: usize,
    /// Objectives with their directions, fixed for the run.
    pub objectives: Vec<Objective>,
    /// Objective used for stagnation detection. Defaults to the first
    /// objective when unset.
    pub primary_objective: Option<String>,
    /// Probability of mutating an offspring.
    pub mutation_rate: f64,
    /// Probability of crossover (vs. cloning a single parent).
    pub crossover_rate: f64,
    /// Candidates carried over unchanged each generation.
    pub elitism_count: usize,
    /// Tournament size for parent selection.
    pub tournament_size: usize,
    /// Diversity score below which the population counts as collapsing.
    pub diversity_floor: f64,
    /// Consecutive low-diversity generations before injection triggers.
    pub diversity_window: usize,
    /// Maximum fraction of the population replaced by one injection.
    pub injection_fraction: f64,
    /// Generations without primary-objective improvement before converging.
    pub stagnation_window: usize,
    /// Hard generation limit.
    pub max_generations: usize,
    /// Minimum primary-objective improvement that resets stagnation.
    pub convergence_epsilon: f64,
    /// Concurrent evaluator calls; 0 means population size (capped by
    /// [`MAX_WORKERS`]).
    pub worker_pool: usize,
    /// Deadline for a single evaluator call.
    pub eval_timeout: Duration,
    /// Fraction of failed evaluations in one generation that escalates to
    /// a fatal evaluation storm.
    pub storm_threshold: f64,
    /// Minimum failure-group size for the reflector to emit an insight.
    pub min_insight_occurrences: usize,
    /// RNG seed; identical seeds give byte-identical runs against a
    /// deterministic evaluator.
    pub rng_seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            population_size: 16,
            objectives: vec![Objective::maximize("accuracy")],
            primary_objective: None,
            mutation_rate: 0.3,
            crossover_rate: 0.7,
            elitism_count: 2,
            tournament_size: 2,
            diversity_floor: 0.1,
            diversity_window: 3,
            injection_fraction: 0.2,
            stagnation_window: 10,
            max_generations: 50,
            convergence_epsilon: 0.01,
            worker_pool: 0,
            eval_timeout: Duration::from_secs(30),
            storm_threshold: 0.5,
            min_insight_occurrences: 2,
            rng_seed: 0,
        }
    }
}

impl RunConfig {
    /// Validate the configuration before seeding begins.
    pub fn validate(&self) -> Result<(), GepaError> {
        let invalid = |msg: String| Err(GepaError::InvalidConfig(msg));

        if self.population_size == 0 {
            return invalid("population size must be at least 1".into());
        }
        if self.objectives.is_empty() {
            return invalid("objective list must not be empty".into());
        }
        if let Err(e) = validate_objective_names(&self.objectives) {
            return invalid(e.to_string());
        }
        if self.elitism_count == 0 {
            return invalid("elitism count must be at least 1".into());
        }
        if self.elitism_count >= self.population_size {
            return invalid(format!(
                "elitism count ({}) must be smaller than population size ({})",
                self.elitism_count, self.population_size
            ));
        }
        if self.tournament_size == 0 || self.tournament_size > self.population_size {
            return invalid(format!(
                "tournament size ({}) must be in 1..={}",
                self.tournament_size, self.population_size
            ));
        }
        for (name, rate) in [
            ("mutation rate", self.mutation_rate),
            ("crossover rate", self.crossover_rate),
            ("diversity floor", self.diversity_floor),
            ("storm threshold", self.storm_threshold),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return invalid(format!("{name} ({rate}) must be within 0.0..=1.0"));
            }
        }
        if !(self.injection_fraction > 0.0 && self.injection_fraction <= 1.0) {
            return invalid(format!(
                "injection fraction ({}) must be within (0.0, 1.0]",
                self.injection_fraction
            ));
        }
        if self.diversity_window == 0 {
            return invalid("diversity window must be at least 1".into());
        }
        if self.stagnation_window == 0 {
            return invalid("stagnation window must be at least 1".into());
        }
        if self.max_generations == 0 {
            return invalid("max generations must be at least 1".into());
        }
        if !(self.convergence_epsilon >= 0.0) {
            return invalid(format!(
                "convergence epsilon ({}) must be non-negative",
                self.convergence_epsilon
            ));
        }
        if self.eval_timeout.is_zero() {
            return invalid("evaluation timeout must be non-zero".into());
        }
        if self.min_insight_occurrences == 0 {
            return invalid("minimum insight occurrences must be at least 1".into());
        }
        if let Some(primary) = &self.primary_objective {
            if !self.objectives.iter().any(|o| &o.name == primary) {
                return invalid(format!(
                    "primary objective '{primary}' is not in the objective list"
                ));
            }
        }

        Ok(())
    }

    /// The objective used for stagnation detection.
    pub fn primary(&self) -> &Objective {
        match &self.primary_objective {
            Some(name) => self
                .objectives
                .iter()
                .find(|o| &o.name == name)
                .unwrap_or(&self.objectives[0]),
            None => &self.objectives[0],
        }
    }

    /// Resolved evaluator concurrency bound.
    pub fn effective_workers(&self) -> usize {
        let requested = if self.worker_pool == 0 {
            self.population_size
        } else {
            self.worker_pool
        };
        requested.clamp(1, MAX_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_objective_args() {
        let args = vec!["accuracy=max,cost=min".to_string()];
        let objectives = Objective::parse_list(&args).unwrap();

        assert_eq!(objectives.len(), 2);
        assert_eq!(objectives[0].name, "accuracy");
        assert_eq!(objectives[0].direction, Direction::Maximize);
        assert_eq!(objectives[1].name, "cost");
        assert_eq!(objectives[1].direction, Direction::Minimize);
    }

    #[test]
    fn test_default_objectives() {
        let objectives = Objective::parse_list(&[]).unwrap();
        assert_eq!(objectives.len(), 1);
        assert_eq!(objectives[0].name, "accuracy");
    }

    #[test]
    fn test_parse_rejects_bad_direction() {
        let args = vec!["accuracy=up".to_string()];
        assert!(Objective::parse_list(&args).is_err());
    }

    #[test]
    fn test_parse_rejects_duplicates() {
        let args = vec!["accuracy=max,accuracy=min".to_string()];
        assert!(Objective::parse_list(&args).is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(RunConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validation_rejects_empty_population() {
        let config = RunConfig {
            population_size: 0,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GepaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation_rejects_empty_objectives() {
        let config = RunConfig {
            objectives: vec![],
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_oversized_elitism() {
        let config = RunConfig {
            population_size: 4,
            elitism_count: 4,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_primary() {
        let config = RunConfig {
            primary_objective: Some("latency".to_string()),
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_workers_caps_at_hard_max() {
        let config = RunConfig {
            population_size: 500,
            elitism_count: 2,
            worker_pool: 0,
            ..RunConfig::default()
        };
        assert_eq!(config.effective_workers(), MAX_WORKERS);

        let config = RunConfig {
            worker_pool: 8,
            ..RunConfig::default()
        };
        assert_eq!(config.effective_workers(), 8);
    }
}
