//! Optimizer - the generational loop driving the whole run
//!
//! Owns the run lifecycle: seed, evaluate concurrently, reflect, rank,
//! reproduce, repeat until convergence or cancellation. All randomness flows
//! through one seeded RNG on this side of the gateway, so a fixed seed
//! against a deterministic evaluator replays byte-identically.

use std::sync::Arc;

use fastrand::Rng;
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;

use crate::candidate::{Candidate, FitnessVector, Population, Segment};
use crate::config::{Direction, RunConfig};
use crate::diversity::DiversityManager;
use crate::error::{GepaError, RunError};
use crate::evaluator::{EvalError, EvaluationSuite, EvaluatorGateway, ExecutionTrace};
use crate::operators::{elites, GeneticOperators};
use crate::pareto::{ParetoRanker, RankedPopulation};
use crate::reflector::{Insight, Reflector};
use crate::store::CandidateStore;

/// Cooperative cancellation handle. Cloneable; any clone can cancel and all
/// observers see it.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called, immediately if it already
    /// was. The sender lives as long as this token, so no signal is lost.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// The loop's phases, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Seeding,
    Evaluating,
    Reflecting,
    Ranking,
    Reproducing,
}

impl Phase {
    fn label(&self) -> &'static str {
        match self {
            Phase::Seeding => "seeding",
            Phase::Evaluating => "evaluating",
            Phase::Reflecting => "reflecting",
            Phase::Ranking => "ranking",
            Phase::Reproducing => "reproducing",
        }
    }
}

/// Why the run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Hard generation limit reached.
    MaxGenerations,
    /// Primary objective stopped improving for the stagnation window.
    Stagnation,
    /// Cancellation was requested and honored at a phase boundary.
    Cancelled,
}

/// One member of a returned Pareto front, self-contained for reporting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrontCandidate {
    pub id: usize,
    pub content: Vec<Segment>,
    pub rendered: String,
    pub fitness: FitnessVector,
}

impl PartialEq for FrontCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.content == other.content
    }
}

/// Outcome of a completed run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    /// Front 0 of the final generation, in selection order.
    pub front: Vec<FrontCandidate>,
    /// Generations fully ranked.
    pub generations: usize,
    /// Gateway calls issued over the whole run.
    pub total_evaluations: usize,
    pub reason: TerminationReason,
    /// Every candidate the run ever created, sorted by id. Lineage fields
    /// reconstruct the full ancestry graph.
    pub candidates: Vec<Candidate>,
}

/// Per-generation progress report, also emitted on the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub generation: usize,
    pub population_size: usize,
    pub front0_size: usize,
    /// Best observed value per objective, respecting direction.
    pub best: IndexMap<String, f64>,
    pub diversity: f64,
    pub injected: usize,
    pub eval_failures: usize,
}

pub type ProgressCallback = Box<dyn Fn(&GenerationSummary) + Send + Sync>;

struct EvalOutcome {
    traces: Vec<ExecutionTrace>,
    evaluated: usize,
    failures: usize,
    cancelled: bool,
}

/// Drives one optimization run against a pluggable evaluator gateway.
pub struct GepaOptimizer {
    config: RunConfig,
    gateway: Arc<dyn EvaluatorGateway>,
    suite: EvaluationSuite,
    cancel: CancelToken,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for GepaOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GepaOptimizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GepaOptimizer {
    /// Build an optimizer, rejecting invalid configurations before any
    /// evaluation happens.
    pub fn new(
        config: RunConfig,
        gateway: Arc<dyn EvaluatorGateway>,
        suite: EvaluationSuite,
    ) -> Result<Self, GepaError> {
        config.validate()?;
        Ok(Self {
            config,
            gateway,
            suite,
            cancel: CancelToken::new(),
            progress: None,
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the full loop. Seed templates are cycled (with unguided mutation)
    /// when fewer than the population size; at least one is required.
    pub async fn run(&self, seed_templates: &[Vec<Segment>]) -> Result<RunResult, RunError> {
        let mut rng = Rng::with_seed(self.config.rng_seed);
        let mut store = CandidateStore::new(self.config.objectives.clone());
        let ranker = ParetoRanker::new(self.config.objectives.clone());
        let operators = GeneticOperators::from_config(&self.config);
        let reflector = Reflector::new(self.config.min_insight_occurrences);
        let mut diversity = DiversityManager::new(
            self.config.diversity_floor,
            self.config.diversity_window,
            self.config.injection_fraction,
        );

        let mut next_id: usize = 0;
        let mut total_evaluations: usize = 0;
        let mut generations: usize = 0;
        let mut last_front: Vec<FrontCandidate> = Vec::new();
        let mut best_primary: Option<f64> = None;
        let mut stagnant: usize = 0;
        let mut pending_injections: usize = 0;

        if self.cancel.is_cancelled() {
            log::info!("run cancelled before seeding");
            return Ok(RunResult {
                front: Vec::new(),
                generations: 0,
                total_evaluations: 0,
                reason: TerminationReason::Cancelled,
                candidates: Vec::new(),
            });
        }

        log::debug!("phase: {}", Phase::Seeding.label());
        let mut population = self
            .seed_population(seed_templates, &operators, &mut rng, &mut next_id)
            .map_err(|e| RunError::new(e, Vec::new()))?;

        let reason = loop {
            log::debug!(
                "phase: {} (generation {})",
                Phase::Evaluating.label(),
                population.generation_number
            );
            let outcome = self
                .evaluate_population(&mut population)
                .await
                .map_err(|e| RunError::new(e, last_front.clone()))?;
            total_evaluations += outcome.evaluated;

            if outcome.cancelled {
                break TerminationReason::Cancelled;
            }

            store
                .record_population(&population)
                .map_err(|e| RunError::new(e, last_front.clone()))?;

            log::debug!("phase: {}", Phase::Reflecting.label());
            let insights = reflector.reflect(&outcome.traces, population.size());

            log::debug!("phase: {}", Phase::Ranking.label());
            let ranked = ranker
                .rank(&population.members)
                .map_err(|e| RunError::new(e, last_front.clone()))?;
            last_front = self.front_snapshot(&population, &ranked);
            generations += 1;

            let best = self.best_per_objective(&population);
            let diversity_score = DiversityManager::score(&population.members);
            let collapse = diversity.observe(diversity_score);

            self.update_stagnation(&best, &mut best_primary, &mut stagnant);

            let summary = GenerationSummary {
                generation: population.generation_number,
                population_size: population.size(),
                front0_size: ranked.front0().len(),
                best,
                diversity: diversity_score,
                injected: pending_injections,
                eval_failures: outcome.failures,
            };
            log::info!(
                "generation {}: front0={} diversity={:.3} failures={} best={:?}",
                summary.generation,
                summary.front0_size,
                summary.diversity,
                summary.eval_failures,
                summary.best
            );
            if let Some(callback) = &self.progress {
                callback(&summary);
            }

            if self.cancel.is_cancelled() {
                break TerminationReason::Cancelled;
            }
            if stagnant >= self.config.stagnation_window {
                break TerminationReason::Stagnation;
            }
            if generations >= self.config.max_generations {
                break TerminationReason::MaxGenerations;
            }

            log::debug!("phase: {}", Phase::Reproducing.label());
            let (next, injected) = self.reproduce(
                &population,
                &ranked,
                &insights,
                collapse,
                seed_templates,
                &operators,
                &diversity,
                &mut rng,
                &mut next_id,
            );
            pending_injections = injected;
            population = next;
        };

        log::info!(
            "run finished after {generations} generation(s): {reason:?}, {} candidate(s) total",
            store.len()
        );
        Ok(RunResult {
            front: last_front,
            generations,
            total_evaluations,
            reason,
            candidates: store.into_candidates(),
        })
    }

    fn seed_population(
        &self,
        templates: &[Vec<Segment>],
        operators: &GeneticOperators,
        rng: &mut Rng,
        next_id: &mut usize,
    ) -> Result<Population, GepaError> {
        if templates.is_empty() {
            return Err(GepaError::InvalidConfig(
                "at least one seed template is required".into(),
            ));
        }
        let mut members = Vec::with_capacity(self.config.population_size);
        for i in 0..self.config.population_size {
            let template = &templates[i % templates.len()];
            // Extra slots beyond the provided templates get an unguided
            // mutation so generation 0 is not all duplicates.
            let content = if i < templates.len() {
                template.clone()
            } else {
                operators.mutate_content(rng, template, &[])
            };
            members.push(Candidate::seed(*next_id, content));
            *next_id += 1;
        }
        Ok(Population::new(0, members))
    }

    /// Evaluate every unscored member concurrently, bounded by the worker
    /// pool. Failed calls absorb a sentinel worst fitness; only an
    /// evaluation storm or schema mismatch is fatal.
    async fn evaluate_population(
        &self,
        population: &mut Population,
    ) -> Result<EvalOutcome, GepaError> {
        let pending: Vec<usize> = population
            .members
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_evaluated())
            .map(|(idx, _)| idx)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.effective_workers()));
        let mut handles = Vec::with_capacity(pending.len());

        for &idx in &pending {
            let candidate_id = population.members[idx].id;
            let content = population.members[idx].content.clone();
            let suite = self.suite.clone();
            let gateway = Arc::clone(&self.gateway);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let deadline = self.config.eval_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.unwrap();
                tokio::select! {
                    result = timeout(deadline, gateway.evaluate(candidate_id, &content, &suite)) => {
                        match result {
                            Ok(inner) => inner,
                            Err(_) => Err(EvalError::Timeout),
                        }
                    }
                    _ = cancel.cancelled() => Err(EvalError::Cancelled),
                }
            }));
        }

        // Joining in spawn order keeps result handling deterministic even
        // though the tasks complete in any order.
        let results = join_all(handles).await;

        let mut traces = Vec::with_capacity(pending.len());
        let mut failures = 0usize;
        let evaluated = pending.len();

        for (&idx, joined) in pending.iter().zip(results) {
            let candidate_id = population.members[idx].id;
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(EvalError::Provider(format!("evaluation task failed: {e}"))),
            };
            match result {
                Ok((fitness, trace)) => {
                    if !fitness.matches_objectives(&self.config.objectives) {
                        return Err(GepaError::SchemaMismatch {
                            expected: self
                                .config
                                .objectives
                                .iter()
                                .map(|o| o.name.clone())
                                .collect(),
                            found: fitness.objective_names().map(str::to_string).collect(),
                        });
                    }
                    population.members[idx].attach_fitness(fitness);
                    traces.push(trace);
                }
                Err(e) => {
                    log::warn!("evaluation of candidate {candidate_id} failed: {e}");
                    failures += 1;
                    population.members[idx]
                        .attach_fitness(FitnessVector::worst(&self.config.objectives));
                    traces.push(ExecutionTrace::from_failure(candidate_id, &e));
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if !cancelled
            && evaluated > 0
            && failures as f64 / evaluated as f64 > self.config.storm_threshold
        {
            return Err(GepaError::EvaluationStorm {
                failed: failures,
                total: evaluated,
            });
        }

        Ok(EvalOutcome {
            traces,
            evaluated,
            failures,
            cancelled,
        })
    }

    fn front_snapshot(
        &self,
        population: &Population,
        ranked: &RankedPopulation,
    ) -> Vec<FrontCandidate> {
        ranked
            .front0()
            .iter()
            .filter_map(|&id| population.member(id))
            .map(|c| FrontCandidate {
                id: c.id,
                content: c.content.clone(),
                rendered: c.rendered(),
                fitness: c.fitness.clone().unwrap_or_else(|| {
                    FitnessVector::worst(&self.config.objectives)
                }),
            })
            .collect()
    }

    fn best_per_objective(&self, population: &Population) -> IndexMap<String, f64> {
        let mut best = IndexMap::new();
        for obj in &self.config.objectives {
            let value = population
                .members
                .iter()
                .filter_map(|c| c.fitness.as_ref())
                .map(|f| f.value_or_worst(obj))
                .fold(None::<f64>, |acc, v| {
                    Some(match (acc, obj.direction) {
                        (None, _) => v,
                        (Some(a), Direction::Maximize) => a.max(v),
                        (Some(a), Direction::Minimize) => a.min(v),
                    })
                });
            if let Some(v) = value {
                best.insert(obj.name.clone(), v);
            }
        }
        best
    }

    fn update_stagnation(
        &self,
        best: &IndexMap<String, f64>,
        best_primary: &mut Option<f64>,
        stagnant: &mut usize,
    ) {
        let primary = self.config.primary();
        let Some(&current) = best.get(&primary.name) else {
            *stagnant += 1;
            return;
        };
        match *best_primary {
            None => {
                *best_primary = Some(current);
                *stagnant = 0;
            }
            Some(previous) => {
                let improvement = match primary.direction {
                    Direction::Maximize => current - previous,
                    Direction::Minimize => previous - current,
                };
                if improvement > self.config.convergence_epsilon {
                    *best_primary = Some(current);
                    *stagnant = 0;
                } else {
                    if improvement > 0.0 {
                        *best_primary = Some(current);
                    }
                    *stagnant += 1;
                }
            }
        }
    }

    /// Build the next generation: elites survive unchanged, a diversity
    /// collapse claims offspring slots for fresh injections, tournaments
    /// fill the rest. Returns the population and the injection count.
    #[allow(clippy::too_many_arguments)]
    fn reproduce(
        &self,
        population: &Population,
        ranked: &RankedPopulation,
        insights: &[Insight],
        collapse: bool,
        seed_templates: &[Vec<Segment>],
        operators: &GeneticOperators,
        diversity: &DiversityManager,
        rng: &mut Rng,
        next_id: &mut usize,
    ) -> (Population, usize) {
        let next_generation = population.generation_number + 1;
        let elite_ids = elites(ranked, self.config.elitism_count);
        let mut members: Vec<Candidate> = elite_ids
            .iter()
            .filter_map(|&id| population.member(id))
            .cloned()
            .collect();

        let mut pool = ranked.selection_order();
        let mut injected = 0usize;
        if collapse {
            // Replacement slots come from the worst front, elites excluded.
            // The front is sorted by crowding descending, so the lowest-
            // crowding members sit at its tail.
            let eligible: Vec<usize> = ranked
                .worst_front()
                .iter()
                .copied()
                .filter(|id| !elite_ids.contains(id))
                .collect();
            if !eligible.is_empty() {
                injected =
                    diversity.injection_count(self.config.population_size, eligible.len());
                let replaced = &eligible[eligible.len() - injected..];
                pool.retain(|id| !replaced.contains(id));
                log::info!(
                    "injecting {injected} fresh candidate(s) into generation {next_generation}, replacing {replaced:?}"
                );
                for _ in 0..injected {
                    let template = &seed_templates[rng.usize(0..seed_templates.len())];
                    let content = operators.mutate_content(rng, template, &[]);
                    members.push(Candidate::injected(*next_id, next_generation, content));
                    *next_id += 1;
                }
            }
        }

        while members.len() < self.config.population_size {
            let a = operators.tournament(rng, &pool, ranked);
            let mut b = operators.tournament(rng, &pool, ranked);
            if b == a && pool.len() > 1 {
                b = operators.tournament(rng, &pool, ranked);
            }
            let parent_a = population
                .member(a)
                .expect("tournament winners come from the current population");
            let parent_b = population
                .member(b)
                .expect("tournament winners come from the current population");
            let child = operators.make_offspring(
                rng,
                *next_id,
                next_generation,
                parent_a,
                parent_b,
                ranked,
                insights,
            );
            *next_id += 1;
            members.push(child);
        }

        (Population::new(next_generation, members), injected)
    }
}
