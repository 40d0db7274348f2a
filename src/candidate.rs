//! Candidate data structures for prompt optimization
//!
//! A candidate is an immutable version of a prompt template: an ordered
//! sequence of text and variable-slot segments, plus lineage and (once
//! evaluated) a fitness vector. A changed candidate is always a new
//! candidate with a new id; nothing edits content in place.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{Direction, Objective};

/// One segment of a prompt template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    /// Literal prompt text.
    Text(String),
    /// A named variable slot filled in by the caller at render time.
    Variable(String),
}

impl Segment {
    pub fn text(s: impl Into<String>) -> Self {
        Segment::Text(s.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Segment::Variable(name.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Segment::Text(_))
    }
}

/// Render segments into the flat prompt text handed to the evaluator.
/// Variable slots render in template syntax, e.g. `{{input}}`.
pub fn render(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Variable(name) => {
                out.push_str("{{");
                out.push_str(name);
                out.push_str("}}");
            }
        }
    }
    out
}

/// Per-candidate scores across all declared objectives.
///
/// Keys keep insertion order so serialized runs are byte-stable under a
/// fixed seed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessVector {
    scores: IndexMap<String, f64>,
}

impl FitnessVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, objective: impl Into<String>, value: f64) {
        self.scores.insert(objective.into(), value);
    }

    pub fn with(mut self, objective: impl Into<String>, value: f64) -> Self {
        self.insert(objective, value);
        self
    }

    pub fn get(&self, objective: &str) -> Option<f64> {
        self.scores.get(objective).copied()
    }

    /// The objective value, or the worst possible value for the objective's
    /// direction when the score is missing.
    pub fn value_or_worst(&self, objective: &Objective) -> f64 {
        self.get(&objective.name).unwrap_or(match objective.direction {
            Direction::Maximize => f64::NEG_INFINITY,
            Direction::Minimize => f64::INFINITY,
        })
    }

    pub fn objective_names(&self) -> impl Iterator<Item = &str> {
        self.scores.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Sentinel vector dominated by every successfully evaluated candidate:
    /// negative infinity on maximize objectives, positive on minimize.
    pub fn worst(objectives: &[Objective]) -> Self {
        let mut fitness = Self::new();
        for obj in objectives {
            let value = match obj.direction {
                Direction::Maximize => f64::NEG_INFINITY,
                Direction::Minimize => f64::INFINITY,
            };
            fitness.insert(obj.name.clone(), value);
        }
        fitness
    }

    /// True when this vector scores exactly the declared objective set.
    pub fn matches_objectives(&self, objectives: &[Objective]) -> bool {
        if self.scores.len() != objectives.len() {
            return false;
        }
        objectives
            .iter()
            .all(|obj| self.scores.contains_key(&obj.name))
    }
}

/// How a candidate came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Seed initialization.
    Seed,
    /// Spliced from two parents.
    Crossover,
    /// Text-transform of a single source.
    Mutation,
    /// Unmodified copy of a single parent.
    Clone,
    /// Fresh candidate injected after diversity collapse.
    Injected,
}

/// A prompt candidate. Immutable after creation apart from the one-time
/// fitness attachment once evaluation completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique identifier, assigned sequentially by the optimizer.
    pub id: usize,
    /// Ordered prompt segments.
    pub content: Vec<Segment>,
    /// Generation this candidate was created in.
    pub generation: usize,
    /// Parent ids (empty for seeds and injected candidates, one for clones
    /// and mutations, two for crossover offspring).
    pub lineage: Vec<usize>,
    /// How this candidate was created.
    pub origin: Origin,
    /// Scores from evaluation (None until evaluated).
    pub fitness: Option<FitnessVector>,
}

impl Candidate {
    /// A generation-0 seed with no parents.
    pub fn seed(id: usize, content: Vec<Segment>) -> Self {
        Self {
            id,
            content,
            generation: 0,
            lineage: vec![],
            origin: Origin::Seed,
            fitness: None,
        }
    }

    /// An offspring produced by the genetic operators.
    pub fn offspring(
        id: usize,
        generation: usize,
        content: Vec<Segment>,
        lineage: Vec<usize>,
        origin: Origin,
    ) -> Self {
        debug_assert!(lineage.len() <= 2);
        Self {
            id,
            content,
            generation,
            lineage,
            origin,
            fitness: None,
        }
    }

    /// A fresh candidate injected to recover diversity. No lineage: it is
    /// not descended from the collapsed population.
    pub fn injected(id: usize, generation: usize, content: Vec<Segment>) -> Self {
        Self {
            id,
            content,
            generation,
            lineage: vec![],
            origin: Origin::Injected,
            fitness: None,
        }
    }

    pub fn rendered(&self) -> String {
        render(&self.content)
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }

    /// Attach (or, for a re-evaluated candidate, replace) the fitness
    /// vector. Identity is unchanged; the latest score wins.
    pub fn attach_fitness(&mut self, fitness: FitnessVector) {
        self.fitness = Some(fitness);
    }
}

/// The authoritative unit of evolution: one generation's member set.
///
/// The optimizer owns the single mutable handle and replaces the whole
/// value at generation boundaries; every other component reads an
/// immutable snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Population {
    pub generation_number: usize,
    pub members: Vec<Candidate>,
}

impl Population {
    pub fn new(generation_number: usize, members: Vec<Candidate>) -> Self {
        Self {
            generation_number,
            members,
        }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn member(&self, id: usize) -> Option<&Candidate> {
        self.members.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_mixes_text_and_variables() {
        let content = vec![
            Segment::text("Classify the sentiment of "),
            Segment::variable("input"),
            Segment::text(" as positive or negative."),
        ];
        assert_eq!(
            render(&content),
            "Classify the sentiment of {{input}} as positive or negative."
        );
    }

    #[test]
    fn test_worst_fitness_is_dominated_sentinel() {
        let objectives = vec![Objective::maximize("accuracy"), Objective::minimize("cost")];
        let worst = FitnessVector::worst(&objectives);

        assert_eq!(worst.get("accuracy"), Some(f64::NEG_INFINITY));
        assert_eq!(worst.get("cost"), Some(f64::INFINITY));
    }

    #[test]
    fn test_matches_objectives() {
        let objectives = vec![Objective::maximize("accuracy"), Objective::minimize("cost")];

        let ok = FitnessVector::new().with("cost", 3.0).with("accuracy", 0.9);
        assert!(ok.matches_objectives(&objectives));

        let missing = FitnessVector::new().with("accuracy", 0.9);
        assert!(!missing.matches_objectives(&objectives));

        let renamed = FitnessVector::new().with("accuracy", 0.9).with("tokens", 3.0);
        assert!(!renamed.matches_objectives(&objectives));
    }

    #[test]
    fn test_seed_has_no_lineage() {
        let seed = Candidate::seed(0, vec![Segment::text("prompt")]);
        assert!(seed.lineage.is_empty());
        assert_eq!(seed.generation, 0);
        assert_eq!(seed.origin, Origin::Seed);
        assert!(!seed.is_evaluated());
    }
}
