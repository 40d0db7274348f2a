//! Genetic operators - tournament selection, crossover, and guided mutation
//!
//! All operators draw randomness from a single caller-owned RNG so a fixed
//! seed replays the exact same lineage. Mutation guarantees the edited
//! content differs from its input; a no-op edit falls back to appending a
//! constraint segment.

use fastrand::Rng;
use serde::{Deserialize, Serialize};

use crate::candidate::{render, Candidate, Origin, Segment};
use crate::config::RunConfig;
use crate::pareto::RankedPopulation;
use crate::reflector::Insight;

/// Closed set of edits the mutation operator can apply. Adding a variant
/// means adding a handler below; there is no free-form rewriting path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditKind {
    Rephrase,
    AddConstraint,
    RemoveSection,
    AddExample,
    Reorder,
}

impl EditKind {
    pub const ALL: [EditKind; 5] = [
        EditKind::Rephrase,
        EditKind::AddConstraint,
        EditKind::RemoveSection,
        EditKind::AddExample,
        EditKind::Reorder,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            EditKind::Rephrase => "rephrase",
            EditKind::AddConstraint => "add-constraint",
            EditKind::RemoveSection => "remove-section",
            EditKind::AddExample => "add-example",
            EditKind::Reorder => "reorder",
        }
    }
}

const REPHRASINGS: &[(&str, &str)] = &[
    ("You are", "Act as"),
    ("Please", "You must"),
    ("should", "must"),
    ("Answer", "Respond to"),
    ("Provide", "Return"),
    ("Describe", "Explain"),
];

const CONSTRAINT_TEMPLATES: &[&str] = &[
    " Respond with valid JSON only.",
    " Keep the answer under three sentences.",
    " Do not include any explanation outside the requested output.",
    " Follow the requested structure exactly.",
];

const EXAMPLE_TEMPLATES: &[&str] = &[
    " For example, given \"2 + 2\" the correct answer is \"4\".",
    " For example, an empty input should yield an empty result.",
    " For example, restate the key fact from the input before answering.",
];

/// Stateless operator bundle; rates come from the run configuration.
pub struct GeneticOperators {
    crossover_rate: f64,
    mutation_rate: f64,
    tournament_size: usize,
}

impl GeneticOperators {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            crossover_rate: config.crossover_rate,
            mutation_rate: config.mutation_rate,
            tournament_size: config.tournament_size,
        }
    }

    /// Binary (or t-ary) tournament over the selection pool, sampling with
    /// replacement. The winner is the best entrant under Pareto order.
    pub fn tournament(&self, rng: &mut Rng, pool: &[usize], ranked: &RankedPopulation) -> usize {
        debug_assert!(!pool.is_empty());
        let mut best = pool[rng.usize(0..pool.len())];
        for _ in 1..self.tournament_size {
            let entrant = pool[rng.usize(0..pool.len())];
            if ranked.compare(entrant, best) == std::cmp::Ordering::Less {
                best = entrant;
            }
        }
        best
    }

    /// Produce one offspring from two tournament winners: crossover with the
    /// configured probability, otherwise a clone of the fitter parent, then a
    /// mutation pass with the configured probability.
    pub fn make_offspring(
        &self,
        rng: &mut Rng,
        id: usize,
        generation: usize,
        a: &Candidate,
        b: &Candidate,
        ranked: &RankedPopulation,
        insights: &[Insight],
    ) -> Candidate {
        let (mut content, mut lineage, mut origin) = if rng.f64() < self.crossover_rate {
            match self.crossover(rng, &a.content, &b.content) {
                Some(child) => (child, vec![a.id, b.id], Origin::Crossover),
                None => {
                    // Either parent is too short to cut; fall back to the
                    // fitter parent's content.
                    let winner = if ranked.compare(a.id, b.id) == std::cmp::Ordering::Less {
                        a
                    } else {
                        b
                    };
                    (winner.content.clone(), vec![winner.id], Origin::Clone)
                }
            }
        } else {
            let winner = if ranked.compare(a.id, b.id) == std::cmp::Ordering::Less {
                a
            } else {
                b
            };
            (winner.content.clone(), vec![winner.id], Origin::Clone)
        };

        if rng.f64() < self.mutation_rate {
            content = self.mutate_content(rng, &content, insights);
            if origin == Origin::Clone {
                origin = Origin::Mutation;
                lineage.truncate(1);
            }
        }

        Candidate::offspring(id, generation, content, lineage, origin)
    }

    /// Single-point crossover at independent cut points in each parent.
    /// Returns None when either parent has fewer than two segments.
    fn crossover(
        &self,
        rng: &mut Rng,
        a: &[Segment],
        b: &[Segment],
    ) -> Option<Vec<Segment>> {
        if a.len() < 2 || b.len() < 2 {
            return None;
        }
        let cut_a = rng.usize(1..a.len());
        let cut_b = rng.usize(1..b.len());
        let mut child = a[..cut_a].to_vec();
        child.extend_from_slice(&b[cut_b..]);
        Some(child)
    }

    /// Apply one edit to the content. Insight-derived weighting biases the
    /// edit kind choice; the result is guaranteed to differ from the input.
    pub fn mutate_content(
        &self,
        rng: &mut Rng,
        content: &[Segment],
        insights: &[Insight],
    ) -> Vec<Segment> {
        let kind = self.choose_edit_kind(rng, insights);
        let mutated = self.apply_edit(rng, content, kind);
        if mutated == content {
            // Closure guarantee: a no-op edit still has to change something.
            self.append_constraint(rng, content)
        } else {
            mutated
        }
    }

    /// Weighted sample over edit kinds: every kind has base weight 1.0, and
    /// each insight adds 4.0 * confidence to its suggested kind.
    fn choose_edit_kind(&self, rng: &mut Rng, insights: &[Insight]) -> EditKind {
        let mut weights = [1.0f64; EditKind::ALL.len()];
        for insight in insights {
            let idx = EditKind::ALL
                .iter()
                .position(|k| *k == insight.edit_kind)
                .unwrap_or(0);
            weights[idx] += 4.0 * insight.confidence;
        }
        let total: f64 = weights.iter().sum();
        let mut roll = rng.f64() * total;
        for (idx, weight) in weights.iter().enumerate() {
            if roll < *weight {
                return EditKind::ALL[idx];
            }
            roll -= weight;
        }
        EditKind::ALL[EditKind::ALL.len() - 1]
    }

    fn apply_edit(&self, rng: &mut Rng, content: &[Segment], kind: EditKind) -> Vec<Segment> {
        match kind {
            EditKind::Rephrase => self.rephrase(rng, content),
            EditKind::AddConstraint => self.append_constraint(rng, content),
            EditKind::AddExample => self.append_example(rng, content),
            EditKind::RemoveSection => self.remove_section(rng, content),
            EditKind::Reorder => self.reorder(rng, content),
        }
    }

    fn rephrase(&self, rng: &mut Rng, content: &[Segment]) -> Vec<Segment> {
        let mut out = content.to_vec();
        let start = rng.usize(0..REPHRASINGS.len());
        for offset in 0..REPHRASINGS.len() {
            let (from, to) = REPHRASINGS[(start + offset) % REPHRASINGS.len()];
            for segment in out.iter_mut() {
                if let Segment::Text(text) = segment {
                    if text.contains(from) {
                        *text = text.replacen(from, to, 1);
                        return out;
                    }
                }
            }
        }
        // No rephrasable phrase present; prepend a framing clause instead.
        for segment in out.iter_mut() {
            if let Segment::Text(text) = segment {
                *text = format!("To be precise, {text}");
                return out;
            }
        }
        out
    }

    fn append_constraint(&self, rng: &mut Rng, content: &[Segment]) -> Vec<Segment> {
        let mut out = content.to_vec();
        let rendered = render(content);
        let start = rng.usize(0..CONSTRAINT_TEMPLATES.len());
        for offset in 0..CONSTRAINT_TEMPLATES.len() {
            let template = CONSTRAINT_TEMPLATES[(start + offset) % CONSTRAINT_TEMPLATES.len()];
            if !rendered.contains(template.trim()) {
                out.push(Segment::text(template));
                return out;
            }
        }
        // Every template already present; duplicate one so the edit still
        // changes the content.
        out.push(Segment::text(CONSTRAINT_TEMPLATES[start]));
        out
    }

    fn append_example(&self, rng: &mut Rng, content: &[Segment]) -> Vec<Segment> {
        let mut out = content.to_vec();
        let rendered = render(content);
        let start = rng.usize(0..EXAMPLE_TEMPLATES.len());
        for offset in 0..EXAMPLE_TEMPLATES.len() {
            let template = EXAMPLE_TEMPLATES[(start + offset) % EXAMPLE_TEMPLATES.len()];
            if !rendered.contains(template.trim()) {
                out.push(Segment::text(template));
                return out;
            }
        }
        out.push(Segment::text(EXAMPLE_TEMPLATES[start]));
        out
    }

    /// Remove the shortest text segment. Variables are never removed, and a
    /// template too small to shrink degrades to a constraint append.
    fn remove_section(&self, rng: &mut Rng, content: &[Segment]) -> Vec<Segment> {
        if content.len() < 2 {
            return self.append_constraint(rng, content);
        }
        let victim = content
            .iter()
            .enumerate()
            .filter_map(|(idx, seg)| match seg {
                Segment::Text(text) => Some((idx, text.len())),
                Segment::Variable(_) => None,
            })
            .min_by_key(|(_, len)| *len)
            .map(|(idx, _)| idx);

        match victim {
            Some(idx) => {
                let mut out = content.to_vec();
                out.remove(idx);
                out
            }
            None => self.append_constraint(rng, content),
        }
    }

    /// Swap two distinct segments. Degrades when the template has fewer than
    /// two segments or the swap would be invisible.
    fn reorder(&self, rng: &mut Rng, content: &[Segment]) -> Vec<Segment> {
        if content.len() < 2 {
            return self.append_constraint(rng, content);
        }
        let i = rng.usize(0..content.len());
        let mut j = rng.usize(0..content.len());
        if i == j {
            j = (j + 1) % content.len();
        }
        if content[i] == content[j] {
            return self.append_constraint(rng, content);
        }
        let mut out = content.to_vec();
        out.swap(i, j);
        out
    }
}

/// The top `count` ids in Pareto selection order. Elite candidates survive
/// unchanged and keep their fitness.
pub fn elites(ranked: &RankedPopulation, count: usize) -> Vec<usize> {
    ranked.selection_order().into_iter().take(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::FitnessVector;
    use crate::config::Objective;
    use crate::pareto::ParetoRanker;
    use pretty_assertions::assert_eq;

    fn config() -> RunConfig {
        RunConfig {
            crossover_rate: 0.7,
            mutation_rate: 0.3,
            tournament_size: 2,
            ..RunConfig::default()
        }
    }

    fn scored(id: usize, score: f64) -> Candidate {
        let mut c = Candidate::seed(id, vec![Segment::text(format!("prompt {id}")), Segment::variable("input")]);
        c.attach_fitness(FitnessVector::new().with("score", score));
        c
    }

    fn ranked(candidates: &[Candidate]) -> RankedPopulation {
        ParetoRanker::new(vec![Objective::maximize("score")])
            .rank(candidates)
            .unwrap()
    }

    #[test]
    fn test_tournament_prefers_better_front() {
        let pop = vec![scored(0, 0.9), scored(1, 0.1)];
        let ranked = ranked(&pop);
        let ops = GeneticOperators::from_config(&config());
        let mut rng = Rng::with_seed(7);
        // Candidate 0 dominates, so it wins every tournament it enters;
        // candidate 1 only wins when both draws pick it (probability 1/4).
        let wins = (0..200)
            .filter(|_| ops.tournament(&mut rng, &[0, 1], &ranked) == 0)
            .count();
        assert!(wins > 100, "dominant candidate won only {wins}/200");
    }

    #[test]
    fn test_mutation_always_changes_content() {
        let ops = GeneticOperators::from_config(&config());
        let content = vec![Segment::text("Answer the question."), Segment::variable("q")];
        for seed in 0..200 {
            let mut rng = Rng::with_seed(seed);
            let mutated = ops.mutate_content(&mut rng, &content, &[]);
            assert_ne!(mutated, content, "seed {seed} produced a no-op edit");
        }
    }

    #[test]
    fn test_mutation_changes_single_segment_template() {
        let ops = GeneticOperators::from_config(&config());
        let content = vec![Segment::text("x")];
        for seed in 0..100 {
            let mut rng = Rng::with_seed(seed);
            let mutated = ops.mutate_content(&mut rng, &content, &[]);
            assert_ne!(mutated, content);
        }
    }

    #[test]
    fn test_crossover_degrades_to_clone_for_short_parents() {
        let pop = vec![scored(0, 0.9), scored(1, 0.1)];
        let ranked = ranked(&pop);
        let ops = GeneticOperators {
            crossover_rate: 1.0,
            mutation_rate: 0.0,
            tournament_size: 2,
        };
        let mut rng = Rng::with_seed(3);
        let a = Candidate::seed(0, vec![Segment::text("solo")]);
        let b = scored(1, 0.1);
        let child = ops.make_offspring(&mut rng, 10, 1, &a, &b, &ranked, &[]);
        assert_eq!(child.origin, Origin::Clone);
        assert_eq!(child.lineage.len(), 1);
    }

    #[test]
    fn test_crossover_child_mixes_parents() {
        let pop = vec![scored(0, 0.5), scored(1, 0.5)];
        let ranked = ranked(&pop);
        let ops = GeneticOperators {
            crossover_rate: 1.0,
            mutation_rate: 0.0,
            tournament_size: 2,
        };
        let mut rng = Rng::with_seed(11);
        let a = &pop[0];
        let b = &pop[1];
        let child = ops.make_offspring(&mut rng, 10, 1, a, b, &ranked, &[]);
        assert_eq!(child.origin, Origin::Crossover);
        assert_eq!(child.lineage, vec![0, 1]);
        assert!(!child.content.is_empty());
        assert!(child.content.len() <= a.content.len() + b.content.len());
    }

    #[test]
    fn test_insight_weighting_biases_edit_choice() {
        let ops = GeneticOperators::from_config(&config());
        let insight = Insight {
            target_failure_pattern: "format/short".to_string(),
            edit_kind: EditKind::AddConstraint,
            confidence: 1.0,
            source_candidates: vec![0],
        };
        let mut with_insight = 0;
        let mut without = 0;
        for seed in 0..500 {
            let mut rng = Rng::with_seed(seed);
            if ops.choose_edit_kind(&mut rng, std::slice::from_ref(&insight))
                == EditKind::AddConstraint
            {
                with_insight += 1;
            }
            let mut rng = Rng::with_seed(seed);
            if ops.choose_edit_kind(&mut rng, &[]) == EditKind::AddConstraint {
                without += 1;
            }
        }
        assert!(with_insight > without);
    }

    #[test]
    fn test_remove_section_never_drops_variables() {
        let ops = GeneticOperators::from_config(&config());
        let content = vec![
            Segment::variable("input"),
            Segment::text("short"),
            Segment::text("a much longer instruction block"),
        ];
        let mut rng = Rng::with_seed(5);
        let out = ops.remove_section(&mut rng, &content);
        assert!(out.iter().any(|s| matches!(s, Segment::Variable(v) if v == "input")));
        assert_eq!(out.len(), 2);
    }
}
