//! Pareto ranker - non-dominated sorting and crowding distance
//!
//! Partitions an evaluated population into ranked fronts (front 0 is
//! non-dominated, front 1 is dominated only by front 0, and so on) and
//! scores each member's isolation within its front. The result is a total
//! selection order: lower front first, then higher crowding distance, then
//! lower id for determinism.

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, FitnessVector};
use crate::config::{Direction, Objective};
use crate::error::GepaError;

/// Rank assigned to one candidate: its front and crowding distance.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub id: usize,
    pub front: usize,
    pub crowding: f64,
}

/// The ranked view of one generation. Derived state: always recomputed
/// from the population's fitness vectors, never persisted.
#[derive(Clone, Debug)]
pub struct RankedPopulation {
    /// Candidate ids per front, each front sorted by crowding distance
    /// descending, then id ascending.
    fronts: Vec<Vec<usize>>,
    ranks: IndexMap<usize, RankedCandidate>,
}

impl RankedPopulation {
    pub fn fronts(&self) -> &[Vec<usize>] {
        &self.fronts
    }

    pub fn front0(&self) -> &[usize] {
        &self.fronts[0]
    }

    pub fn worst_front(&self) -> &[usize] {
        self.fronts.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rank_of(&self, id: usize) -> Option<RankedCandidate> {
        self.ranks.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Compare two ranked candidates for selection: lower front wins, then
    /// higher crowding distance, then lower id.
    pub fn compare(&self, a: usize, b: usize) -> Ordering {
        let (ra, rb) = match (self.ranks.get(&a), self.ranks.get(&b)) {
            (Some(ra), Some(rb)) => (ra, rb),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => return a.cmp(&b),
        };
        ra.front
            .cmp(&rb.front)
            .then_with(|| {
                rb.crowding
                    .partial_cmp(&ra.crowding)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.cmp(&b))
    }

    /// All ids in selection order (best first).
    pub fn selection_order(&self) -> Vec<usize> {
        self.fronts.iter().flatten().copied().collect()
    }
}

/// Computes ranked fronts over a population's fitness vectors.
pub struct ParetoRanker {
    objectives: Vec<Objective>,
}

impl ParetoRanker {
    pub fn new(objectives: Vec<Objective>) -> Self {
        Self { objectives }
    }

    /// Check if fitness vector `a` dominates `b`: at least as good on all
    /// objectives (respecting direction) and strictly better on one.
    pub fn dominates(&self, a: &FitnessVector, b: &FitnessVector) -> bool {
        let mut better_on_any = false;

        for obj in &self.objectives {
            let a_val = a.value_or_worst(obj);
            let b_val = b.value_or_worst(obj);

            let (a_better, b_better) = match obj.direction {
                Direction::Maximize => (a_val > b_val, b_val > a_val),
                Direction::Minimize => (a_val < b_val, b_val < a_val),
            };

            if b_better {
                return false;
            }
            if a_better {
                better_on_any = true;
            }
        }

        better_on_any
    }

    /// Rank the population into fronts with crowding distances. Every input
    /// candidate lands in exactly one front; candidates without a fitness
    /// vector rank as the sentinel worst.
    pub fn rank(&self, members: &[Candidate]) -> Result<RankedPopulation, GepaError> {
        if members.is_empty() {
            return Err(GepaError::EmptyPopulation);
        }

        let fitness: Vec<FitnessVector> = members
            .iter()
            .map(|c| {
                c.fitness
                    .clone()
                    .unwrap_or_else(|| FitnessVector::worst(&self.objectives))
            })
            .collect();

        let mut remaining: Vec<usize> = (0..members.len()).collect();
        let mut fronts: Vec<Vec<usize>> = Vec::new();
        let mut ranks: IndexMap<usize, RankedCandidate> = IndexMap::new();
        let mut front_number = 0;

        while !remaining.is_empty() {
            let mut non_dominated: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| {
                    !remaining
                        .iter()
                        .any(|&j| j != i && self.dominates(&fitness[j], &fitness[i]))
                })
                .collect();

            if non_dominated.is_empty() {
                // Dominance is a strict partial order, so this cannot
                // happen for finite input; guard against NaN scores anyway.
                log::warn!(
                    "no non-dominated members among remaining {}; closing final front",
                    remaining.len()
                );
                non_dominated = remaining.clone();
            }

            let crowding = self.crowding_distances(&non_dominated, &fitness);

            let mut front: Vec<usize> = non_dominated
                .iter()
                .map(|&i| members[i].id)
                .collect();
            for (slot, &i) in non_dominated.iter().enumerate() {
                ranks.insert(
                    members[i].id,
                    RankedCandidate {
                        id: members[i].id,
                        front: front_number,
                        crowding: crowding[slot],
                    },
                );
            }

            front.sort_by(|&a, &b| {
                let (ra, rb) = (ranks[&a], ranks[&b]);
                rb.crowding
                    .partial_cmp(&ra.crowding)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.cmp(&b))
            });

            remaining.retain(|i| !non_dominated.contains(i));
            fronts.push(front);
            front_number += 1;
        }

        Ok(RankedPopulation { fronts, ranks })
    }

    /// Crowding distance within one front: per objective, sort members by
    /// value, give boundaries infinite distance, and accumulate normalized
    /// gaps to neighbors for the interior.
    fn crowding_distances(&self, front: &[usize], fitness: &[FitnessVector]) -> Vec<f64> {
        let len = front.len();
        let mut crowding = vec![0.0_f64; len];
        if len <= 2 {
            return vec![f64::INFINITY; len];
        }

        for obj in &self.objectives {
            let mut order: Vec<usize> = (0..len).collect();
            order.sort_by(|&x, &y| {
                let vx = fitness[front[x]].value_or_worst(obj);
                let vy = fitness[front[y]].value_or_worst(obj);
                vx.partial_cmp(&vy)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| front[x].cmp(&front[y]))
            });

            crowding[order[0]] = f64::INFINITY;
            crowding[order[len - 1]] = f64::INFINITY;

            let min = fitness[front[order[0]]].value_or_worst(obj);
            let max = fitness[front[order[len - 1]]].value_or_worst(obj);
            let range = max - min;
            if !(range > 0.0) || !range.is_finite() {
                continue;
            }

            for slot in 1..len - 1 {
                let prev = fitness[front[order[slot - 1]]].value_or_worst(obj);
                let next = fitness[front[order[slot + 1]]].value_or_worst(obj);
                crowding[order[slot]] += (next - prev) / range;
            }
        }

        crowding
    }
}
