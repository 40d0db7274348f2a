//! Candidate store - in-memory registry of every candidate in a run
//!
//! Pure data structure: id-keyed puts and gets plus generation listing.
//! The optimizer is the sole writer, once per generation boundary, so no
//! locking is needed; readers work on snapshots handed to them.

use indexmap::IndexMap;

use crate::candidate::{Candidate, Population};
use crate::config::Objective;
use crate::error::GepaError;

/// Registry of candidates keyed by id. Enforces id uniqueness and rejects
/// fitness vectors whose objective set conflicts with the run's schema.
#[derive(Clone, Debug)]
pub struct CandidateStore {
    candidates: IndexMap<usize, Candidate>,
    objectives: Vec<Objective>,
}

impl CandidateStore {
    pub fn new(objectives: Vec<Objective>) -> Self {
        Self {
            candidates: IndexMap::new(),
            objectives,
        }
    }

    /// Insert a candidate, or update it in place when the id already holds
    /// the same candidate (fitness attachment, re-evaluation).
    ///
    /// Fails with `SchemaMismatch` when an attached fitness vector scores a
    /// different objective set than the run declared, and with
    /// `DuplicateCandidate` when the id is already taken by a candidate
    /// with different content or lineage.
    pub fn put(&mut self, candidate: Candidate) -> Result<(), GepaError> {
        self.check_schema(&candidate)?;

        if let Some(existing) = self.candidates.get(&candidate.id) {
            if existing.content != candidate.content || existing.lineage != candidate.lineage {
                return Err(GepaError::DuplicateCandidate(candidate.id));
            }
        }

        self.candidates.insert(candidate.id, candidate);
        Ok(())
    }

    pub fn get(&self, id: usize) -> Option<&Candidate> {
        self.candidates.get(&id)
    }

    /// Candidates created in generation `n`, sorted by id.
    pub fn list_generation(&self, n: usize) -> Vec<&Candidate> {
        let mut members: Vec<&Candidate> = self
            .candidates
            .values()
            .filter(|c| c.generation == n)
            .collect();
        members.sort_by_key(|c| c.id);
        members
    }

    /// Parent ids of a stored candidate.
    pub fn lineage_of(&self, id: usize) -> Option<&[usize]> {
        self.candidates.get(&id).map(|c| c.lineage.as_slice())
    }

    /// Write one generation's member set in a single all-or-nothing pass:
    /// every member is validated before any is stored.
    pub fn record_population(&mut self, population: &Population) -> Result<(), GepaError> {
        for member in &population.members {
            self.check_schema(member)?;
            if let Some(existing) = self.candidates.get(&member.id) {
                if existing.content != member.content || existing.lineage != member.lineage {
                    return Err(GepaError::DuplicateCandidate(member.id));
                }
            }
        }
        for member in &population.members {
            self.candidates.insert(member.id, member.clone());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// All candidates ever stored, sorted by id.
    pub fn into_candidates(self) -> Vec<Candidate> {
        let mut all: Vec<Candidate> = self.candidates.into_values().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    fn check_schema(&self, candidate: &Candidate) -> Result<(), GepaError> {
        let Some(fitness) = &candidate.fitness else {
            return Ok(());
        };
        if fitness.matches_objectives(&self.objectives) {
            return Ok(());
        }
        Err(GepaError::SchemaMismatch {
            expected: self.objectives.iter().map(|o| o.name.clone()).collect(),
            found: fitness.objective_names().map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{FitnessVector, Segment};
    use pretty_assertions::assert_eq;

    fn store() -> CandidateStore {
        CandidateStore::new(vec![Objective::maximize("accuracy")])
    }

    fn candidate(id: usize, text: &str) -> Candidate {
        Candidate::seed(id, vec![Segment::text(text)])
    }

    #[test]
    fn test_put_and_get() {
        let mut store = store();
        store.put(candidate(0, "hello")).unwrap();

        assert_eq!(store.get(0).unwrap().rendered(), "hello");
        assert!(store.get(1).is_none());
    }

    #[test]
    fn test_list_generation_sorted_by_id() {
        let mut store = store();
        store.put(candidate(2, "b")).unwrap();
        store.put(candidate(0, "a")).unwrap();

        let gen0: Vec<usize> = store.list_generation(0).iter().map(|c| c.id).collect();
        assert_eq!(gen0, vec![0, 2]);
        assert!(store.list_generation(1).is_empty());
    }

    #[test]
    fn test_fitness_update_is_allowed() {
        let mut store = store();
        let mut cand = candidate(0, "hello");
        store.put(cand.clone()).unwrap();

        cand.attach_fitness(FitnessVector::new().with("accuracy", 0.8));
        store.put(cand).unwrap();

        assert_eq!(store.get(0).unwrap().fitness.as_ref().unwrap().get("accuracy"), Some(0.8));
    }

    #[test]
    fn test_conflicting_objective_set_is_rejected() {
        let mut store = store();
        let mut cand = candidate(0, "hello");
        cand.attach_fitness(FitnessVector::new().with("latency", 12.0));

        assert!(matches!(
            store.put(cand),
            Err(GepaError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicate_id_with_different_content_is_rejected() {
        let mut store = store();
        store.put(candidate(0, "hello")).unwrap();

        assert_eq!(
            store.put(candidate(0, "other")),
            Err(GepaError::DuplicateCandidate(0))
        );
    }

    #[test]
    fn test_record_population_is_all_or_nothing() {
        let mut store = store();
        let mut bad = candidate(1, "bad");
        bad.attach_fitness(FitnessVector::new().with("latency", 1.0));

        let population = Population::new(0, vec![candidate(0, "good"), bad]);
        assert!(store.record_population(&population).is_err());
        assert!(store.is_empty());
    }
}
