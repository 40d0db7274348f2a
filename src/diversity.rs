//! Population diversity tracking and collapse detection
//!
//! Diversity is the mean pairwise normalized edit distance between rendered
//! candidates, measured on whitespace tokens. A run of consecutive
//! below-floor generations marks the population as collapsed, which the
//! optimizer answers by injecting fresh candidates.

use crate::candidate::Candidate;

pub struct DiversityManager {
    floor: f64,
    window: usize,
    max_fraction: f64,
    consecutive_low: usize,
}

impl DiversityManager {
    pub fn new(floor: f64, window: usize, max_fraction: f64) -> Self {
        Self {
            floor,
            window,
            max_fraction,
            consecutive_low: 0,
        }
    }

    /// Mean pairwise token-level Levenshtein distance, each pair normalized
    /// by its longer token count. 0.0 for populations too small to compare.
    pub fn score(members: &[Candidate]) -> f64 {
        if members.len() < 2 {
            return 0.0;
        }
        let rendered: Vec<String> = members.iter().map(|c| c.rendered()).collect();
        let tokenized: Vec<Vec<&str>> = rendered
            .iter()
            .map(|s| s.split_whitespace().collect())
            .collect();

        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..tokenized.len() {
            for j in (i + 1)..tokenized.len() {
                let longest = tokenized[i].len().max(tokenized[j].len());
                if longest == 0 {
                    pairs += 1;
                    continue;
                }
                let distance = strsim::generic_levenshtein(&tokenized[i], &tokenized[j]);
                total += distance as f64 / longest as f64;
                pairs += 1;
            }
        }
        total / pairs as f64
    }

    /// Record one generation's diversity score. Returns true when the score
    /// has stayed below the floor for the full window, then resets the
    /// counter so injection fires at most once per window.
    pub fn observe(&mut self, score: f64) -> bool {
        if score < self.floor {
            self.consecutive_low += 1;
            if self.consecutive_low >= self.window {
                log::warn!(
                    "diversity collapse: score {score:.4} below floor {:.4} for {} generation(s)",
                    self.floor,
                    self.consecutive_low
                );
                self.consecutive_low = 0;
                return true;
            }
        } else {
            self.consecutive_low = 0;
        }
        false
    }

    /// Number of fresh candidates to inject: at least one, at most the
    /// configured fraction of the population, never more than the eligible
    /// replacement slots.
    pub fn injection_count(&self, population_size: usize, eligible: usize) -> usize {
        let by_fraction = ((population_size as f64 * self.max_fraction).floor() as usize).max(1);
        by_fraction.min(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Segment;
    use pretty_assertions::assert_eq;

    fn candidate(id: usize, text: &str) -> Candidate {
        Candidate::seed(id, vec![Segment::text(text)])
    }

    #[test]
    fn test_identical_population_scores_zero() {
        let members = vec![
            candidate(0, "answer the question"),
            candidate(1, "answer the question"),
            candidate(2, "answer the question"),
        ];
        assert_eq!(DiversityManager::score(&members), 0.0);
    }

    #[test]
    fn test_disjoint_population_scores_one() {
        let members = vec![candidate(0, "alpha beta gamma"), candidate(1, "delta epsilon zeta")];
        assert_eq!(DiversityManager::score(&members), 1.0);
    }

    #[test]
    fn test_singleton_population_scores_zero() {
        let members = vec![candidate(0, "alone")];
        assert_eq!(DiversityManager::score(&members), 0.0);
    }

    #[test]
    fn test_partial_overlap_is_between_zero_and_one() {
        let members = vec![
            candidate(0, "answer the question briefly"),
            candidate(1, "answer the question in detail"),
        ];
        let score = DiversityManager::score(&members);
        assert!(score > 0.0 && score < 1.0, "got {score}");
    }

    #[test]
    fn test_collapse_requires_full_window() {
        let mut manager = DiversityManager::new(0.1, 3, 0.2);
        assert!(!manager.observe(0.05));
        assert!(!manager.observe(0.05));
        assert!(manager.observe(0.05));
        // Counter resets after triggering.
        assert!(!manager.observe(0.05));
    }

    #[test]
    fn test_recovery_resets_counter() {
        let mut manager = DiversityManager::new(0.1, 2, 0.2);
        assert!(!manager.observe(0.05));
        assert!(!manager.observe(0.5));
        assert!(!manager.observe(0.05));
        assert!(manager.observe(0.05));
    }

    #[test]
    fn test_injection_count_bounds() {
        let manager = DiversityManager::new(0.1, 3, 0.2);
        // floor(16 * 0.2) = 3
        assert_eq!(manager.injection_count(16, 10), 3);
        // At least one even for tiny populations.
        assert_eq!(manager.injection_count(4, 10), 1);
        // Capped by eligible slots.
        assert_eq!(manager.injection_count(16, 2), 2);
    }
}
