//! Candidate scoring.
//!
//! The score is an additive sum of independently tunable terms; higher means
//! more urgent. Scoring is a pure function of the candidate and the weights.

use serde::{Deserialize, Serialize};

use crate::core::types::{Candidate, Scored, Tier};

/// Weights for each scoring term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Constant floor added to every score.
    pub floor: f64,
    /// Bonus per tier step above the least urgent tier.
    pub per_tier: f64,
    pub fully_specified: f64,
    pub foundational: f64,
    /// Bonus per task this candidate blocks.
    pub per_blocked: f64,
    /// Flat bonus when nothing blocks this candidate.
    pub unblocked: f64,
    /// Penalty per open blocker; heavier than `per_blocked`.
    pub per_blocker: f64,
    /// Penalty per unit of size estimate.
    pub per_size: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            floor: 100.0,
            per_tier: 20.0,
            fully_specified: 15.0,
            foundational: 25.0,
            per_blocked: 10.0,
            unblocked: 20.0,
            per_blocker: 30.0,
            per_size: 5.0,
        }
    }
}

/// Score one candidate.
pub fn score(candidate: &Candidate, weights: &ScoreWeights) -> f64 {
    let tier_steps = f64::from(Tier::COUNT - 1 - candidate.tier.ordinal());
    let mut total = weights.floor + weights.per_tier * tier_steps;
    if candidate.fully_specified {
        total += weights.fully_specified;
    }
    if candidate.foundational {
        total += weights.foundational;
    }
    total += weights.per_blocked * f64::from(candidate.blocks);
    if candidate.blocked_by == 0 {
        total += weights.unblocked;
    }
    total -= weights.per_blocker * f64::from(candidate.blocked_by);
    total -= weights.per_size * candidate.size.max(0.0);
    total
}

/// Score every candidate and sort by score descending.
///
/// The sort is stable, so equal scores keep the tracker's original order.
pub fn rank(candidates: Vec<Candidate>, weights: &ScoreWeights) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|candidate| {
            let score = score(&candidate, weights);
            Scored { candidate, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::candidate;

    #[test]
    fn urgent_unblocked_outranks_low_blocked() {
        let mut urgent = candidate("1");
        urgent.tier = Tier::Urgent;
        let mut low = candidate("2");
        low.tier = Tier::Low;
        low.blocked_by = 2;

        let ranked = rank(vec![low, urgent], &ScoreWeights::default());
        let ids: Vec<&str> = ranked.iter().map(|s| s.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn score_is_independent_of_call_order() {
        let weights = ScoreWeights::default();
        let mut a = candidate("a");
        a.blocks = 3;
        a.size = 2.0;
        let b = candidate("b");

        let first = (score(&a, &weights), score(&b, &weights));
        let second = (score(&b, &weights), score(&a, &weights));
        assert_eq!(first, (second.1, second.0));
        assert_eq!(score(&a, &weights), score(&a.clone(), &weights));
    }

    #[test]
    fn each_term_moves_the_score_in_its_direction() {
        let weights = ScoreWeights::default();
        let base = candidate("x");
        let base_score = score(&base, &weights);

        let mut specified = base.clone();
        specified.fully_specified = true;
        assert_eq!(score(&specified, &weights), base_score + weights.fully_specified);

        let mut foundational = base.clone();
        foundational.foundational = true;
        assert_eq!(score(&foundational, &weights), base_score + weights.foundational);

        let mut unblocking = base.clone();
        unblocking.blocks = 2;
        assert_eq!(score(&unblocking, &weights), base_score + 2.0 * weights.per_blocked);

        let mut blocked = base.clone();
        blocked.blocked_by = 1;
        assert_eq!(
            score(&blocked, &weights),
            base_score - weights.unblocked - weights.per_blocker
        );

        let mut large = base.clone();
        large.size = 3.0;
        assert_eq!(score(&large, &weights), base_score - 3.0 * weights.per_size);
    }

    #[test]
    fn ties_keep_tracker_order() {
        let ranked = rank(
            vec![candidate("c"), candidate("a"), candidate("b")],
            &ScoreWeights::default(),
        );
        let ids: Vec<&str> = ranked.iter().map(|s| s.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn negative_size_is_not_rewarded() {
        let weights = ScoreWeights::default();
        let mut odd = candidate("odd");
        odd.size = -4.0;
        assert_eq!(score(&odd, &weights), score(&candidate("odd"), &weights));
    }
}
