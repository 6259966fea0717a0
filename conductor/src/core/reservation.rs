//! Sequential reservation assignment for a scheduling batch.

use std::collections::BTreeMap;

use crate::core::types::Candidate;

/// Assign `highest + 1, highest + 2, …` to each batch member that needs a
/// reservation, in selection order.
///
/// `highest` must be a snapshot taken once for the whole batch, before any
/// worker starts.
pub fn assign_reservations(batch: &[Candidate], highest: u32) -> BTreeMap<String, u32> {
    let mut next = highest;
    let mut assigned = BTreeMap::new();
    for candidate in batch.iter().filter(|c| c.needs_reservation) {
        next += 1;
        assigned.insert(candidate.id.clone(), next);
    }
    assigned
}

/// Highest number among `issued`, or zero when nothing was issued.
pub fn highest_issued(issued: impl IntoIterator<Item = u32>) -> u32 {
    issued.into_iter().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::candidate;

    fn needing(id: &str) -> Candidate {
        let mut c = candidate(id);
        c.needs_reservation = true;
        c
    }

    #[test]
    fn batch_of_three_after_five_gets_six_seven_eight() {
        let batch = vec![needing("a"), needing("b"), needing("c")];
        let assigned = assign_reservations(&batch, 5);
        assert_eq!(
            assigned,
            BTreeMap::from([
                ("a".to_string(), 6),
                ("b".to_string(), 7),
                ("c".to_string(), 8),
            ])
        );
    }

    #[test]
    fn tasks_without_need_are_skipped_without_gaps() {
        let batch = vec![needing("a"), candidate("plain"), needing("b")];
        let assigned = assign_reservations(&batch, 0);
        assert_eq!(assigned.get("a"), Some(&1));
        assert_eq!(assigned.get("b"), Some(&2));
        assert!(!assigned.contains_key("plain"));
    }

    #[test]
    fn assigned_numbers_are_distinct_and_above_highest() {
        let batch: Vec<Candidate> = (0..10).map(|i| needing(&format!("t{i}"))).collect();
        let assigned = assign_reservations(&batch, 41);
        let mut numbers: Vec<u32> = assigned.values().copied().collect();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), 10);
        assert!(numbers.iter().all(|n| *n > 41));
    }

    #[test]
    fn highest_issued_defaults_to_zero() {
        assert_eq!(highest_issued(Vec::new()), 0);
        assert_eq!(highest_issued([3, 9, 4]), 9);
    }
}
