//! Gap-filling sequence numbers

use std::collections::BTreeSet;

/// Smallest positive number not in `taken`, or `None` past `max`
pub fn next_sequence(taken: &BTreeSet<u32>, max: u32) -> Option<u32> {
    fill_sequences(taken, 1, max).and_then(|mut seqs| seqs.pop())
}

/// `count` free numbers, lowest first: gaps before appending.
/// `None` when the scope cannot hold `count` more.
pub fn fill_sequences(taken: &BTreeSet<u32>, count: usize, max: u32) -> Option<Vec<u32>> {
    let mut result = Vec::with_capacity(count);
    let mut candidate = 1u32;
    while result.len() < count {
        if candidate > max {
            return None;
        }
        if !taken.contains(&candidate) {
            result.push(candidate);
        }
        candidate += 1;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[u32]) -> BTreeSet<u32> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_fills_first_gap() {
        assert_eq!(next_sequence(&set(&[1, 3, 4]), 999), Some(2));
        assert_eq!(next_sequence(&set(&[1, 2, 3, 4]), 999), Some(5));
        assert_eq!(next_sequence(&set(&[]), 999), Some(1));
    }

    #[test]
    fn test_batch_fills_gaps_then_appends() {
        assert_eq!(fill_sequences(&set(&[2, 4]), 4, 999), Some(vec![1, 3, 5, 6]));
    }

    #[test]
    fn test_exhausted_scope() {
        let full: BTreeSet<u32> = (1..=99).collect();
        assert_eq!(next_sequence(&full, 99), None);
        assert_eq!(fill_sequences(&set(&[1]), 99, 99), None);
    }
}
