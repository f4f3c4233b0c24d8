//! Proportional allocation math
//!
//! Percentage allocations split an integer base amount (drops or token
//! micro-units) across heirs. Shares are computed with the largest-remainder
//! method so the split is deterministic, each heir gets at least the floor of
//! their exact share, and the total paid out is exactly
//! `floor(base × Σpercent / 100)`, never more than the base.

/// Split `base` across `shares` of whole percents. Returns one `(heir_uid,
/// amount)` per input share, in input order. Remainder units go to the
/// largest fractional remainders first; ties break toward the smaller heir
/// uid. Callers must ensure the percents sum to at most 100.
pub fn split_percent(base: u64, shares: &[(String, u8)]) -> Vec<(String, u64)> {
    if shares.is_empty() {
        return Vec::new();
    }

    let total_percent: u128 = shares.iter().map(|(_, p)| u128::from(*p)).sum();
    let target = u128::from(base) * total_percent / 100;

    let mut floors: Vec<u64> = Vec::with_capacity(shares.len());
    let mut remainders: Vec<(usize, u128)> = Vec::with_capacity(shares.len());
    for (index, (_, percent)) in shares.iter().enumerate() {
        let exact = u128::from(base) * u128::from(*percent);
        floors.push((exact / 100) as u64);
        remainders.push((index, exact % 100));
    }

    let floor_sum: u128 = floors.iter().map(|f| u128::from(*f)).sum();
    let mut leftover = (target - floor_sum) as usize;

    remainders.sort_by(|(ai, ar), (bi, br)| {
        br.cmp(ar)
            .then_with(|| shares[*ai].0.cmp(&shares[*bi].0))
    });
    for (index, _) in remainders {
        if leftover == 0 {
            break;
        }
        floors[index] += 1;
        leftover -= 1;
    }

    shares
        .iter()
        .zip(floors)
        .map(|((uid, _), amount)| (uid.clone(), amount))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares(input: &[(&str, u8)]) -> Vec<(String, u8)> {
        input.iter().map(|(u, p)| (u.to_string(), *p)).collect()
    }

    #[test]
    fn test_exact_split() {
        let split = split_percent(100, &shares(&[("a", 60), ("b", 40)]));
        assert_eq!(split, vec![("a".to_string(), 60), ("b".to_string(), 40)]);
    }

    #[test]
    fn test_remainder_goes_to_largest_fraction() {
        // 1000 × 33% = 330, ×66% = 660; 10 units stay behind
        let split = split_percent(1000, &shares(&[("a", 33), ("b", 66)]));
        let total: u64 = split.iter().map(|(_, v)| v).sum();
        assert_eq!(total, 990);
        assert_eq!(split[0].1, 330);
        assert_eq!(split[1].1, 660);

        // 101 at 50/50: one leftover unit, tie broken toward "a"
        let split = split_percent(101, &shares(&[("b", 50), ("a", 50)]));
        assert_eq!(split, vec![("b".to_string(), 50), ("a".to_string(), 51)]);
    }

    #[test]
    fn test_thirds_sum_to_floor_of_total() {
        let split = split_percent(100, &shares(&[("a", 33), ("b", 33), ("c", 33)]));
        let total: u64 = split.iter().map(|(_, v)| v).sum();
        assert_eq!(total, 99);
        assert!(split.iter().all(|(_, v)| *v == 33));
    }

    #[test]
    fn test_never_exceeds_base() {
        for base in [0u64, 1, 7, 99, 100, 101, 1_000_003] {
            for pcts in [vec![("a", 100)], vec![("a", 51), ("b", 49)], vec![
                ("a", 17),
                ("b", 17),
                ("c", 17),
                ("d", 17),
                ("e", 17),
            ]] {
                let split = split_percent(base, &shares(&pcts));
                let total: u64 = split.iter().map(|(_, v)| v).sum();
                assert!(total <= base, "base {base}: paid {total}");
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let input = shares(&[("x", 21), ("y", 37), ("z", 42)]);
        let first = split_percent(999_999, &input);
        let second = split_percent(999_999, &input);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_base_and_empty() {
        assert!(split_percent(100, &[]).is_empty());
        let split = split_percent(0, &shares(&[("a", 50), ("b", 50)]));
        assert!(split.iter().all(|(_, v)| *v == 0));
    }
}
