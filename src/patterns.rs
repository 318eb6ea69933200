use crate::types::Pattern;

pub const DEFAULT_SOLUTION_LIMIT: usize = 100_000;

/// Lower bound on the per-segment count ceiling so dense packs of short
/// segments are never cut off.
const MIN_COUNT_CEILING: i64 = 150;

/// Tolerances are compared in parts per million to keep the bound exact.
const PPM: i128 = 1_000_000;

/// Smallest material usage a pattern may have: `stock * (1 - tolerance)`,
/// rounded up.
pub fn min_material(stock: i64, tolerance: f64) -> i64 {
    let ppm = ((tolerance * PPM as f64).round() as i128).clamp(0, PPM);
    let numerator = stock as i128 * (PPM - ppm);
    ((numerator + PPM - 1) / PPM) as i64
}

/// Enumerates every count vector that fits one bar and uses at least
/// `stock * (1 - tolerance)` of it. Inputs are in scaled units and `lengths`
/// keeps the caller's order; `counts[i]` of each pattern refers to
/// `lengths[i]`.
pub fn enumerate(
    stock: i64,
    lengths: &[i64],
    kerf: i64,
    trim: i64,
    tolerance: f64,
    limit: usize,
) -> Vec<Pattern> {
    if lengths.is_empty() || trim >= stock || lengths.iter().any(|&l| l <= 0) || kerf < 0 {
        return Vec::new();
    }

    let shortest = lengths.iter().copied().min().unwrap_or(stock);
    let ceiling = MIN_COUNT_CEILING.max(stock / shortest + 1);

    let enumerator = Enumerator {
        stock,
        lengths,
        kerf,
        min_used: min_material(stock, tolerance),
        ceiling,
        limit,
    };

    let mut counts = vec![0u32; lengths.len()];
    let mut found = Vec::new();
    enumerator.search(0, trim, &mut counts, &mut found);

    if found.len() >= limit {
        tracing::warn!(limit, "pattern enumeration hit its solution budget");
    }

    found.sort_by(|a, b| b.material_used.cmp(&a.material_used));
    tracing::debug!(
        patterns = found.len(),
        segments = lengths.len(),
        stock,
        "enumerated cutting patterns"
    );
    found
}

struct Enumerator<'a> {
    stock: i64,
    lengths: &'a [i64],
    kerf: i64,
    min_used: i64,
    ceiling: i64,
    limit: usize,
}

impl Enumerator<'_> {
    fn search(&self, idx: usize, used: i64, counts: &mut [u32], found: &mut Vec<Pattern>) {
        if found.len() >= self.limit {
            return;
        }

        let unit = self.lengths[idx] + self.kerf;
        let room = self.stock - used;
        let max_count = (room / unit).min(self.ceiling);

        if idx + 1 == self.lengths.len() {
            // Last position: only counts landing inside [min_used, stock].
            let short = self.min_used - used;
            let min_count = if short <= 0 {
                0
            } else {
                (short + unit - 1) / unit
            };
            for count in (min_count..=max_count).rev() {
                if found.len() >= self.limit {
                    break;
                }
                counts[idx] = count as u32;
                if counts.iter().all(|&c| c == 0) {
                    continue;
                }
                found.push(Pattern {
                    counts: counts.to_vec(),
                    material_used: used + count * unit,
                });
            }
            counts[idx] = 0;
            return;
        }

        for count in (0..=max_count).rev() {
            counts[idx] = count as u32;
            self.search(idx + 1, used + count * unit, counts, found);
            if found.len() >= self.limit {
                break;
            }
        }
        counts[idx] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const LIMIT: usize = DEFAULT_SOLUTION_LIMIT;

    /// Every admissible vector, found by walking the full count grid.
    fn brute_force(
        stock: i64,
        lengths: &[i64],
        kerf: i64,
        trim: i64,
        tolerance: f64,
    ) -> HashSet<Vec<u32>> {
        let min_used = min_material(stock, tolerance);
        let mut out = HashSet::new();
        let mut counts = vec![0u32; lengths.len()];
        loop {
            let used = Pattern::material_for(&counts, lengths, kerf, trim);
            if counts.iter().any(|&c| c > 0) && used <= stock && used >= min_used {
                out.insert(counts.clone());
            }
            // odometer increment bounded by stock / length
            let mut i = 0;
            loop {
                if i == counts.len() {
                    return out;
                }
                counts[i] += 1;
                if counts[i] as i64 * lengths[i] <= stock {
                    break;
                }
                counts[i] = 0;
                i += 1;
            }
        }
    }

    #[test]
    fn test_mixed_bar_scenario() {
        // stock 6000, kerf 1, trim 10, A = 2375.8, B = 1162.2 at 1.5 %
        let patterns = enumerate(60000, &[23758, 11622], 10, 100, 0.015, LIMIT);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].counts, vec![2, 1]);
        assert_eq!(patterns[0].material_used, 59268);
    }

    #[test]
    fn test_matches_brute_force() {
        let lengths = [4000, 2500, 1800, 700];
        let found = enumerate(60000, &lengths, 30, 150, 0.05, LIMIT);
        let found_set: HashSet<Vec<u32>> = found.iter().map(|p| p.counts.clone()).collect();
        assert_eq!(found_set.len(), found.len(), "duplicate count vectors");
        assert_eq!(found_set, brute_force(60000, &lengths, 30, 150, 0.05));
    }

    #[test]
    fn test_sorted_by_material_descending() {
        let found = enumerate(60000, &[4000, 2500, 1800, 700], 30, 150, 0.05, LIMIT);
        assert!(found.len() > 1);
        for pair in found.windows(2) {
            assert!(pair[0].material_used >= pair[1].material_used);
        }
    }

    #[test]
    fn test_order_is_positional() {
        let forward = enumerate(60000, &[23758, 11622], 10, 100, 0.015, LIMIT);
        let reversed = enumerate(60000, &[11622, 23758], 10, 100, 0.015, LIMIT);
        assert_eq!(forward[0].counts, vec![2, 1]);
        assert_eq!(reversed[0].counts, vec![1, 2]);
    }

    #[test]
    fn test_solution_limit_caps_output() {
        let found = enumerate(60000, &[400, 450, 500, 550], 0, 0, 0.10, 25);
        assert_eq!(found.len(), 25);
    }

    #[test]
    fn test_no_pattern_when_tolerance_unreachable() {
        // Two 2900 pieces use 5800 + trim; 1.5 % needs at least 5910.
        assert!(enumerate(60000, &[29000], 25, 150, 0.015, LIMIT).is_empty());
    }

    #[test]
    fn test_trim_eating_whole_bar_yields_nothing() {
        assert!(enumerate(1000, &[100], 0, 1000, 0.5, LIMIT).is_empty());
        assert!(enumerate(1000, &[], 0, 0, 0.5, LIMIT).is_empty());
    }

    #[test]
    fn test_min_material_is_exact() {
        assert_eq!(min_material(60000, 0.015), 59100);
        assert_eq!(min_material(60000, 0.10), 54000);
        assert_eq!(min_material(60000, 0.0), 60000);
        assert_eq!(min_material(60001, 0.5), 30001);
    }

    proptest! {
        #[test]
        fn patterns_respect_both_bounds(
            stock in 2000i64..8000,
            lengths in prop::collection::vec(300i64..2500, 1..4),
            kerf in 0i64..30,
            trim in 0i64..200,
            tolerance_pct in 1u32..20,
        ) {
            let tolerance = tolerance_pct as f64 / 100.0;
            let min_used = min_material(stock, tolerance);
            for pattern in enumerate(stock, &lengths, kerf, trim, tolerance, LIMIT) {
                let used = Pattern::material_for(&pattern.counts, &lengths, kerf, trim);
                prop_assert_eq!(used, pattern.material_used);
                prop_assert!(used <= stock);
                prop_assert!(used >= min_used);
                prop_assert!(pattern.counts.iter().any(|&c| c > 0));
            }
        }
    }
}
