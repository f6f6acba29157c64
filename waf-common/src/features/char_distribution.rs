use std::collections::HashMap;

/// Bin widths over the descending-sorted relative frequencies.
/// The last bin absorbs every remaining rank.
pub const CHAR_DISTRIBUTION_BINS: [usize; 4] = [1, 2, 3, 4];

const BIN_COUNT: usize = CHAR_DISTRIBUTION_BINS.len() + 1;

/// Binned character distribution of `value` (n-gram size 1).
///
/// Character frequencies are sorted in descending order, normalized to sum
/// to 1 and summed into bins of width 1, 2, 3, 4 and "rest". An empty value
/// yields all zeros.
pub fn char_distribution(value: &str) -> [f64; BIN_COUNT] {
    let mut bins = [0.0; BIN_COUNT];

    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in value.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return bins;
    }

    let mut frequencies: Vec<usize> = counts.into_values().collect();
    frequencies.sort_unstable_by(|a, b| b.cmp(a));

    let mut rank = 0;
    for (bin, width) in CHAR_DISTRIBUTION_BINS.iter().enumerate() {
        let end = (rank + width).min(frequencies.len());
        bins[bin] = frequencies[rank.min(end)..end]
            .iter()
            .map(|&n| n as f64 / total as f64)
            .sum();
        rank = end;
    }
    bins[BIN_COUNT - 1] = frequencies[rank..]
        .iter()
        .map(|&n| n as f64 / total as f64)
        .sum();

    bins
}
