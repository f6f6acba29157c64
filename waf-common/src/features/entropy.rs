use std::collections::HashMap;

/// Shannon entropy in bits of the character frequencies of `value`.
/// An empty value has entropy 0.
pub fn shannon_entropy(value: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in value.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let total = total as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            p * (1.0 / p).log2()
        })
        .sum()
}
