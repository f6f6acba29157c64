/// Character-class counts of a value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LengthCounts {
    pub all: usize,
    pub digit: usize,
    pub alpha: usize,
    pub other: usize,
}

impl LengthCounts {
    pub fn to_vec(self) -> Vec<f64> {
        vec![
            self.all as f64,
            self.digit as f64,
            self.alpha as f64,
            self.other as f64,
        ]
    }
}

pub fn length_counts(value: &str) -> LengthCounts {
    let mut counts = LengthCounts::default();
    for c in value.chars() {
        counts.all += 1;
        if c.is_numeric() {
            counts.digit += 1;
        } else if c.is_alphabetic() {
            counts.alpha += 1;
        } else {
            counts.other += 1;
        }
    }
    counts
}
