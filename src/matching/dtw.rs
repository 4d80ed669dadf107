/// Per-frame distance used inside the DTW recurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalCost {
    Euclidean,
    /// `1 - cos(a, b)`. Two all-zero frames are identical (0); a zero frame against a
    /// non-zero one is treated as orthogonal (1).
    Cosine,
}

impl LocalCost {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Self::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = (*x - *y) as f64;
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
            Self::Cosine => {
                let (mut dot, mut na, mut nb) = (0.0_f64, 0.0_f64, 0.0_f64);
                for (x, y) in a.iter().zip(b) {
                    let (x, y) = (*x as f64, *y as f64);
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                match (na > 0.0, nb > 0.0) {
                    (false, false) => 0.0,
                    (true, true) => (1.0 - dot / (na.sqrt() * nb.sqrt())).max(0.0),
                    _ => 1.0,
                }
            }
        }
    }
}

/// Dynamic time warping distance between two frame sequences: the minimum total local
/// cost over all monotonic alignments that start at the first frames and end at the last.
///
/// Runs in O(n * m) time and O(m) memory. Returns infinity if either sequence is empty.
pub fn dtw_distance(x: &[Vec<f32>], y: &[Vec<f32>], cost: LocalCost) -> f64 {
    if x.is_empty() || y.is_empty() {
        return f64::INFINITY;
    }

    let m = y.len();
    let mut prev = vec![f64::INFINITY; m];
    let mut curr = vec![f64::INFINITY; m];

    for (i, xi) in x.iter().enumerate() {
        for (j, yj) in y.iter().enumerate() {
            let d = cost.distance(xi, yj);
            let best = match (i, j) {
                (0, 0) => 0.0,
                (0, _) => curr[j - 1],
                (_, 0) => prev[j],
                _ => prev[j].min(curr[j - 1]).min(prev[j - 1]),
            };
            curr[j] = d + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[m - 1]
}
