/// Min-max normalize `scores` into `[0, 1]`.
///
/// A flat vector carries no ranking information: positive values map to 1.0
/// and everything else to 0.0.
pub fn min_max(scores: &[f64]) -> Vec<f64> {
    let Some(min) = scores.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f64::max);

    if max == min {
        return scores
            .iter()
            .map(|&v| if v > 0.0 { 1.0 } else { 0.0 })
            .collect();
    }

    let range = max - min;
    scores.iter().map(|&v| (v - min) / range).collect()
}
