//! Similarity weighting and concentration measures

/// Temperature-scaled softmax over similarities, normalized to sum to 1.
///
/// The maximum logit is subtracted before exponentiating, so large
/// similarities or small temperatures cannot overflow.
pub fn softmax_weights(similarities: &[f64], temperature: f64) -> Vec<f64> {
    if similarities.is_empty() {
        return Vec::new();
    }

    let logits: Vec<f64> = similarities.iter().map(|s| s / temperature).collect();
    let max_logit = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max_logit).exp()).collect();
    let sum: f64 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

/// Shannon entropy (nats) of a normalized weight vector
pub fn entropy(weights: &[f64]) -> f64 {
    weights
        .iter()
        .filter(|&&w| w > 0.0)
        .map(|&w| -w * w.ln())
        .sum()
}

/// `1 - H(w) / ln(n)`: 0 for uniform weights, 1 when one analog carries everything
pub fn concentration(weights: &[f64]) -> f64 {
    if weights.len() <= 1 {
        return 1.0;
    }
    let max_entropy = (weights.len() as f64).ln();
    (1.0 - entropy(weights) / max_entropy).clamp(0.0, 1.0)
}
