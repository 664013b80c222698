/// Cosine similarity; `None` on dimension mismatch or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }

    Some(dot / (norm_a * norm_b))
}

/// Reduce an embedding to `target_dim` by head truncation followed by L2
/// renormalization. Direction is preserved only approximately; this is the
/// single seam to swap in a learned or random projection.
pub fn reduce_embedding(raw: &[f32], target_dim: usize) -> Vec<f32> {
    let take = target_dim.min(raw.len());
    let mut head: Vec<f32> = raw[..take].to_vec();
    let norm: f32 = head.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut head {
            *value /= norm;
        }
    }
    head
}
