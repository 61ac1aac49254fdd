use ragdb_core::config::VectorMetric;

pub fn dot(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

pub fn l2_norm(v: &[f32]) -> f32 { dot(v, v).sqrt() }

/// Scale to unit length; zero vectors are left as is.
pub fn normalize(v: &mut [f32]) {
    let n = l2_norm(v);
    if n > 0.0 { for x in v.iter_mut() { *x /= n; } }
}

/// Stored form of a vector under `metric`: cosine vectors are normalized once
/// at insert so scoring is a dot product.
pub fn prepare(metric: VectorMetric, mut v: Vec<f32>) -> Vec<f32> {
    if metric == VectorMetric::Cosine { normalize(&mut v); }
    v
}

/// Similarity where higher is always better. Euclidean is negated distance.
pub fn score(metric: VectorMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        VectorMetric::Cosine | VectorMetric::Dot => dot(a, b),
        VectorMetric::Euclidean => -a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt(),
    }
}
