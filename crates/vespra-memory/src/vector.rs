//! Byte-exact little-endian float32 packing for embeddings (§8): embeddings
//! are stored as BLOBs, and `BlobToVector(VectorToBlob(v)) == v` bit-exactly.
//! A blob whose length isn't a multiple of 4 has its trailing partial float
//! truncated rather than erroring — the packed form is never produced by
//! this crate, but may be read back from a database touched by another tool.

pub fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

pub fn blob_to_vector(b: &[u8]) -> Vec<f32> {
    let usable = b.len() - (b.len() % 4);
    b[..usable]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two equal-length vectors. Zero-norm vectors
/// (all-zero embeddings, or a length mismatch) yield similarity 0.0 rather
/// than NaN or a panic.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bit_exactly() {
        let v = vec![1.0_f32, -2.5, 0.0, f32::MIN_POSITIVE, 3.14159];
        let blob = vector_to_blob(&v);
        let back = blob_to_vector(&blob);
        assert_eq!(v, back);
    }

    #[test]
    fn truncates_partial_trailing_float() {
        let v = vec![1.0_f32, 2.0];
        let mut blob = vector_to_blob(&v);
        blob.extend_from_slice(&[0xFF, 0xFF]);
        let back = blob_to_vector(&blob);
        assert_eq!(back, v);
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![0.0_f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_yields_zero_not_nan() {
        let a = vec![0.0_f32, 0.0];
        let b = vec![1.0_f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
