//! Shared helpers for the integration tests.

use std::sync::Arc;

use crate::{InMemoryCas, UploadConfig, UploadSession};

/// Deterministic pseudo-random bytes; different seeds give unrelated data.
pub fn test_data(seed: u32, size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(0xDEAD_BEEF);
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// A fresh session over the given endpoint with default configuration.
pub fn session(cas: &Arc<InMemoryCas>) -> UploadSession {
    UploadSession::new(cas.clone(), UploadConfig::default())
}
