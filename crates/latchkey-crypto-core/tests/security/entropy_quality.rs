//! Entropy smoke tests for generated secrets and nonces.
//!
//! Thresholds are loose on purpose: they only catch a degenerate CSPRNG
//! (all zeros, repeating output), not subtle bias.

use std::collections::HashSet;

use latchkey_crypto_core::challenge::NonceRegistry;
use latchkey_crypto_core::secret::Secret;

/// Shannon entropy of a byte slice (bits per byte).
#[allow(clippy::cast_precision_loss)]
fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut freq = [0u64; 256];
    for &b in data {
        freq[b as usize] = freq[b as usize].saturating_add(1);
    }
    let len = data.len() as f64;
    freq.iter()
        .filter(|&&f| f > 0)
        .map(|&f| {
            let p = f as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// 64 secrets concatenated = 1 KiB; random data sits near 7.8 bits/byte.
#[test]
fn generated_secrets_have_high_entropy() {
    let mut pool = Vec::with_capacity(1024);
    for _ in 0..64 {
        pool.extend_from_slice(Secret::generate().unwrap().expose());
    }
    let h = shannon_entropy(&pool);
    assert!(h > 7.5, "secret entropy too low: {h:.3} bits/byte");
}

#[test]
fn issued_nonces_are_unique() {
    let registry = NonceRegistry::with_window(0);
    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        let nonce = registry.issue().unwrap();
        assert!(seen.insert(*nonce.as_bytes()), "nonce repeated");
    }
}
