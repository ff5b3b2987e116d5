//! Constant-time comparison for secret-derived bytes.

/// Returns `true` iff both slices have equal length and identical contents.
///
/// Differences are OR-accumulated so the running time does not depend on
/// where the first mismatch sits. The early return on a length mismatch is
/// fine: digest, nonce and response widths are public constants.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
