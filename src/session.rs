//! Version-4-layout identifiers.
//!
//! The runtime tails inserted into the target script build a fresh session id
//! on every call with exactly this layout. The engine uses the same layout for
//! the per-run stamp it leaves next to each insertion.

use rand::Rng;

/// Total length of an identifier, hyphens included.
pub const SESSION_ID_LEN: usize = 36;

/// Positions that always hold `-`.
pub const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// Position of the version nibble, always `4`.
pub const VERSION_POSITION: usize = 14;

/// Position of the variant nibble, always one of `8`, `9`, `a`, `b`.
pub const VARIANT_POSITION: usize = 19;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Generate a new identifier from the thread-local RNG.
pub fn generate() -> String {
    generate_with(&mut rand::rng())
}

/// Generate a new identifier from the given RNG.
///
/// The randomness does not need to be cryptographically strong; only the
/// layout is fixed.
pub fn generate_with<R: Rng>(rng: &mut R) -> String {
    let mut id = String::with_capacity(SESSION_ID_LEN);
    for i in 0..SESSION_ID_LEN {
        let c = if HYPHEN_POSITIONS.contains(&i) {
            '-'
        } else if i == VERSION_POSITION {
            '4'
        } else if i == VARIANT_POSITION {
            HEX[8 + rng.random_range(0..4usize)] as char
        } else {
            HEX[rng.random_range(0..16usize)] as char
        };
        id.push(c);
    }
    id
}

/// Check that `candidate` has the identifier layout.
pub fn is_session_id(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() != SESSION_ID_LEN {
        return false;
    }

    bytes.iter().enumerate().all(|(i, &b)| {
        if HYPHEN_POSITIONS.contains(&i) {
            b == b'-'
        } else if i == VERSION_POSITION {
            b == b'4'
        } else if i == VARIANT_POSITION {
            matches!(b, b'8' | b'9' | b'a' | b'b')
        } else {
            HEX.contains(&b)
        }
    })
}
