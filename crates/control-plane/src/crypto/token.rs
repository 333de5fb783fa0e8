//! Callback tokens.
//!
//! Each execution gets one random token at creation. It reaches the runner
//! only through the workload's secrets bundle and is the sole credential the
//! runner presents when reporting status.

use rand::distributions::Alphanumeric;
use rand::Rng;
use subtle::ConstantTimeEq;

/// Length of a callback token in characters.
pub const CALLBACK_TOKEN_LENGTH: usize = 32;

/// Generate a fresh alphanumeric callback token.
pub fn generate_callback_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CALLBACK_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Compare a presented token against the stored one in constant time.
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}
