//! Email verification tokens.

use rand::Rng;

/// Number of random bytes in a verification token.
pub const TOKEN_BYTES: usize = 32;

/// Length of the hex-encoded token.
pub const TOKEN_LENGTH: usize = TOKEN_BYTES * 2;

/// Generates a cryptographically secure verification token.
///
/// The token is 32 bytes from the thread-local CSPRNG, hex encoded, so it is
/// safe to embed in a URL query string as-is.
pub fn generate_verification_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_expected_length() {
        assert_eq!(generate_verification_token().len(), TOKEN_LENGTH);
    }

    #[test]
    fn token_is_lowercase_hex() {
        let token = generate_verification_token();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(hex::decode(&token).unwrap().len(), TOKEN_BYTES);
    }

    #[test]
    fn tokens_are_unique() {
        let tokens: std::collections::HashSet<_> =
            (0..1000).map(|_| generate_verification_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }
}
