use rand::Rng;

/// Room codes are 4 characters drawn from an alphabet without the
/// easily-confused glyphs `0`, `O`, `1`, `I` and `L`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const CODE_LEN: usize = 4;

/// Generate a fresh room code. Uniqueness is the caller's problem: the
/// create path retries on collision.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Uppercase canonical form. All lookups and comparisons go through this.
pub fn canonical(code: &str) -> String {
    code.to_ascii_uppercase()
}

pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN
        && code
            .bytes()
            .all(|b| CODE_ALPHABET.contains(&b.to_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_omits_ambiguous_glyphs() {
        for banned in [b'0', b'O', b'1', b'I', b'L'] {
            assert!(!CODE_ALPHABET.contains(&banned), "{} in alphabet", banned as char);
        }
        assert_eq!(CODE_ALPHABET.len(), 31);
    }

    #[test]
    fn generated_codes_are_canonical() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(is_valid_code(&code));
            assert_eq!(code, canonical(&code));
        }
    }

    #[test]
    fn validation_is_case_insensitive() {
        assert!(is_valid_code("hqk3"));
        assert!(is_valid_code("HQK3"));
        assert_eq!(canonical("hqk3"), "HQK3");
    }

    #[test]
    fn rejects_wrong_length_and_banned_chars() {
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("HQK"));
        assert!(!is_valid_code("HQK33"));
        assert!(!is_valid_code("HQ0K"));
        assert!(!is_valid_code("HQIK"));
    }
}
