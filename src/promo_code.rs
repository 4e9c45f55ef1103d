use std::fmt;

use ulid::Ulid;

/// Uppercase letters and digits without the look-alikes 0/O, 1/I/L.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const CODE_LEN: usize = 8;
pub const FALLBACK_CODE_LEN: usize = 12;
/// Attempts at `CODE_LEN` before switching to `FALLBACK_CODE_LEN`.
pub const MAX_SHORT_ATTEMPTS: usize = 8;
pub const MAX_LONG_ATTEMPTS: usize = 32;

#[derive(Debug)]
pub enum CodeError {
    Exhausted,
}

impl fmt::Display for CodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeError::Exhausted => write!(f, "could not find an unused promo code"),
        }
    }
}

impl std::error::Error for CodeError {}

/// Random code of `len` characters from [`ALPHABET`].
pub fn random_code(len: usize) -> String {
    // Rejection sampling keeps every character equally likely.
    let limit = (256 / ALPHABET.len() * ALPHABET.len()) as u8;
    let mut out = String::with_capacity(len);
    while out.len() < len {
        // The low 80 bits of a fresh ULID are random.
        let bytes = Ulid::new().random().to_le_bytes();
        for &b in bytes[..10].iter().filter(|&&b| b < limit) {
            if out.len() == len {
                break;
            }
            out.push(ALPHABET[b as usize % ALPHABET.len()] as char);
        }
    }
    out
}

/// Generate a code for which `is_taken` returns false.
/// Short codes are tried first; persistent collisions fall back to longer ones.
pub fn generate_unique(is_taken: impl Fn(&str) -> bool) -> Result<String, CodeError> {
    generate_with(random_code, is_taken)
}

fn generate_with(
    mut source: impl FnMut(usize) -> String,
    is_taken: impl Fn(&str) -> bool,
) -> Result<String, CodeError> {
    for _ in 0..MAX_SHORT_ATTEMPTS {
        let code = source(CODE_LEN);
        if !is_taken(&code) {
            return Ok(code);
        }
    }
    tracing::warn!("promo code space crowded, falling back to {FALLBACK_CODE_LEN}-char codes");
    for _ in 0..MAX_LONG_ATTEMPTS {
        let code = source(FALLBACK_CODE_LEN);
        if !is_taken(&code) {
            return Ok(code);
        }
    }
    Err(CodeError::Exhausted)
}

/// Codes are matched case-insensitively with surrounding whitespace ignored.
pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashSet;

    #[test]
    fn random_code_uses_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = random_code(CODE_LEN);
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
            assert!(!code.contains(['0', 'O', '1', 'I', 'L']));
        }
    }

    #[test]
    fn unique_against_taken_set() {
        let taken: HashSet<String> = (0..100).map(|_| random_code(CODE_LEN)).collect();
        let code = generate_unique(|c| taken.contains(c)).unwrap();
        assert!(!taken.contains(&code));
    }

    #[test]
    fn falls_back_to_longer_code_after_collisions() {
        let calls = Cell::new(0usize);
        let source = |len: usize| {
            calls.set(calls.get() + 1);
            "A".repeat(len)
        };
        let code = generate_with(source, |c| c.len() == CODE_LEN).unwrap();
        assert_eq!(code.len(), FALLBACK_CODE_LEN);
        assert_eq!(calls.get(), MAX_SHORT_ATTEMPTS + 1);
    }

    #[test]
    fn never_returns_a_taken_code() {
        let result = generate_with(|len| "B".repeat(len), |_| true);
        assert!(matches!(result, Err(CodeError::Exhausted)));
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize("  abcd2345 \n"), "ABCD2345");
    }
}
