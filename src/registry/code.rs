//! Share codes and their generator
//!
//! A code is the short handle a downloader types in to reach a session.
//! Codes are drawn uniformly from uppercase ASCII letters and digits.

use std::fmt;

use rand::Rng;

use super::error::RegistryError;

/// Characters a code may contain
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default number of characters per code (36^6 possible codes)
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Shortest code length accepted by the configuration
pub const MIN_CODE_LENGTH: usize = 4;

/// Longest code length accepted by the configuration
pub const MAX_CODE_LENGTH: usize = 32;

/// A share code (uppercase letters and digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(String);

impl Code {
    /// Parse user input into a code
    ///
    /// Surrounding whitespace is trimmed and letters are upper-cased, so
    /// `" ab12cd "` parses to `AB12CD`.
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let normalized = input.trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(RegistryError::InvalidInput("code is empty".into()));
        }
        if normalized.len() > MAX_CODE_LENGTH {
            return Err(RegistryError::InvalidInput(format!(
                "code longer than {} characters",
                MAX_CODE_LENGTH
            )));
        }
        if let Some(bad) = normalized.bytes().find(|b| !CODE_ALPHABET.contains(b)) {
            return Err(RegistryError::InvalidInput(format!(
                "code contains invalid character {:?}",
                bad as char
            )));
        }

        Ok(Self(normalized))
    }

    /// Get the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Code {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generates fresh codes that do not collide with active ones
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    length: usize,
}

impl CodeGenerator {
    /// Create a generator producing codes of `length` characters
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH),
        }
    }

    /// Length of the generated codes
    pub fn length(&self) -> usize {
        self.length
    }

    /// Generate a code for which `is_taken` returns false
    pub fn generate<F>(&self, is_taken: F) -> Code
    where
        F: Fn(&Code) -> bool,
    {
        self.generate_with(&mut rand::thread_rng(), is_taken)
    }

    /// Generate a code using the given random source
    ///
    /// Candidates are drawn until one is free. With at least 36^4 codes in
    /// the space and a registry bounded by storage, the loop terminates
    /// after a handful of draws in practice.
    pub fn generate_with<R, F>(&self, rng: &mut R, is_taken: F) -> Code
    where
        R: Rng + ?Sized,
        F: Fn(&Code) -> bool,
    {
        loop {
            let candidate: String = (0..self.length)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            let candidate = Code(candidate);

            if !is_taken(&candidate) {
                return candidate;
            }

            tracing::trace!(code = %candidate, "Generated code collides, retrying");
        }
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_generated_code_shape() {
        let generator = CodeGenerator::default();
        let code = generator.generate(|_| false);

        assert_eq!(code.as_str().len(), DEFAULT_CODE_LENGTH);
        assert!(code
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
    }

    #[test]
    fn test_generate_skips_taken_codes() {
        let generator = CodeGenerator::default();
        let mut rng = StdRng::seed_from_u64(7);

        // Reproduce the first draw, then mark it taken
        let first = generator.generate_with(&mut StdRng::seed_from_u64(7), |_| false);
        let attempts = Cell::new(0);
        let code = generator.generate_with(&mut rng, |c| {
            attempts.set(attempts.get() + 1);
            *c == first
        });

        assert_ne!(code, first);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_generate_avoids_existing_set() {
        let generator = CodeGenerator::new(4);
        let mut rng = StdRng::seed_from_u64(42);
        let mut active = HashSet::new();

        for _ in 0..2000 {
            let code = generator.generate_with(&mut rng, |c| active.contains(c));
            assert!(active.insert(code));
        }
        assert_eq!(active.len(), 2000);
    }

    #[test]
    fn test_length_is_clamped() {
        assert_eq!(CodeGenerator::new(1).length(), MIN_CODE_LENGTH);
        assert_eq!(CodeGenerator::new(100).length(), MAX_CODE_LENGTH);
        assert_eq!(CodeGenerator::new(8).length(), 8);
    }

    #[test]
    fn test_parse_normalizes_input() {
        let code = Code::parse("  ab12cd \n").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
        assert_eq!(code.to_string(), "AB12CD");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            Code::parse("   "),
            Err(RegistryError::InvalidInput(_))
        ));
        assert!(matches!(
            Code::parse("AB-12C"),
            Err(RegistryError::InvalidInput(_))
        ));
        assert!(matches!(
            Code::parse(&"A".repeat(MAX_CODE_LENGTH + 1)),
            Err(RegistryError::InvalidInput(_))
        ));
    }
}
