//! Recovery code generation and verification helpers.
//!
//! Recovery codes are one-time fallbacks for when the authenticator app is
//! unavailable. Codes are Argon2id-hashed; only hashes are stored.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{RngCore, rngs::OsRng};

const RECOVERY_CODE_COUNT: usize = 10;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
// No ambiguous characters (0/O, 1/I).
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated recovery-code batch (plaintext + hashes).
#[derive(Debug)]
pub struct RecoveryCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

impl RecoveryCodeBatch {
    /// Generate a new recovery-code batch.
    ///
    /// # Errors
    /// Returns an error if code generation or hashing fails.
    pub fn generate() -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let code = generate_code(rng)?;
            let hash = hash_recovery_code(&code)?;
            codes.push(code);
            code_hashes.push(hash);
        }
        Ok(Self { codes, code_hashes })
    }
}

/// Normalize a recovery code for verification.
///
/// # Errors
/// Returns an error if the code has the wrong length or characters outside
/// the recovery alphabet.
pub fn normalize_recovery_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| RECOVERY_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow!("invalid recovery code characters"));
    }

    Ok(normalized)
}

/// Format a normalized recovery code for display.
///
/// # Errors
/// Returns an error if the input has the wrong length.
pub fn format_recovery_code(normalized: &str) -> Result<String> {
    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }
    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(RECOVERY_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid recovery code chunk")?);
    }
    Ok(out)
}

/// Verify a recovery code against a stored hash.
#[must_use]
pub fn verify_recovery_code(code: &str, stored_hash: &str) -> bool {
    let Ok(normalized) = normalize_recovery_code(code) else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok()
}

/// Generate a single recovery code in grouped form.
fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(RECOVERY_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % RECOVERY_CODE_ALPHABET.len();
        if let Some(&char_byte) = RECOVERY_CODE_ALPHABET.get(idx) {
            normalized.push(char_byte as char);
        }
    }
    format_recovery_code(&normalized)
}

fn hash_recovery_code(code: &str) -> Result<String> {
    let normalized = normalize_recovery_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash recovery code"))?
        .to_string();
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::{
        RECOVERY_CODE_COUNT, RecoveryCodeBatch, format_recovery_code, normalize_recovery_code,
        verify_recovery_code,
    };

    #[test]
    fn normalize_recovery_code_trims_and_uppercases() {
        let normalized = normalize_recovery_code("abcd-efgh-jklm").expect("normalize");
        assert_eq!(normalized, "ABCDEFGHJKLM");
    }

    #[test]
    fn format_recovery_code_groups() {
        let formatted = format_recovery_code("ABCDEFGHJKLM").expect("format");
        assert_eq!(formatted, "ABCD-EFGH-JKLM");
    }

    #[test]
    fn batch_has_ten_verifiable_codes() {
        let batch = RecoveryCodeBatch::generate().expect("generate");
        assert_eq!(batch.codes.len(), RECOVERY_CODE_COUNT);
        assert_eq!(batch.code_hashes.len(), RECOVERY_CODE_COUNT);

        let code = batch.codes.first().expect("code");
        let hash = batch.code_hashes.first().expect("hash");
        assert!(verify_recovery_code(code, hash));
        assert!(!verify_recovery_code("ABCD-EFGH-9999", hash));
    }

    #[test]
    fn malformed_codes_verify_false() {
        let batch = RecoveryCodeBatch::generate().expect("generate");
        let hash = batch.code_hashes.first().expect("hash");
        assert!(!verify_recovery_code("", hash));
        assert!(!verify_recovery_code("too-short", hash));
        assert!(!verify_recovery_code("ABCD-EFGH-JKL0", hash));
    }
}
