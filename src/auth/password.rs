//! Secret hashing and verification using Argon2
//!
//! Used for both user passwords and API key secrets. Hashes are PHC strings
//! carrying algorithm, version, parameters, salt and digest, so verification
//! needs nothing but the encoded string.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::types::GateError;

/// Tunable Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
    /// Digest length in bytes
    pub output_len: usize,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 1,
            parallelism: 4,
            output_len: 32,
        }
    }
}

/// Argon2id hasher with fixed parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretHasher {
    params: HashParams,
}

impl SecretHasher {
    pub fn new(params: HashParams) -> Self {
        Self { params }
    }

    /// Hash a secret with a fresh random salt
    pub fn hash(&self, secret: &str) -> Result<String, GateError> {
        hash_secret_with(secret, &self.params)
    }

    /// Verify a secret against an encoded hash
    pub fn verify(&self, secret: &str, encoded: &str) -> Result<bool, GateError> {
        verify_secret(secret, encoded)
    }
}

/// Hash a secret using Argon2id with the default parameters
///
/// Returns the PHC-formatted hash string that includes the salt and parameters.
pub fn hash_secret(secret: &str) -> Result<String, GateError> {
    hash_secret_with(secret, &HashParams::default())
}

/// Hash a secret using Argon2id with explicit parameters
pub fn hash_secret_with(secret: &str, params: &HashParams) -> Result<String, GateError> {
    let argon2 = argon2_for(params)?;
    let salt = SaltString::generate(&mut OsRng);

    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GateError::Crypto(format!("Failed to hash secret: {e}")))
}

/// Verify a secret against a stored hash
///
/// Returns true if the secret matches. Hashes that are not argon2id v19 are
/// rejected with an error rather than reported as a mismatch.
pub fn verify_secret(secret: &str, encoded: &str) -> Result<bool, GateError> {
    let parsed = PasswordHash::new(encoded)
        .map_err(|e| GateError::MalformedHash(format!("Invalid hash format: {e}")))?;

    match Algorithm::try_from(parsed.algorithm) {
        Ok(Algorithm::Argon2id) => {}
        _ => {
            return Err(GateError::UnsupportedAlgorithm(
                parsed.algorithm.as_str().to_string(),
            ))
        }
    }

    match parsed.version {
        Some(v) if v == Version::V0x13 as u32 => {}
        Some(v) => return Err(GateError::UnsupportedVersion(v.to_string())),
        None => return Err(GateError::UnsupportedVersion("missing".into())),
    }

    if parsed.hash.is_none() {
        return Err(GateError::MalformedHash("missing digest".into()));
    }

    // Argon2 re-derives with the params embedded in the hash and compares the
    // output in constant time.
    match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(GateError::MalformedHash(format!("Invalid hash parameters: {e}"))),
    }
}

fn argon2_for(params: &HashParams) -> Result<Argon2<'static>, GateError> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(params.output_len),
    )
    .map_err(|e| GateError::Config(format!("Invalid argon2 parameters: {e}")))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}
