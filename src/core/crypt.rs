//! Credential hashing and verification on top of crypt(3)-compatible hashes.

use crate::core::error::CryptError;
use crate::core::salt::{ClockSeededRandom, RandomSource, SaltGenerator};
use crate::core::scheme::{HashScheme, SchemeResolver};
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Produces new hashed credentials using the host's configured scheme.
pub struct CredentialEngine<R = ClockSeededRandom> {
    resolver: SchemeResolver,
    salts: Mutex<SaltGenerator<R>>,
}

impl<R: RandomSource> CredentialEngine<R> {
    pub fn new(resolver: SchemeResolver, salts: SaltGenerator<R>) -> Self {
        Self {
            resolver,
            salts: Mutex::new(salts),
        }
    }

    pub fn resolver(&self) -> &SchemeResolver {
        &self.resolver
    }

    /// Resolve the scheme, draw a fresh salt, and hash `plaintext`.
    pub fn new_credential(&self, plaintext: &str) -> Result<Zeroizing<String>, CryptError> {
        let scheme = self.resolver.resolve();
        let salt = self
            .salts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .generate(scheme)?;
        hash_new_credential(scheme, &salt, plaintext)
    }
}

/// Build the crypt setting: `$<tag>$<salt>$` for tagged schemes, the first
/// two salt characters for DES.
pub fn crypt_setting(scheme: HashScheme, salt: &str) -> Zeroizing<String> {
    let mut setting = Zeroizing::new(String::with_capacity(salt.len() + 4));
    match scheme.tag() {
        Some(tag) => {
            setting.push('$');
            setting.push(tag);
            setting.push('$');
            setting.push_str(salt);
            setting.push('$');
        }
        None => setting.extend(salt.chars().take(2)),
    }
    setting
}

pub fn hash_new_credential(
    scheme: HashScheme,
    salt: &str,
    plaintext: &str,
) -> Result<Zeroizing<String>, CryptError> {
    let setting = crypt_setting(scheme, salt);
    pwhash::unix::crypt(plaintext, &setting)
        .map(Zeroizing::new)
        .map_err(|e| CryptError::Hash(e.to_string()))
}

/// Re-hash `plaintext` with the stored hash as the setting and compare the
/// result over its full length.
pub fn authenticate(plaintext: &str, stored_hash: &str) -> bool {
    if stored_hash.is_empty() {
        return false;
    }
    match pwhash::unix::crypt(plaintext, stored_hash) {
        Ok(computed) => {
            let computed = Zeroizing::new(computed);
            constant_time_eq(computed.as_bytes(), stored_hash.as_bytes())
        }
        Err(_) => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
