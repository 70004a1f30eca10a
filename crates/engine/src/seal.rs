//! Password-based sealing of opaque blobs.
//!
//! A sealed blob is `MAGIC | salt (16) | nonce (12) | ciphertext`. The key is
//! derived from the password with Argon2id and the payload is encrypted with
//! AES-256-GCM, so a wrong password and tampered bytes are indistinguishable
//! and both fail with [`EngineError::AuthenticationFailed`].

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use argon2::Argon2;

use crate::{EngineError, ResultEngine};

const MAGIC: &[u8; 4] = b"FLS1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

fn derive_key(password: &str, salt: &[u8]) -> ResultEngine<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|err| EngineError::Storage(format!("key derivation failed: {err}")))?;
    Ok(key)
}

/// `true` when `blob` carries the sealed header.
#[must_use]
pub fn is_sealed(blob: &[u8]) -> bool {
    blob.len() >= HEADER_LEN && blob.starts_with(MAGIC)
}

/// Seals and opens blobs with one password.
///
/// The key for the sealer's own salt is derived once and cached; blobs sealed
/// under another salt (e.g. by an earlier process) are opened by deriving
/// their key on demand.
pub struct Sealer {
    password: String,
    salt: [u8; SALT_LEN],
    cipher: Aes256Gcm,
}

impl fmt::Debug for Sealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sealer").finish_non_exhaustive()
    }
}

impl Sealer {
    pub fn new(password: &str) -> ResultEngine<Self> {
        if password.is_empty() {
            return Err(EngineError::InvalidField(
                "password must not be empty".to_string(),
            ));
        }
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(password, &salt)?;
        Ok(Self {
            password: password.to_string(),
            salt,
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }

    pub fn seal(&self, plain: &[u8]) -> ResultEngine<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plain)
            .map_err(|err| EngineError::Storage(format!("encryption failed: {err}")))?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, blob: &[u8]) -> ResultEngine<Vec<u8>> {
        let (salt, nonce, ciphertext) = split(blob)?;
        if salt == self.salt {
            return decrypt(&self.cipher, nonce, ciphertext);
        }
        open_with_password(&self.password, blob)
    }
}

/// Open a blob sealed by any [`Sealer`] created with `password`.
pub fn open_with_password(password: &str, blob: &[u8]) -> ResultEngine<Vec<u8>> {
    let (salt, nonce, ciphertext) = split(blob)?;
    let key = derive_key(password, salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    decrypt(&cipher, nonce, ciphertext)
}

fn split(blob: &[u8]) -> ResultEngine<(&[u8], &[u8], &[u8])> {
    if !is_sealed(blob) {
        return Err(EngineError::AuthenticationFailed);
    }
    let rest = &blob[MAGIC.len()..];
    let (salt, rest) = rest.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    Ok((salt, nonce, ciphertext))
}

fn decrypt(cipher: &Aes256Gcm, nonce: &[u8], ciphertext: &[u8]) -> ResultEngine<Vec<u8>> {
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EngineError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let sealer = Sealer::new("hunter2").unwrap();
        let blob = sealer.seal(b"ledger state").unwrap();
        assert!(is_sealed(&blob));
        assert_eq!(sealer.open(&blob).unwrap(), b"ledger state");
        assert_eq!(open_with_password("hunter2", &blob).unwrap(), b"ledger state");
    }

    #[test]
    fn sealer_opens_blobs_from_another_salt() {
        let first = Sealer::new("hunter2").unwrap();
        let second = Sealer::new("hunter2").unwrap();
        let blob = first.seal(b"older checkpoint").unwrap();
        assert_eq!(second.open(&blob).unwrap(), b"older checkpoint");
    }

    #[test]
    fn wrong_password_fails_closed() {
        let blob = Sealer::new("hunter2").unwrap().seal(b"secret").unwrap();
        assert_eq!(
            open_with_password("hunter3", &blob),
            Err(EngineError::AuthenticationFailed)
        );
    }

    #[test]
    fn tampered_blob_fails_closed() {
        let sealer = Sealer::new("hunter2").unwrap();
        let mut blob = sealer.seal(b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert_eq!(sealer.open(&blob), Err(EngineError::AuthenticationFailed));
        assert_eq!(
            sealer.open(b"not sealed at all"),
            Err(EngineError::AuthenticationFailed)
        );
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(matches!(
            Sealer::new(""),
            Err(EngineError::InvalidField(_))
        ));
    }
}
