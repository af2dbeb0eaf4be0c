//! End-to-end envelope encryption.
//!
//! Payloads are sealed with the `box` construction: X25519 key agreement
//! plus XSalsa20-Poly1305. The wire envelope is the 24-byte random nonce
//! followed by the ciphertext, so an envelope is self-describing and the
//! relay can treat it as an opaque byte string.

use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};
use thiserror::Error;
use zeroize::Zeroizing;

/// Public and private key length in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Nonce length prepended to every envelope.
pub const NONCE_SIZE: usize = 24;
/// Poly1305 authentication tag length.
pub const TAG_SIZE: usize = 16;
/// Routing key ID length: the leading bytes of a public key.
pub const KEY_ID_SIZE: usize = 8;

/// Crypto failures. Decryption failures carry no detail on purpose.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Sealing the payload failed.
    #[error("encryption failed")]
    Encrypt,

    /// The envelope did not authenticate or is too short.
    #[error("decryption failed: authentication error")]
    Decrypt,

    /// A public key had the wrong length.
    #[error("invalid public key length: expected {PUBLIC_KEY_SIZE}, got {0}")]
    InvalidKey(usize),
}

/// A node's long-lived X25519 key pair. The public key is the node's
/// identity; the private key never leaves this struct except through
/// [`KeyPair::private_bytes`], and is wiped from memory on drop
/// (`SecretKey` zeroizes itself).
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Rebuild a key pair from stored private key bytes. The public key is
    /// derived deterministically.
    pub fn from_private_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// The 32-byte public key.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// The private key bytes, for persistent storage. Store them securely;
    /// the returned buffer is zeroed when dropped.
    pub fn private_bytes(&self) -> Zeroizing<[u8; PUBLIC_KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// The routing key ID: the first 8 bytes of the public key.
    pub fn key_id(&self) -> [u8; KEY_ID_SIZE] {
        key_id(&self.public_bytes())
    }

    /// Seal `plaintext` for `recipient`, returning `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8], recipient: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let recipient = public_key(recipient)?;
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = SalsaBox::new(&recipient, &self.secret)
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Open a `nonce || ciphertext` envelope sealed by `sender` for us.
    pub fn open(&self, envelope: &[u8], sender: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if envelope.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decrypt);
        }
        let sender = public_key(sender)?;
        let (nonce, ciphertext) = envelope.split_at(NONCE_SIZE);
        SalsaBox::new(&sender, &self.secret)
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

// Don't leak key material in debug output
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_bytes())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// The routing key ID for an arbitrary 32-byte public key.
pub fn key_id(public: &[u8; PUBLIC_KEY_SIZE]) -> [u8; KEY_ID_SIZE] {
    let mut id = [0u8; KEY_ID_SIZE];
    id.copy_from_slice(&public[..KEY_ID_SIZE]);
    id
}

fn public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let array: [u8; PUBLIC_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(bytes.len()))?;
    Ok(PublicKey::from(array))
}
