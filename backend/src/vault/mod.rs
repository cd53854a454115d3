//! # Key Vault
//!
//! Issues one ephemeral signing key per payment and keeps it encrypted at
//! rest. The plaintext key exists only twice in the lifetime of a payment:
//! right after generation (long enough to derive the address and encrypt
//! it) and inside a sweep's signing step.
//!
//! ## Encrypted Key Layout
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────────────┐
//! │ nonce (12 B) │  tag (16 B)  │  ciphertext (32 B)     │
//! └──────────────┴──────────────┴────────────────────────┘
//!            AES-256-GCM, base64 encoded for storage
//! ```
//!
//! Every encryption uses a fresh random nonce, so the blob is
//! self-contained: decryption needs only the blob and the master key.

pub mod address;

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{rand, All, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;
use tracing::{debug, error};
use zeroize::Zeroizing;

pub use address::{AddressError, Network};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MASTER_KEY_LEN: usize = 32;

/// Errors raised by the key vault.
#[derive(Error, Debug)]
pub enum KeyVaultError {
    /// The master key is missing bytes or is not hex.
    #[error("Invalid master key: {0}")]
    InvalidMasterKey(String),

    /// Authentication tag did not verify (tampered blob or wrong master key).
    #[error("Encrypted key failed authentication")]
    Decryption,

    /// AEAD encryption failed.
    #[error("Failed to encrypt key material")]
    Encryption,

    /// Decrypted bytes are not a valid secp256k1 secret key.
    #[error("Decrypted key material is not a valid secret key")]
    InvalidKeyMaterial,

    /// Address derivation failed.
    #[error(transparent)]
    Address(#[from] AddressError),
}

/// The process-wide symmetric key protecting every payment key.
///
/// Loaded once at startup from `MASTER_KEY` (64 hex characters).
#[derive(Clone)]
pub struct MasterKey(Zeroizing<[u8; MASTER_KEY_LEN]>);

impl MasterKey {
    /// Parse a master key from its hex representation.
    pub fn from_hex(value: &str) -> Result<Self, KeyVaultError> {
        let bytes = Zeroizing::new(
            hex::decode(value.trim())
                .map_err(|e| KeyVaultError::InvalidMasterKey(format!("not hex: {}", e)))?,
        );

        if bytes.len() != MASTER_KEY_LEN {
            return Err(KeyVaultError::InvalidMasterKey(format!(
                "expected {} bytes, got {}",
                MASTER_KEY_LEN,
                bytes.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Ciphertext of a payment's private key, in its stored (base64) form.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedKey(String);

impl EncryptedKey {
    /// Wrap a value read back from the payment store.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedKey({} chars)", self.0.len())
    }
}

/// A freshly issued receiving address and its encrypted key.
#[derive(Debug, Clone)]
pub struct IssuedAddress {
    pub address: String,
    pub encrypted_key: EncryptedKey,
}

/// Generates, encrypts and (transiently) decrypts payment keys.
///
/// ## Usage
///
/// ```rust,ignore
/// let vault = KeyVault::new(&config.master_key, config.network);
/// let issued = vault.create_address()?;
///
/// // Later, inside a sweep:
/// let signature = vault.with_secret_key(&issued.encrypted_key, |sk| sign(sk))?;
/// ```
#[derive(Clone)]
pub struct KeyVault {
    cipher: Aes256Gcm,
    network: Network,
    secp: Secp256k1<All>,
}

impl KeyVault {
    pub fn new(master_key: &MasterKey, network: Network) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(master_key.0.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
            network,
            secp: Secp256k1::new(),
        }
    }

    /// Network the vault issues addresses for.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Shared secp256k1 context, reused by the sweep signer.
    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    /// Generate a new key pair and return its address with the encrypted key.
    ///
    /// The plaintext secret is erased before this returns.
    pub fn create_address(&self) -> Result<IssuedAddress, KeyVaultError> {
        let (mut secret_key, public_key) = self.secp.generate_keypair(&mut rand::thread_rng());

        let address = address::p2wpkh_address(&CompressedPublicKey(public_key), self.network);
        let encrypted = Zeroizing::new(secret_key.secret_bytes());
        secret_key.non_secure_erase();

        let address = address?;
        let encrypted_key = self.encrypt(encrypted.as_slice())?;

        debug!(address = %address, "Issued receiving address");
        Ok(IssuedAddress {
            address,
            encrypted_key,
        })
    }

    /// Encrypt raw key bytes into the `nonce ‖ tag ‖ ciphertext` blob.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedKey, KeyVaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| KeyVaultError::Encryption)?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        let mut blob = Vec::with_capacity(NONCE_LEN + TAG_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&tag);
        blob.extend_from_slice(&sealed);

        Ok(EncryptedKey(BASE64.encode(blob)))
    }

    /// Decrypt a stored key blob.
    ///
    /// Fails with [`KeyVaultError::Decryption`] if the blob was altered in any
    /// way or was sealed under a different master key. The returned buffer is
    /// zeroed when dropped.
    pub fn decrypt(&self, encrypted: &EncryptedKey) -> Result<Zeroizing<Vec<u8>>, KeyVaultError> {
        let blob = BASE64
            .decode(encrypted.as_str())
            .map_err(|_| KeyVaultError::Decryption)?;

        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(KeyVaultError::Decryption);
        }

        let (nonce, rest) = blob.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| {
                error!(target: "security", "Encrypted payment key failed authentication");
                KeyVaultError::Decryption
            })
    }

    /// Run `sign` with the decrypted secret key of a payment.
    ///
    /// The key only lives for the duration of the closure and is erased
    /// afterwards, whatever the closure returns.
    pub fn with_secret_key<T>(
        &self,
        encrypted: &EncryptedKey,
        sign: impl FnOnce(&SecretKey, &PublicKey) -> T,
    ) -> Result<T, KeyVaultError> {
        let raw = self.decrypt(encrypted)?;
        let mut secret_key =
            SecretKey::from_slice(&raw).map_err(|_| KeyVaultError::InvalidKeyMaterial)?;
        let public_key = PublicKey::from_secret_key(&self.secp, &secret_key);

        let out = sign(&secret_key, &public_key);
        secret_key.non_secure_erase();

        Ok(out)
    }
}
