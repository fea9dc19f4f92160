use std::fmt;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::keystore::{KeyStore, KeyStoreError, IV_LENGTH};
use crate::Config;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

// AES block size.  Every valid ciphertext is a non-empty multiple of this.
const BLOCK_LENGTH: usize = 16;

// Shortest token worth attempting to decrypt: one cipher block, hex-encoded.
const MIN_TOKEN_LENGTH: usize = 2 * BLOCK_LENGTH;

/// Error returned for encryption and key material failures.
///
/// Malformed tokens on the decode path are never an error; `deobfuscate`
/// resolves them to `None` because tokens routinely arrive from untrusted
/// client input.
#[derive(Debug)]
pub enum Error {
    EncryptionFailed,
    KeyStore(KeyStoreError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::EncryptionFailed => {
                write!(f, "AES-CBC encryption failed")
            }
            Error::KeyStore(err) => {
                write!(f, "Key store failure: {}", err)
            }
        }
    }
}

impl From<KeyStoreError> for Error {
    fn from(err: KeyStoreError) -> Error {
        Error::KeyStore(err)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::EncryptionFailed => None,
            Error::KeyStore(err) => Some(err),
        }
    }
}

/// Core obfuscator/deobfuscator.
///
/// Holds the effective 256-bit key and, where one exists, the persisted
/// legacy IV.  Both are resolved once at construction; after that the codec
/// is immutable and calls are freely shareable across threads.
pub struct Codec {
    key: [u8; 32],
    legacy_iv: Option<[u8; IV_LENGTH]>,
}

impl Codec {
    /// Creates a new `Codec` from the given configuration.
    ///
    /// The effective key is resolved here, in order: an explicit 32-byte
    /// key is used as-is; a passphrase is hashed with SHA-256; with
    /// neither, a passphrase is loaded from the key store, generated and
    /// persisted on first use.  The legacy IV file is loaded alongside if
    /// present, so tokens issued under the persisted-IV scheme remain
    /// decodable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyStore`] when persisted material cannot be
    /// created or read.  The codec never substitutes an ephemeral key: that
    /// would silently orphan every token issued before the failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaqueid_rs::{Codec, Config};
    ///
    /// let config = Config::with_key(b"an example very very secret key!").unwrap();
    /// let codec = Codec::new(&config).unwrap();
    /// ```
    pub fn new(config: &Config) -> Result<Codec, Error> {
        let store = KeyStore::new(config.key_dir.clone());
        let key = match (&config.explicit_key, &config.passphrase) {
            (Some(key), _) => *key,
            (None, Some(passphrase)) => derive_key(passphrase),
            (None, None) => derive_key(&store.load_or_create_passphrase()?),
        };
        // In the zero-config mode the IV file is persisted alongside the
        // passphrase, matching the deployments this scheme migrated from.
        // With an explicit secret the directory may not be writable, so the
        // IV is only read if it is already there.
        let legacy_iv = if config.explicit_key.is_none() && config.passphrase.is_none() {
            Some(store.load_or_create_iv()?)
        } else {
            store.load_iv()?
        };
        Ok(Codec { key, legacy_iv })
    }

    /// Obfuscates `value` into an opaque hex token.
    ///
    /// A fresh random IV is drawn from the OS CSPRNG for every call and
    /// prepended to the ciphertext, so obfuscating the same value twice
    /// yields different tokens.  The decimal form of the value is encrypted
    /// with AES-256-CBC and the result encoded as `hex(IV ‖ ciphertext)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionFailed`] if the OS random number
    /// generator refuses to produce IV bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaqueid_rs::{Codec, Config};
    ///
    /// let config = Config::with_key(b"an example very very secret key!").unwrap();
    /// let codec = Codec::new(&config).unwrap();
    /// let token = codec.obfuscate(12345).unwrap();
    ///
    /// assert!(token.len() >= 64);
    /// assert_eq!(codec.deobfuscate(&token), Some(12345));
    /// ```
    pub fn obfuscate(&self, value: u64) -> Result<String, Error> {
        let mut iv = [0u8; IV_LENGTH];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|_| Error::EncryptionFailed)?;

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(value.to_string().as_bytes());

        let mut data = Vec::with_capacity(IV_LENGTH + ciphertext.len());
        data.extend_from_slice(&iv);
        data.extend_from_slice(&ciphertext);
        Ok(hex::encode(data))
    }

    /// Deobfuscates a token back into its integer value.
    ///
    /// Never fails hard: a token that cannot be validated or decrypted
    /// resolves to `None`.  Schemes are attempted in order, first match
    /// wins:
    ///
    /// 1. the token's first 16 decoded bytes are taken as the IV and the
    ///    remainder decrypted with the effective key;
    /// 2. the whole decoded token is decrypted with the persisted legacy IV
    ///    and the effective key, if such an IV exists.
    ///
    /// The fallback keeps tokens issued under the earlier persisted-IV
    /// scheme decodable after an upgrade.
    ///
    /// # Examples
    ///
    /// ```
    /// use opaqueid_rs::{Codec, Config};
    ///
    /// let config = Config::with_key(b"an example very very secret key!").unwrap();
    /// let codec = Codec::new(&config).unwrap();
    ///
    /// assert_eq!(codec.deobfuscate("invalidhexstring"), None);
    /// assert_eq!(codec.deobfuscate(""), None);
    /// ```
    pub fn deobfuscate(&self, token: &str) -> Option<u64> {
        if !self.is_obfuscated(token) {
            return None;
        }
        let data = hex::decode(token).ok()?;

        // Current scheme: the IV travels with the token.
        if data.len() > IV_LENGTH {
            let (iv, ciphertext) = data.split_at(IV_LENGTH);
            if let Some(value) = self.try_decrypt(iv, ciphertext) {
                return Some(value);
            }
        }

        // Legacy scheme: a single persisted IV, ciphertext alone in the token.
        if let Some(iv) = self.legacy_iv {
            if let Some(value) = self.try_decrypt(&iv, &data) {
                return Some(value);
            }
        }

        None
    }

    /// Cheap shape check: even number of hex digits, at least one cipher
    /// block long.  A `true` result means the token is worth attempting to
    /// decrypt, not that decryption will succeed.
    pub fn is_obfuscated(&self, token: &str) -> bool {
        token.len() >= MIN_TOKEN_LENGTH
            && token.len() % 2 == 0
            && token.bytes().all(|b| b.is_ascii_hexdigit())
    }

    fn try_decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Option<u64> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LENGTH != 0 {
            return None;
        }
        let plaintext = Aes256CbcDec::new_from_slices(&self.key, iv)
            .ok()?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .ok()?;
        std::str::from_utf8(&plaintext).ok()?.parse().ok()
    }
}

fn derive_key(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}
