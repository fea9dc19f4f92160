use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Mutex;

static GLOBAL_CONFIG: Lazy<Mutex<Option<Config>>> = Lazy::new(|| Mutex::new(None));

// Default directory for persisted key material, relative to the working
// directory.  Deployments should point this somewhere stable with
// `key_dir`.
const DEFAULT_KEY_DIR: &str = "var";

/// Configuring the opaqueid library.
///
/// A configuration picks exactly one key source:
/// - an explicit 32-byte key, used directly as the AES-256 key;
/// - a passphrase of any length, hashed with SHA-256 into the key;
/// - neither, in which case a random passphrase is generated on first use
///   and persisted under the key store directory.
#[derive(Clone)]
pub struct Config {
    pub(crate) explicit_key: Option<[u8; 32]>,
    pub(crate) passphrase: Option<String>,
    pub(crate) key_dir: PathBuf,
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    InvalidKeyLength,
}

impl Config {
    /// Creates a configuration with no explicit secret.  The key is
    /// managed by the key store: generated once, persisted, and re-read on
    /// subsequent runs.
    pub fn new() -> Self {
        Config {
            explicit_key: None,
            passphrase: None,
            key_dir: PathBuf::from(DEFAULT_KEY_DIR),
        }
    }

    /// Creates a configuration with an explicit AES-256 key.
    /// The key must be exactly 32 bytes.
    pub fn with_key(key: &[u8]) -> Result<Self, ConfigError> {
        let key: [u8; 32] = key.try_into().map_err(|_| ConfigError::InvalidKeyLength)?;
        Ok(Config {
            explicit_key: Some(key),
            ..Config::new()
        })
    }

    /// Creates a configuration with a passphrase.  The effective key is
    /// the SHA-256 hash of the passphrase, so any length is acceptable.
    pub fn with_passphrase(passphrase: &str) -> Self {
        Config {
            passphrase: Some(passphrase.to_string()),
            ..Config::new()
        }
    }

    /// Sets the directory where generated key material is persisted (and
    /// where the legacy IV file is looked up).
    pub fn key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = dir.into();
        self
    }

    /// Sets the global configuration. This should be called before the `Field` type methods
    /// are called.
    pub fn set_global(config: Config) {
        let mut global_config = GLOBAL_CONFIG.lock().unwrap();
        *global_config = Some(config);
    }

    /// Accesses the global configuration, if set.
    pub fn global() -> Option<Config> {
        GLOBAL_CONFIG.lock().unwrap().clone()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_is_validated() {
        assert!(Config::with_key(&[0u8; 32]).is_ok());
        assert!(matches!(
            Config::with_key(&[0u8; 31]),
            Err(ConfigError::InvalidKeyLength)
        ));
        assert!(matches!(
            Config::with_key(&[0u8; 33]),
            Err(ConfigError::InvalidKeyLength)
        ));
        assert!(matches!(
            Config::with_key(b""),
            Err(ConfigError::InvalidKeyLength)
        ));
    }
}
