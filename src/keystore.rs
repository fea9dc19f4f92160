use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;

/// Key material file names.  These are fixed: earlier deployments of this
/// component wrote the same files, and their tokens are only decodable if
/// we keep reading the same layout.
pub(crate) const KEY_FILE: &str = "obfuscate_key.txt";
pub(crate) const IV_FILE: &str = "obfuscate_iv.bin";

/// Length of a CBC initialization vector (one AES block).
pub(crate) const IV_LENGTH: usize = 16;

// The generated passphrase is 16 random bytes, stored hex-encoded.  The
// hex *string* is the passphrase; it is hashed, never hex-decoded, to
// derive the effective key.
const PASSPHRASE_BYTES: usize = 16;

/// Error returned for persisted key material failures.
#[derive(Debug)]
pub enum KeyStoreError {
    CreateDir { path: PathBuf, source: io::Error },
    Read { path: PathBuf, source: io::Error },
    Write { path: PathBuf, source: io::Error },
    Corrupt { path: PathBuf },
}

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyStoreError::CreateDir { path, .. } => {
                write!(f, "Failed to create key store directory {}", path.display())
            }
            KeyStoreError::Read { path, .. } => {
                write!(f, "Failed to read key material from {}", path.display())
            }
            KeyStoreError::Write { path, .. } => {
                write!(f, "Failed to write key material to {}", path.display())
            }
            KeyStoreError::Corrupt { path } => {
                write!(f, "Key material in {} is corrupt", path.display())
            }
        }
    }
}

impl std::error::Error for KeyStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KeyStoreError::CreateDir { source, .. }
            | KeyStoreError::Read { source, .. }
            | KeyStoreError::Write { source, .. } => Some(source),
            KeyStoreError::Corrupt { .. } => None,
        }
    }
}

/// Filesystem-backed storage for generated key material.
///
/// Used in the zero-config mode, where no explicit key or passphrase was
/// supplied: a random passphrase is generated on first use and persisted so
/// tokens stay decodable across restarts.  The legacy single-IV file lives
/// in the same directory.
///
/// Creation is safe against concurrent first use.  The file is created with
/// `create_new`, and a loser of the creation race adopts the winner's value
/// instead of persisting a second, conflicting secret.  I/O failures are
/// fatal; continuing with an ephemeral key would permanently orphan every
/// token issued before the restart.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Creates a key store rooted at `dir`.  Nothing is touched on disk
    /// until material is loaded or created.
    pub fn new(dir: impl Into<PathBuf>) -> KeyStore {
        KeyStore { dir: dir.into() }
    }

    /// Loads the persisted passphrase, generating and persisting a new one
    /// on first use.
    pub fn load_or_create_passphrase(&self) -> Result<String, KeyStoreError> {
        let path = self.dir.join(KEY_FILE);
        if path.exists() {
            return read_passphrase(&path);
        }

        self.ensure_dir()?;
        let mut raw = [0u8; PASSPHRASE_BYTES];
        OsRng.fill_bytes(&mut raw);
        let passphrase = hex::encode(raw);

        match create_exclusive(&path, passphrase.as_bytes()) {
            Ok(true) => {
                tracing::debug!(path = %path.display(), "generated new obfuscation passphrase");
                Ok(passphrase)
            }
            Ok(false) => {
                // A concurrent creator won the race; every process must end
                // up with the same persisted value.
                tracing::warn!(
                    path = %path.display(),
                    "lost passphrase creation race, adopting existing file"
                );
                read_passphrase(&path)
            }
            Err(source) => Err(KeyStoreError::Write { path, source }),
        }
    }

    /// Loads the persisted legacy IV, generating and persisting one on
    /// first use.  The file holds exactly 16 raw bytes, no encoding.
    pub fn load_or_create_iv(&self) -> Result<[u8; IV_LENGTH], KeyStoreError> {
        let path = self.dir.join(IV_FILE);
        if path.exists() {
            return read_iv(&path);
        }

        self.ensure_dir()?;
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);

        match create_exclusive(&path, &iv) {
            Ok(true) => {
                tracing::debug!(path = %path.display(), "persisted new legacy IV");
                Ok(iv)
            }
            Ok(false) => {
                tracing::warn!(
                    path = %path.display(),
                    "lost IV creation race, adopting existing file"
                );
                read_iv(&path)
            }
            Err(source) => Err(KeyStoreError::Write { path, source }),
        }
    }

    /// Loads the persisted legacy IV if one exists.  Never creates the
    /// file; used when an explicit key or passphrase is configured and the
    /// key store directory may not even be writable.
    pub fn load_iv(&self) -> Result<Option<[u8; IV_LENGTH]>, KeyStoreError> {
        let path = self.dir.join(IV_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_iv(&path).map(Some)
    }

    fn ensure_dir(&self) -> Result<(), KeyStoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| KeyStoreError::CreateDir {
            path: self.dir.clone(),
            source,
        })
    }
}

fn read_passphrase(path: &Path) -> Result<String, KeyStoreError> {
    let text = fs::read_to_string(path).map_err(|source| KeyStoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(KeyStoreError::Corrupt {
            path: path.to_path_buf(),
        });
    }
    Ok(trimmed.to_string())
}

fn read_iv(path: &Path) -> Result<[u8; IV_LENGTH], KeyStoreError> {
    let bytes = fs::read(path).map_err(|source| KeyStoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    <[u8; IV_LENGTH]>::try_from(bytes.as_slice()).map_err(|_| KeyStoreError::Corrupt {
        path: path.to_path_buf(),
    })
}

// Returns Ok(false) if another process created the file first.
fn create_exclusive(path: &Path, contents: &[u8]) -> io::Result<bool> {
    match fs::OpenOptions::new().create_new(true).write(true).open(path) {
        Ok(mut file) => {
            // Restrict to the owner before any secret bytes land in the file.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(contents)?;
            file.sync_all()?;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        let first = store.load_or_create_passphrase().unwrap();
        assert_eq!(first.len(), 2 * PASSPHRASE_BYTES);
        assert!(first.bytes().all(|b| b.is_ascii_hexdigit()));

        // A fresh store over the same directory sees the same value.
        let second = KeyStore::new(dir.path())
            .load_or_create_passphrase()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_existing_passphrase_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(KEY_FILE), "deadbeefdeadbeef\n").unwrap();

        let store = KeyStore::new(dir.path());
        assert_eq!(
            store.load_or_create_passphrase().unwrap(),
            "deadbeefdeadbeef"
        );
    }

    #[test]
    fn test_iv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        let iv = store.load_or_create_iv().unwrap();
        assert_eq!(KeyStore::new(dir.path()).load_or_create_iv().unwrap(), iv);
        assert_eq!(store.load_iv().unwrap(), Some(iv));

        // Raw bytes on disk, not hex.
        let on_disk = fs::read(dir.path().join(IV_FILE)).unwrap();
        assert_eq!(on_disk, iv);
    }

    #[test]
    fn test_missing_iv_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(KeyStore::new(dir.path()).load_iv().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_iv_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(IV_FILE), [1u8, 2, 3]).unwrap();

        let store = KeyStore::new(dir.path());
        assert!(matches!(
            store.load_or_create_iv(),
            Err(KeyStoreError::Corrupt { .. })
        ));
        assert!(matches!(
            store.load_iv(),
            Err(KeyStoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_empty_passphrase_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(KEY_FILE), "  \n").unwrap();

        let store = KeyStore::new(dir.path());
        assert!(matches!(
            store.load_or_create_passphrase(),
            Err(KeyStoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_unwritable_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        // The key store directory path runs through a regular file, so
        // directory creation must fail rather than fall back to an
        // ephemeral key.
        let store = KeyStore::new(blocker.join("sub"));
        assert!(matches!(
            store.load_or_create_passphrase(),
            Err(KeyStoreError::CreateDir { .. })
        ));
    }

    #[test]
    fn test_concurrent_first_use_converges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    KeyStore::new(path).load_or_create_passphrase().unwrap()
                })
            })
            .collect();

        let mut values: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        values.dedup();
        assert_eq!(values.len(), 1);
    }
}
