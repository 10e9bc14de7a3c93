//! Shared-secret persistence.
//!
//! The master server authenticates game servers with one process-wide secret.
//! It is generated the first time the server starts and reused verbatim on
//! every later start.
//!
//! The generator is `SmallRng`, a fast general-purpose PRNG. It is NOT
//! cryptographically secure, so the secret is only as strong as that
//! generator's output. Callers that need a seeded, reproducible secret pass
//! their own generator through [`FileCredentialStore::with_rng`].

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use shared::{SECRET_ALPHABET, SECRET_LENGTH};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to create credential directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read secret from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write secret to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A loaded secret and whether it was generated by this load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret: String,
    pub fresh: bool,
}

pub trait CredentialStore {
    /// Returns the persisted secret, generating and persisting one if absent
    fn load(&mut self) -> Result<Credential, CredentialError>;

    fn save(&mut self, secret: &str) -> Result<(), CredentialError>;
}

/// Samples `length` symbols uniformly, with replacement, from [`SECRET_ALPHABET`]
pub fn generate_secret<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    let alphabet = SECRET_ALPHABET.as_bytes();
    (0..length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Stores the secret as a raw text file, typically `<data>/auth/keyphrase.passwd`
pub struct FileCredentialStore<R = SmallRng> {
    path: PathBuf,
    rng: R,
}

impl FileCredentialStore<SmallRng> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_rng(path, SmallRng::from_entropy())
    }
}

impl<R: Rng> FileCredentialStore<R> {
    pub fn with_rng(path: impl Into<PathBuf>, rng: R) -> Self {
        Self {
            path: path.into(),
            rng,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| CredentialError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl<R: Rng> CredentialStore for FileCredentialStore<R> {
    fn load(&mut self) -> Result<Credential, CredentialError> {
        self.ensure_parent_dir()?;

        if self.path.is_file() {
            let secret =
                fs::read_to_string(&self.path).map_err(|source| CredentialError::Read {
                    path: self.path.clone(),
                    source,
                })?;
            return Ok(Credential {
                secret,
                fresh: false,
            });
        }

        let secret = generate_secret(&mut self.rng, SECRET_LENGTH);
        self.save(&secret)?;
        Ok(Credential {
            secret,
            fresh: true,
        })
    }

    fn save(&mut self, secret: &str) -> Result<(), CredentialError> {
        self.ensure_parent_dir()?;
        fs::write(&self.path, secret).map_err(|source| CredentialError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Keeps the secret in memory only. Handy for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    secret: Option<String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&mut self) -> Result<Credential, CredentialError> {
        if let Some(secret) = &self.secret {
            return Ok(Credential {
                secret: secret.clone(),
                fresh: false,
            });
        }

        let secret = generate_secret(&mut SmallRng::from_entropy(), SECRET_LENGTH);
        self.secret = Some(secret.clone());
        Ok(Credential {
            secret,
            fresh: true,
        })
    }

    fn save(&mut self, secret: &str) -> Result<(), CredentialError> {
        self.secret = Some(secret.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keyphrase_path(dir: &TempDir) -> PathBuf {
        dir.path().join("auth").join("keyphrase.passwd")
    }

    #[test]
    fn test_generate_secret_uses_alphabet() {
        let mut rng = SmallRng::seed_from_u64(7);
        let secret = generate_secret(&mut rng, SECRET_LENGTH);

        assert_eq!(secret.chars().count(), 256);
        assert!(secret.chars().all(|c| SECRET_ALPHABET.contains(c)));
    }

    #[test]
    fn test_generate_secret_is_deterministic_for_seed() {
        let first = generate_secret(&mut SmallRng::seed_from_u64(42), 64);
        let second = generate_secret(&mut SmallRng::seed_from_u64(42), 64);
        let other = generate_secret(&mut SmallRng::seed_from_u64(43), 64);

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_load_creates_then_reloads() {
        let dir = TempDir::new().unwrap();
        let path = keyphrase_path(&dir);

        let mut store = FileCredentialStore::with_rng(&path, SmallRng::seed_from_u64(1));
        let created = store.load().unwrap();
        assert!(created.fresh);
        assert_eq!(created.secret.len(), SECRET_LENGTH);
        assert!(created.secret.chars().all(|c| SECRET_ALPHABET.contains(c)));
        assert_eq!(fs::read_to_string(&path).unwrap(), created.secret);

        // A new store stands in for a restarted process
        let mut restarted = FileCredentialStore::new(&path);
        let loaded = restarted.load().unwrap();
        assert!(!loaded.fresh);
        assert_eq!(loaded.secret, created.secret);
    }

    #[test]
    fn test_load_returns_existing_file_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = keyphrase_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "hunter2\n").unwrap();

        let mut store = FileCredentialStore::new(&path);
        let loaded = store.load().unwrap();
        assert_eq!(loaded.secret, "hunter2\n");
        assert!(!loaded.fresh);
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = keyphrase_path(&dir);

        let mut store = FileCredentialStore::new(&path);
        store.save("first").unwrap();
        store.save("second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(store.load().unwrap().secret, "second");
    }

    #[test]
    fn test_load_fails_when_parent_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("auth");
        fs::write(&blocker, "not a directory").unwrap();

        let mut store = FileCredentialStore::new(blocker.join("keyphrase.passwd"));
        assert!(store.load().is_err());
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryCredentialStore::new();
        let created = store.load().unwrap();
        assert!(created.fresh);

        let loaded = store.load().unwrap();
        assert!(!loaded.fresh);
        assert_eq!(loaded.secret, created.secret);

        let mut preset = MemoryCredentialStore::with_secret("hunter2");
        assert_eq!(preset.load().unwrap().secret, "hunter2");
    }
}
