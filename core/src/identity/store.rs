// Recovery phrase storage (derived keys are never written out)

use super::{IdentityError, RecoveryPhrase};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Storage backend for the recovery phrase
#[derive(Debug, Clone)]
pub enum PhraseStore {
    Memory,
    File(PathBuf),
}

impl PhraseStore {
    /// Create in-memory storage
    pub fn memory() -> Self {
        Self::Memory
    }

    /// Create file-backed storage at `path`
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    /// Save the phrase
    pub fn save(&self, phrase: &RecoveryPhrase) -> Result<(), IdentityError> {
        match self {
            // In-memory storage doesn't persist
            Self::Memory => Ok(()),
            Self::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = open_private(path)?;
                // an existing file keeps its old mode through open
                restrict_permissions(path)?;
                writeln!(file, "{}", phrase.as_str())?;
                file.sync_all()?;
                Ok(())
            }
        }
    }

    /// Load the phrase, `None` when nothing has been stored yet
    pub fn load(&self) -> Result<Option<RecoveryPhrase>, IdentityError> {
        match self {
            Self::Memory => Ok(None),
            Self::File(path) => {
                if !path.exists() {
                    return Ok(None);
                }
                let contents = std::fs::read_to_string(path)?;
                RecoveryPhrase::parse(&contents).map(Some)
            }
        }
    }

    /// Load the stored phrase or create and store a new one.
    ///
    /// The flag is `true` when a new phrase was created.
    pub fn load_or_create(&self) -> Result<(RecoveryPhrase, bool), IdentityError> {
        if let Some(phrase) = self.load()? {
            tracing::debug!("Loaded recovery phrase");
            return Ok((phrase, false));
        }

        let phrase = RecoveryPhrase::generate();
        self.save(&phrase)?;
        Ok((phrase, true))
    }

    /// Remove the stored phrase
    pub fn clear(&self) -> Result<(), IdentityError> {
        match self {
            Self::Memory => Ok(()),
            Self::File(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

/// Open `path` for writing; a new file is created owner-only from the start
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::File::create(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
