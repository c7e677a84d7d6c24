//! Opaque token-blob persistence across process runs.

use std::fs::{remove_file, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::auth::token::TokenSnapshot;
use crate::error::{PorscheError, PorscheResult};

/// Storage seam for the token blob. Implementations only move the blob;
/// interpreting it (including noticing it has expired) is the connection's
/// job.
pub trait TokenPersistence: Send + Sync {
    /// Persists the blob; `None` removes any stored one.
    fn save(&self, snapshot: Option<&TokenSnapshot>) -> PorscheResult<()>;
    fn load(&self) -> PorscheResult<Option<TokenSnapshot>>;
}

/// Stores the token blob as a JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenPersistence {
    path: PathBuf,
}

impl FileTokenPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TokenPersistence for FileTokenPersistence {
    fn save(&self, snapshot: Option<&TokenSnapshot>) -> PorscheResult<()> {
        match snapshot {
            Some(snapshot) => {
                let serialized = serde_json::to_string(snapshot).map_err(|err| {
                    PorscheError::Persistence(format!("failed to serialize token blob: {err}"))
                })?;
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        PorscheError::Persistence(format!(
                            "failed to create token directory: {err}"
                        ))
                    })?;
                }
                let mut file = File::create(&self.path).map_err(|err| {
                    PorscheError::Persistence(format!("failed to create token file: {err}"))
                })?;
                file.write_all(serialized.as_bytes()).map_err(|err| {
                    PorscheError::Persistence(format!("failed to write token file: {err}"))
                })?;
            }
            None => {
                if self.path.exists() {
                    remove_file(&self.path).map_err(|err| {
                        PorscheError::Persistence(format!("failed to remove token file: {err}"))
                    })?;
                }
            }
        }
        Ok(())
    }

    fn load(&self) -> PorscheResult<Option<TokenSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path).map_err(|err| {
            PorscheError::Persistence(format!("failed to open token file: {err}"))
        })?;
        let mut buffer = String::new();
        file.read_to_string(&mut buffer).map_err(|err| {
            PorscheError::Persistence(format!("failed to read token file: {err}"))
        })?;

        if buffer.is_empty() {
            return Ok(None);
        }

        let snapshot = serde_json::from_str(&buffer).map_err(|err| {
            PorscheError::Persistence(format!("failed to parse token blob: {err}"))
        })?;
        Ok(Some(snapshot))
    }
}
