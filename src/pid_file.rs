use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

// Liveness marker of the running daemon
pub const PID_FILE: &str = "/tmp/omen-fand.PID";

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("Failed to access PID file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("PID file {path:?} holds an invalid PID \"{content}\"")]
    Invalid { path: PathBuf, content: String },
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    // Write the given PID, replacing any previous content
    pub fn create(&self, pid: u32) -> Result<(), PidFileError> {
        fs::write(&self.path, pid.to_string()).map_err(|e| self.io_err(e))
    }

    // Return the stored PID, None if there is no marker
    pub fn read(&self) -> Result<Option<u32>, PidFileError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_err(err)),
        };

        content
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PidFileError::Invalid {
                path: self.path.clone(),
                content: content.trim().to_string(),
            })
    }

    pub fn remove(&self) -> Result<(), PidFileError> {
        fs::remove_file(&self.path).map_err(|e| self.io_err(e))
    }

    fn io_err(&self, source: io::Error) -> PidFileError {
        PidFileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Default for PidFile {
    fn default() -> Self {
        Self::new(Path::new(PID_FILE))
    }
}
