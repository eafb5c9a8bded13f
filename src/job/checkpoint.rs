use std::{
    collections::BTreeSet,
    io::ErrorKind,
    path::PathBuf,
};

use itertools::Itertools as _;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read checkpoint {path:?}: {error}")]
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to persist checkpoint {path:?}: {error}")]
    Write {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to remove checkpoint {path:?}: {error}")]
    Remove {
        path: PathBuf,
        error: std::io::Error,
    },
}

/// Ids of the points already processed for one output file, one per line.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    processed: BTreeSet<String>,
}

impl Checkpoint {
    pub fn new(path: PathBuf, processed: BTreeSet<String>) -> Self {
        Self { path, processed }
    }

    /// A missing file is an empty checkpoint.
    pub async fn load(path: PathBuf) -> Result<Self, Error> {
        let processed = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|pid| !pid.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
            Err(error) if error.kind() == ErrorKind::NotFound => BTreeSet::new(),
            Err(error) => return Err(Error::Read { path, error }),
        };
        info!(?path, processed = processed.len(), "loaded checkpoint");
        Ok(Self { path, processed })
    }

    pub fn processed(&self) -> &BTreeSet<String> {
        &self.processed
    }

    /// Ids are compared without surrounding whitespace, as they are stored.
    pub fn contains(&self, pid: &str) -> bool {
        self.processed.contains(pid.trim())
    }

    /// Mark `pid` as processed and persist the whole set.
    pub async fn record(&mut self, pid: &str) -> Result<(), Error> {
        self.processed.insert(pid.trim().to_owned());
        self.persist().await
    }

    async fn persist(&self) -> Result<(), Error> {
        let write_error = |error| Error::Write {
            path: self.path.clone(),
            error,
        };
        if let Some(parent) = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let mut text = self.processed.iter().join("\n");
        text.push('\n');
        let mut temporary = self.path.as_os_str().to_owned();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);
        tokio::fs::write(&temporary, text).await.map_err(write_error)?;
        tokio::fs::rename(&temporary, &self.path)
            .await
            .map_err(write_error)?;
        debug!(path = ?self.path, processed = self.processed.len(), "saved checkpoint");
        Ok(())
    }

    /// Delete the file once the job has completed.
    pub async fn discard(self) -> Result<(), Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = ?self.path, "removed checkpoint");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(Error::Remove {
                path: self.path,
                error,
            }),
        }
    }
}
