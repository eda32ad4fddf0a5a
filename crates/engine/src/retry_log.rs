//! File-backed log of updates the database refused
//!
//! Each line is one fully materialized update statement. Lines are appended when a push job
//! cannot write its outcome, replayed before the next dispatch, and removed once applied.
//! All access goes through one async mutex so appends from concurrent jobs never interleave
//! with a rewrite.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Retry log errors
#[derive(Debug, thiserror::Error)]
pub enum RetryLogError {
    #[error("retry log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only file of pending update statements
#[derive(Debug)]
pub struct RetryLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RetryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a statement unless the identical line is already present
    ///
    /// Returns `true` when the line was written.
    pub async fn append(&self, statement: &str) -> Result<bool, RetryLogError> {
        let line = single_line(statement);
        let _guard = self.lock.lock().await;

        if self.read_lines().await?.iter().any(|existing| *existing == line) {
            debug!(path = %self.path.display(), "statement already in retry log");
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        warn!(path = %self.path.display(), statement = %line, "statement written to retry log");
        Ok(true)
    }

    /// Distinct non-empty lines in file order; a missing file is an empty log
    pub async fn read_pending(&self) -> Result<Vec<String>, RetryLogError> {
        let _guard = self.lock.lock().await;
        let mut seen = HashSet::new();
        Ok(self
            .read_lines()
            .await?
            .into_iter()
            .filter(|line| seen.insert(line.clone()))
            .collect())
    }

    /// Remove every occurrence of a line; removing an absent line is a no-op
    pub async fn remove(&self, statement: &str) -> Result<(), RetryLogError> {
        let target = single_line(statement);
        let _guard = self.lock.lock().await;

        let lines = self.read_lines().await?;
        let kept: Vec<&String> = lines.iter().filter(|line| **line != target).collect();
        if kept.len() == lines.len() {
            return Ok(());
        }

        let mut contents = String::new();
        for line in kept {
            contents.push_str(line);
            contents.push('\n');
        }
        fs::write(&self.path, contents)
            .await
            .map_err(|e| self.io_error(e))
    }

    async fn read_lines(&self) -> Result<Vec<String>, RetryLogError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> RetryLogError {
        RetryLogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn single_line(statement: &str) -> String {
    statement
        .lines()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
