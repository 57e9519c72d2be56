//! One logical zip archive that can be closed and reopened for append.
//!
//! Closing writes the central directory, so everything added before a close
//! survives even if a later reopen fails.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("archive session for {} is closed", .0.display())]
    Closed(PathBuf),

    #[error(transparent)]
    Zip(#[from] ZipError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct ArchiveSession {
    path: PathBuf,
    writer: Option<ZipWriter<File>>,
    reopen_count: u64,
}

impl ArchiveSession {
    /// Create (or truncate) the archive at `path` and open it for writing.
    pub fn create(path: &Path) -> Result<Self, SessionError> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(ZipWriter::new(file)),
            reopen_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reopen_count(&self) -> u64 {
        self.reopen_count
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Stream `source` into the archive as `name`. A failure part-way through
    /// removes the partial entry so the archive stays consistent.
    pub fn add_file(
        &mut self,
        source: &Path,
        name: &str,
        options: SimpleFileOptions,
    ) -> Result<(), SessionError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SessionError::Closed(self.path.clone()))?;

        let mut reader = BufReader::new(File::open(source)?);
        writer.start_file(name, options)?;

        if let Err(e) = io::copy(&mut reader, writer) {
            let _ = writer.abort_file();
            return Err(e.into());
        }
        Ok(())
    }

    /// Finish the archive and release the handle. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), SessionError> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        Ok(())
    }

    /// Open the same path again in append mode.
    pub fn reopen(&mut self) -> Result<(), SessionError> {
        self.close()?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.writer = Some(ZipWriter::new_append(file)?);
        self.reopen_count += 1;
        Ok(())
    }
}

impl Drop for ArchiveSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
