//! Scoped staging of query images.
//!
//! An upload is written to a named temp file before extraction. The file is
//! owned by a [`StagedImage`] and removed when it is dropped, so success,
//! failure, panic and task cancellation all clean up the same way.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::ExtractError;

const STAGE_PREFIX: &str = "vismatch-query-";
const CHUNK_SIZE: usize = 64 * 1024;

/// Creates staged copies of query images.
#[derive(Debug, Clone)]
pub struct Stager {
    /// Directory for temp files; the system temp dir when `None`
    dir: Option<PathBuf>,
    max_bytes: u64,
}

impl Stager {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            dir: None,
            max_bytes,
        }
    }

    /// Stage into `dir` instead of the system temp dir.
    pub fn in_dir(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: Some(dir.into()),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn temp_file(&self) -> Result<NamedTempFile, ExtractError> {
        let mut builder = Builder::new();
        builder.prefix(STAGE_PREFIX);
        let file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }

    /// Stage an in-memory upload.
    pub fn stage_bytes(&self, bytes: &[u8]) -> Result<StagedImage, ExtractError> {
        self.check_len(bytes.len() as u64)?;
        if bytes.is_empty() {
            return Err(ExtractError::UnreadableImage("empty upload".to_string()));
        }
        let mut file = self.temp_file()?;
        file.write_all(bytes)?;
        file.flush()?;
        debug!(path = ?file.path(), bytes = bytes.len(), "Staged query image");
        Ok(StagedImage {
            file,
            len: bytes.len() as u64,
        })
    }

    /// Stream an upload into a temp file, enforcing the size limit.
    ///
    /// A partially written file is removed if the stream fails, exceeds the
    /// limit, or the future is dropped.
    pub async fn stage_reader<R>(&self, mut reader: R) -> Result<StagedImage, ExtractError>
    where
        R: AsyncRead + Unpin,
    {
        let file = self.temp_file()?;
        let mut out = tokio::fs::File::from_std(file.reopen()?);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut len: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            len += n as u64;
            self.check_len(len)?;
            out.write_all(&buf[..n]).await?;
        }
        out.flush().await?;

        if len == 0 {
            return Err(ExtractError::UnreadableImage("empty upload".to_string()));
        }
        debug!(path = ?file.path(), bytes = len, "Staged query image");
        Ok(StagedImage { file, len })
    }

    fn check_len(&self, len: u64) -> Result<(), ExtractError> {
        if len > self.max_bytes {
            return Err(ExtractError::UnreadableImage(format!(
                "upload exceeds {} bytes",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

/// A query image on disk; the file is deleted on drop.
#[derive(Debug)]
pub struct StagedImage {
    file: NamedTempFile,
    len: u64,
}

impl StagedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>, ExtractError> {
        Ok(std::fs::read(self.file.path())?)
    }
}
