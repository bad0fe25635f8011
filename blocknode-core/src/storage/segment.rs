use crate::error::{BlockError, Result};
use crate::protocol::stream::{COPY_BUFFER_SIZE, copy_exact};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Result of pushing bytes from a source into a segment or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    pub written: u64,
    /// The source reported end-of-data while this write was in progress.
    pub source_exhausted: bool,
}

/// Path of segment `(batch_id, block_id)` inside a chunked file directory.
pub fn segment_path(file_dir: &Path, batch_id: u64, block_id: u64) -> PathBuf {
    file_dir.join(format!("{}.{}.seg", batch_id, block_id))
}

/// A capacity-bounded, append-only file holding one block of a batch.
#[derive(Debug)]
pub struct Segment {
    file_id: u64,
    batch_id: u64,
    block_id: u64,
    capacity: u64,
    path: PathBuf,
    file: Option<File>,
}

impl Segment {
    pub fn new(file_dir: &Path, file_id: u64, batch_id: u64, block_id: u64, capacity: u64) -> Self {
        Self {
            file_id,
            batch_id,
            block_id,
            capacity,
            path: segment_path(file_dir, batch_id, block_id),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Open the backing file, creating it if absent.
    pub async fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        self.file = Some(file);
        Ok(())
    }

    /// Open a backing file that must already exist. A missing file is `NotFound`.
    pub async fn open_existing(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlockError::NotFound(format!("segment {}", self.label())));
            }
            Err(e) => return Err(e.into()),
        };
        self.file = Some(file);
        Ok(())
    }

    /// Copy bytes from `source` until it runs dry or the segment is full.
    ///
    /// End-of-data is reported through [`WriteOutcome::source_exhausted`], not as an error.
    pub async fn write<R>(&mut self, source: &mut R) -> Result<WriteOutcome>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let capacity = self.capacity;
        let label = self.label();
        let file = self.file.as_mut().ok_or(BlockError::NotOpen(label))?;

        let occupied = file.metadata().await?.len();
        let mut free = capacity.saturating_sub(occupied);
        let mut outcome = WriteOutcome::default();

        while free > 0 {
            let chunk = source.fill_buf().await?;
            if chunk.is_empty() {
                outcome.source_exhausted = true;
                break;
            }

            let take = chunk.len().min(free as usize).min(COPY_BUFFER_SIZE);
            let n = file.write(&chunk[..take]).await?;
            if n != take {
                return Err(BlockError::WriteMismatch {
                    read: take,
                    written: n,
                });
            }
            source.consume(n);

            free -= n as u64;
            outcome.written += n as u64;
        }

        file.flush().await?;
        Ok(outcome)
    }

    /// Copy the whole segment content into `sink`.
    pub async fn read<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let label = self.label();
        let file = self.file.as_mut().ok_or(BlockError::NotOpen(label))?;

        let size = file.metadata().await?.len();
        file.seek(SeekFrom::Start(0)).await?;
        copy_exact(file, sink, size).await
    }

    pub async fn size(&self) -> Result<u64> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| BlockError::NotOpen(self.label()))?;
        Ok(file.metadata().await?.len())
    }

    pub async fn is_full(&self) -> Result<bool> {
        Ok(self.size().await? >= self.capacity)
    }

    /// Drop all content and rewind the cursor.
    pub async fn truncate(&mut self) -> Result<()> {
        let label = self.label();
        let file = self.file.as_mut().ok_or(BlockError::NotOpen(label))?;
        file.set_len(0).await?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    /// Close and remove the backing file.
    pub async fn purge(&mut self) -> Result<()> {
        self.close().await?;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn label(&self) -> String {
        format!("{}/{}/{}", self.file_id, self.batch_id, self.block_id)
    }
}
