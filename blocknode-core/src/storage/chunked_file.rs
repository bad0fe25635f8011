use crate::error::{BlockError, Result};
use crate::storage::batch::Batch;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};

/// Structural description of a chunked file.
///
/// Enough to regenerate every batch and segment address without touching the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLayout {
    pub file_id: u64,
    pub batch_size: usize,
    pub block_size: u64,
    pub batch_count: u64,
}

/// A logical append-only byte stream spread over a growing list of batches.
#[derive(Debug)]
pub struct ChunkedFile {
    file_id: u64,
    dir: PathBuf,
    batch_size: usize,
    block_size: u64,
    batches: Vec<Batch>,
}

/// Directory holding every segment of file `file_id`.
pub fn file_dir(base_dir: &Path, file_id: u64) -> PathBuf {
    base_dir.join(file_id.to_string())
}

impl ChunkedFile {
    /// Start a new, empty file. Leftover segments from an earlier file with the same id
    /// are removed.
    pub async fn create(
        base_dir: &Path,
        file_id: u64,
        batch_size: usize,
        block_size: u64,
    ) -> Result<Self> {
        validate_geometry(batch_size, block_size)?;

        let dir = file_dir(base_dir, file_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::debug!("Removed stale segments of file {}", file_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&dir).await?;

        Ok(Self {
            file_id,
            dir,
            batch_size,
            block_size,
            batches: Vec::new(),
        })
    }

    /// Rebuild a file from its layout without touching the disk. Nothing is open yet;
    /// only `purge` is meaningful on the result.
    pub fn from_layout(base_dir: &Path, layout: &FileLayout) -> Result<Self> {
        validate_geometry(layout.batch_size, layout.block_size)?;

        let mut file = Self {
            file_id: layout.file_id,
            dir: file_dir(base_dir, layout.file_id),
            batch_size: layout.batch_size,
            block_size: layout.block_size,
            batches: Vec::with_capacity(layout.batch_count as usize),
        };
        for batch_id in 0..layout.batch_count {
            let batch = file.new_batch(batch_id);
            file.batches.push(batch);
        }
        Ok(file)
    }

    /// Rebuild a file from its layout and open every batch for appending. Missing
    /// segments are created.
    pub async fn reopen(base_dir: &Path, layout: &FileLayout) -> Result<Self> {
        let mut file = Self::from_layout(base_dir, layout)?;
        for batch in &mut file.batches {
            batch.open().await?;
        }
        Ok(file)
    }

    /// Open a previously written file for reading. Fails with `NotFound` if any segment
    /// is gone, and never creates anything.
    pub async fn open_existing(base_dir: &Path, layout: &FileLayout) -> Result<Self> {
        let mut file = Self::from_layout(base_dir, layout)?;
        for batch in &mut file.batches {
            batch.open_existing().await?;
        }
        Ok(file)
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn batch_count(&self) -> u64 {
        self.batches.len() as u64
    }

    pub fn layout(&self) -> FileLayout {
        FileLayout {
            file_id: self.file_id,
            batch_size: self.batch_size,
            block_size: self.block_size,
            batch_count: self.batch_count(),
        }
    }

    /// Append everything `source` yields, adding batches as the existing ones fill up.
    pub async fn write<R>(&mut self, source: &mut R) -> Result<u64>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let mut total = 0u64;

        for batch in &mut self.batches {
            let outcome = batch.write(source).await?;
            total += outcome.written;
            if outcome.source_exhausted {
                return Ok(total);
            }
        }

        loop {
            // Only grow when there is something left to put in the new batch.
            if source.fill_buf().await?.is_empty() {
                return Ok(total);
            }

            let mut batch = self.new_batch(self.batch_count());
            batch.open().await?;
            tracing::debug!(
                "Opened batch {} of file {} ({} bytes written so far)",
                batch.batch_id(),
                self.file_id,
                total
            );

            let outcome = batch.write(source).await;
            self.batches.push(batch);

            let outcome = outcome?;
            total += outcome.written;
            if outcome.source_exhausted {
                return Ok(total);
            }
        }
    }

    pub async fn read<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0;
        for batch in &mut self.batches {
            total += batch.read(sink).await?;
        }
        Ok(total)
    }

    pub async fn size(&self) -> Result<u64> {
        let mut total = 0;
        for batch in &self.batches {
            total += batch.size().await?;
        }
        Ok(total)
    }

    pub async fn close(&mut self) -> Result<()> {
        for batch in &mut self.batches {
            batch.close().await?;
        }
        Ok(())
    }

    pub async fn truncate(&mut self) -> Result<()> {
        for batch in &mut self.batches {
            batch.truncate().await?;
        }
        Ok(())
    }

    /// Remove every segment and the file directory itself.
    pub async fn purge(&mut self) -> Result<()> {
        for batch in &mut self.batches {
            batch.purge().await?;
        }
        self.batches.clear();

        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn new_batch(&self, batch_id: u64) -> Batch {
        Batch::new(
            &self.dir,
            self.file_id,
            batch_id,
            self.batch_size,
            self.block_size,
        )
    }
}

fn validate_geometry(batch_size: usize, block_size: u64) -> Result<()> {
    if batch_size == 0 || block_size == 0 {
        return Err(BlockError::InvalidRequest(format!(
            "batch size and block size must be positive (got {} x {})",
            batch_size, block_size
        )));
    }
    Ok(())
}
