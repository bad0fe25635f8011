use crate::error::Result;
use crate::storage::segment::{Segment, WriteOutcome};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncWrite};

/// A fixed-size, ordered group of segments sharing one block size.
///
/// Segments are always visited in ascending block index; that order defines the
/// byte layout reconstructed on read.
#[derive(Debug)]
pub struct Batch {
    batch_id: u64,
    block_size: u64,
    segments: Vec<Segment>,
}

impl Batch {
    pub fn new(file_dir: &Path, file_id: u64, batch_id: u64, batch_size: usize, block_size: u64) -> Self {
        let segments = (0..batch_size as u64)
            .map(|block_id| Segment::new(file_dir, file_id, batch_id, block_id, block_size))
            .collect();

        Self {
            batch_id,
            block_size,
            segments,
        }
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Total bytes this batch can hold.
    pub fn capacity(&self) -> u64 {
        self.block_size * self.segments.len() as u64
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub async fn open(&mut self) -> Result<()> {
        for segment in &mut self.segments {
            segment.open().await?;
        }
        Ok(())
    }

    pub async fn open_existing(&mut self) -> Result<()> {
        for segment in &mut self.segments {
            segment.open_existing().await?;
        }
        Ok(())
    }

    /// Fill segments in order until the source ends or every segment is full.
    pub async fn write<R>(&mut self, source: &mut R) -> Result<WriteOutcome>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let mut total = WriteOutcome::default();

        for segment in &mut self.segments {
            let outcome = segment.write(source).await?;
            total.written += outcome.written;
            if outcome.source_exhausted {
                total.source_exhausted = true;
                break;
            }
        }

        Ok(total)
    }

    pub async fn read<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0;
        for segment in &mut self.segments {
            total += segment.read(sink).await?;
        }
        Ok(total)
    }

    pub async fn size(&self) -> Result<u64> {
        let mut total = 0;
        for segment in &self.segments {
            total += segment.size().await?;
        }
        Ok(total)
    }

    pub async fn is_full(&self) -> Result<bool> {
        Ok(self.size().await? >= self.capacity())
    }

    pub async fn close(&mut self) -> Result<()> {
        for segment in &mut self.segments {
            segment.close().await?;
        }
        Ok(())
    }

    pub async fn truncate(&mut self) -> Result<()> {
        for segment in &mut self.segments {
            segment.truncate().await?;
        }
        Ok(())
    }

    pub async fn purge(&mut self) -> Result<()> {
        for segment in &mut self.segments {
            segment.purge().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockError;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_write_fills_segments_in_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut batch = Batch::new(temp_dir.path(), 9, 0, 3, 4);
        batch.open().await.unwrap();

        let data = b"abcdefghij".to_vec();
        let outcome = batch.write(&mut BufReader::new(&data[..])).await.unwrap();
        assert_eq!(outcome.written, 10);
        assert!(outcome.source_exhausted);

        let sizes: Vec<u64> = {
            let mut sizes = Vec::new();
            for segment in batch.segments() {
                sizes.push(segment.size().await.unwrap());
            }
            sizes
        };
        assert_eq!(sizes, vec![4, 4, 2]);

        let mut out = Vec::new();
        assert_eq!(batch.read(&mut out).await.unwrap(), 10);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_full_batch_leaves_remaining_bytes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut batch = Batch::new(temp_dir.path(), 9, 0, 2, 4);
        batch.open().await.unwrap();

        let data = b"0123456789".to_vec();
        let mut source = BufReader::new(&data[..]);
        let outcome = batch.write(&mut source).await.unwrap();

        assert_eq!(outcome.written, 8);
        assert!(!outcome.source_exhausted);
        assert!(batch.is_full().await.unwrap());

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut source, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"89");
    }

    #[tokio::test]
    async fn test_truncate_and_purge_propagate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut batch = Batch::new(temp_dir.path(), 9, 1, 2, 4);
        batch.open().await.unwrap();
        batch
            .write(&mut BufReader::new(&b"abcdef"[..]))
            .await
            .unwrap();

        batch.truncate().await.unwrap();
        assert_eq!(batch.size().await.unwrap(), 0);

        batch.purge().await.unwrap();
        for segment in batch.segments() {
            assert!(!segment.path().exists());
        }
        assert!(matches!(
            batch.size().await.unwrap_err(),
            BlockError::NotOpen(_)
        ));
    }
}
