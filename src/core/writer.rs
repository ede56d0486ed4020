//! Buffered asynchronous file writer
//!
//! Producers call [`BufferedWriter::write`] from the control loop without
//! ever waiting on disk. Bytes are appended to a current buffer; full
//! buffers queue up and are written one at a time by a background write.
//! Written buffers go back to a pool for reuse.
//!
//! The file handle moves into the in-flight write and comes back with its
//! completion, so at most one write can ever touch the file.
//!
//! A failed write is rolled back: the file is cut back to the length it had
//! before that buffer, so a capture log never holds a partial record.

use super::error::TraceError;
use futures::FutureExt;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use std::io::SeekFrom;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task::{JoinError, JoinHandle};

/// Smallest buffer ever allocated
pub const MIN_BUFFER_SIZE: usize = 16384;

#[derive(Debug)]
struct WriteBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl WriteBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }
}

type WriteOutcome = (File, WriteBuffer, std::io::Result<()>);

/// Snapshot of the writer's buffer bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Buffers allocated over the writer's lifetime
    pub allocated: usize,
    /// Buffers idle in the pool
    pub pooled: usize,
    /// Filled buffers waiting to be written
    pub queued: usize,
    /// A buffer is currently being filled
    pub filling: bool,
    /// A write is in flight
    pub in_flight: bool,
    /// Bytes confirmed written
    pub bytes_written: u64,
}

/// Single-writer buffered file
#[derive(Debug)]
pub struct BufferedWriter {
    path: PathBuf,
    file: Option<File>,
    current: Option<WriteBuffer>,
    filled: VecDeque<WriteBuffer>,
    pool: Vec<WriteBuffer>,
    in_flight: Option<JoinHandle<WriteOutcome>>,
    allocated: usize,
    bytes_written: u64,
}

impl BufferedWriter {
    /// Create (truncate) the file at `path`
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        tracing::debug!("Capture file {} created", path.display());

        Ok(Self {
            path,
            file: Some(file),
            current: None,
            filled: VecDeque::new(),
            pool: Vec::new(),
            in_flight: None,
            allocated: 0,
            bytes_written: 0,
        })
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue bytes for writing. Never waits for I/O.
    pub fn write(&mut self, bytes: &[u8]) {
        if let Some(current) = self.current.as_mut() {
            if current.remaining() >= bytes.len() {
                current.data.extend_from_slice(bytes);
                return;
            }
        }

        if let Some(full) = self.current.take() {
            self.filled.push_back(full);
        }

        let mut buffer = self.acquire(bytes.len());
        buffer.data.extend_from_slice(bytes);
        self.current = Some(buffer);
    }

    fn acquire(&mut self, len: usize) -> WriteBuffer {
        if let Some(pos) = self.pool.iter().position(|b| b.capacity >= len) {
            let mut buffer = self.pool.swap_remove(pos);
            buffer.data.clear();
            return buffer;
        }
        self.allocated += 1;
        WriteBuffer::with_capacity(MIN_BUFFER_SIZE.max(len))
    }

    /// Start the next write if none is in flight.
    ///
    /// Picks the oldest filled buffer, else the current buffer if it holds
    /// anything.
    fn start_next(&mut self) -> Result<(), TraceError> {
        if self.in_flight.is_some() {
            return Ok(());
        }

        let buffer = match self.filled.pop_front() {
            Some(buffer) => buffer,
            None => match self.current.take() {
                Some(buffer) if !buffer.data.is_empty() => buffer,
                other => {
                    self.current = other;
                    return Ok(());
                }
            },
        };

        let Some(mut file) = self.file.take() else {
            self.filled.push_front(buffer);
            return Err(TraceError::Closed(self.path.clone()));
        };

        let offset = self.bytes_written;
        tracing::debug!("Writing {} bytes to {} at {}", buffer.data.len(), self.path.display(), offset);
        self.in_flight = Some(tokio::spawn(async move {
            let result = async {
                file.write_all(&buffer.data).await?;
                file.flush().await
            }
            .await;
            if result.is_err() {
                rollback(&mut file, offset).await;
            }
            (file, buffer, result)
        }));
        Ok(())
    }

    fn complete(&mut self, outcome: Result<WriteOutcome, JoinError>) -> Result<(), TraceError> {
        let (file, mut buffer, result) = outcome.map_err(|e| TraceError::Task(e.to_string()))?;
        self.file = Some(file);

        let len = buffer.data.len() as u64;
        buffer.data.clear();
        self.pool.push(buffer);

        match result {
            Ok(()) => {
                self.bytes_written += len;
                Ok(())
            }
            Err(source) => {
                tracing::warn!("Dropped {} bytes: write to {} failed: {}", len, self.path.display(), source);
                Err(TraceError::Write {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Non-blocking flush step for the control loop.
    ///
    /// Reaps a finished write (returning its failure, if any) and starts the
    /// next one. A failed write loses that buffer's bytes; later writes still
    /// proceed.
    pub fn poll_flush(&mut self) -> Result<(), TraceError> {
        let finished = match self.in_flight.as_mut() {
            Some(handle) if handle.is_finished() => handle.now_or_never(),
            _ => None,
        };

        let mut outcome = Ok(());
        if let Some(result) = finished {
            self.in_flight = None;
            outcome = self.complete(result);
        }

        self.start_next()?;
        outcome
    }

    /// Write everything queued so far and wait for it to land.
    ///
    /// Every buffer is attempted; the first failure is returned.
    pub async fn flush(&mut self) -> Result<(), TraceError> {
        let mut first_error = None;

        loop {
            if let Some(handle) = self.in_flight.take() {
                if let Err(e) = self.complete(handle.await) {
                    first_error.get_or_insert(e);
                }
            }

            self.start_next()?;
            if self.in_flight.is_none() {
                break;
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Drain all buffers, then sync and release the file handle.
    ///
    /// A write failure takes precedence over a sync failure.
    pub async fn close(mut self) -> Result<(), TraceError> {
        let result = self.flush().await;

        let synced = match self.file.take() {
            Some(file) => file.sync_all().await.map_err(TraceError::from),
            None => Ok(()),
        };
        tracing::debug!(
            "Capture file {} closed ({} bytes, {} buffers)",
            self.path.display(),
            self.bytes_written,
            self.allocated
        );
        result.and(synced)
    }

    /// Buffer bookkeeping snapshot
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            allocated: self.allocated,
            pooled: self.pool.len(),
            queued: self.filled.len(),
            filling: self.current.is_some(),
            in_flight: self.in_flight.is_some(),
            bytes_written: self.bytes_written,
        }
    }
}

/// Cut the file back to `offset` after a failed write. Best effort: the
/// write error is what gets reported.
async fn rollback(file: &mut File, offset: u64) {
    if let Err(e) = file.set_len(offset).await {
        tracing::debug!("Truncate to {} failed: {}", offset, e);
    }
    if let Err(e) = file.seek(SeekFrom::Start(offset)).await {
        tracing::debug!("Seek to {} failed: {}", offset, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounted(stats: &WriterStats) -> usize {
        stats.pooled + stats.queued + usize::from(stats.filling) + usize::from(stats.in_flight)
    }

    #[tokio::test]
    async fn test_small_writes_share_a_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        let mut writer = BufferedWriter::create(&path).await.unwrap();

        writer.write(&[1, 2, 3]);
        writer.write(&[4, 5]);
        let stats = writer.stats();
        assert_eq!(stats.allocated, 1);
        assert!(stats.filling);
        assert_eq!(stats.queued, 0);

        writer.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_overflow_queues_buffers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let mut writer = BufferedWriter::create(&path).await.unwrap();

        let mut expected = Vec::new();
        for i in 0..5u8 {
            let chunk = vec![i; MIN_BUFFER_SIZE - 100];
            writer.write(&chunk);
            expected.extend_from_slice(&chunk);
        }
        let stats = writer.stats();
        assert_eq!(stats.allocated, 5);
        assert_eq!(stats.queued, 4);
        assert_eq!(accounted(&stats), stats.allocated);

        writer.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_oversized_write_gets_its_own_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.bin");
        let mut writer = BufferedWriter::create(&path).await.unwrap();

        let huge = vec![0xAA; MIN_BUFFER_SIZE * 2];
        writer.write(&huge);
        writer.flush().await.unwrap();
        assert_eq!(writer.stats().bytes_written, huge.len() as u64);

        writer.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), huge.len());
    }

    #[tokio::test]
    async fn test_buffers_are_reused_from_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BufferedWriter::create(dir.path().join("reuse.bin")).await.unwrap();

        for round in 0..10u8 {
            writer.write(&[round; 64]);
            writer.flush().await.unwrap();

            let stats = writer.stats();
            assert!(!stats.in_flight);
            assert_eq!(stats.pooled, 1);
            assert_eq!(accounted(&stats), stats.allocated);
        }
        assert_eq!(writer.stats().allocated, 1);
        assert_eq!(writer.stats().bytes_written, 640);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_write_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.bin");
        let mut writer = BufferedWriter::create(&path).await.unwrap();

        writer.write(&vec![1u8; MIN_BUFFER_SIZE]);
        writer.write(&vec![2u8; MIN_BUFFER_SIZE]);
        writer.write(&[3u8; 10]);

        writer.poll_flush().unwrap();
        let stats = writer.stats();
        assert!(stats.in_flight);
        assert_eq!(accounted(&stats), stats.allocated);

        writer.poll_flush().unwrap();
        let stats = writer.stats();
        assert_eq!(accounted(&stats), stats.allocated);
        assert!(stats.queued <= 1);

        writer.close().await.unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), MIN_BUFFER_SIZE * 2 + 10);
        assert_eq!(data[0], 1);
        assert_eq!(data[MIN_BUFFER_SIZE], 2);
        assert_eq!(data[MIN_BUFFER_SIZE * 2], 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_flush_reports_write_error() {
        let mut writer = BufferedWriter::create("/dev/full").await.unwrap();
        writer.write(&[1, 2, 3]);

        let err = writer.flush().await.unwrap_err();
        assert!(matches!(err, TraceError::Write { .. }));
        let stats = writer.stats();
        assert_eq!(stats.bytes_written, 0);
        assert_eq!(accounted(&stats), stats.allocated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_reports_write_error_before_sync_error() {
        let mut writer = BufferedWriter::create("/dev/full").await.unwrap();
        writer.write(&[1, 2, 3]);

        let err = writer.close().await.unwrap_err();
        assert!(matches!(err, TraceError::Write { ref path, .. } if path == Path::new("/dev/full")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_poll_flush_reports_write_error() {
        let mut writer = BufferedWriter::create("/dev/full").await.unwrap();
        writer.write(&[1, 2, 3]);

        let mut outcome = Ok(());
        for _ in 0..500 {
            outcome = writer.poll_flush();
            if outcome.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert!(matches!(outcome, Err(TraceError::Write { .. })));
        assert!(!writer.stats().in_flight);
    }

    #[tokio::test]
    async fn test_failed_write_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollback.bin");
        let mut file = File::create(&path).await.unwrap();
        file.write_all(&[1, 2, 3, 4, 5]).await.unwrap();

        rollback(&mut file, 2).await;
        file.write_all(&[9]).await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 9]);
    }
}
