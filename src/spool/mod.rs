//! Per-output disk spool.
//!
//! A spool directory holds numbered `NNN.log` files of record-framed
//! entries (the wire format of [`crate::wire`], unsigned) plus a `cp.txt`
//! checkpoint of the form `"<file_id> <byte_offset>"`. Entries never span
//! files: the writer rotates between appends. The checkpoint advances only
//! after the output acknowledges delivery of `ack_every` records, so a
//! restart re-delivers at-least-once from the last checkpoint.

use crate::splitter::{FramedSplitter, SplitterConfig, SplitterRunner};
use crate::types::{Error, Result};
use crate::wire::frame_record;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

const CHECKPOINT_FILE: &str = "cp.txt";

/// Spool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Directory the spool lives in; created if absent.
    pub directory: PathBuf,

    /// Rotate to a new file once the current one reaches this size.
    pub max_file_size: u64,

    /// Advance the checkpoint after this many acknowledged records.
    pub ack_every: u32,
}

impl SpoolConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_file_size: 128 * 1024 * 1024,
            ack_every: 1,
        }
    }
}

/// A spool: framed writer, checkpointed reader.
#[derive(Debug)]
pub struct Spool {
    config: SpoolConfig,

    write_id: u32,
    write_file: Option<File>,
    write_size: u64,

    read_id: u32,
    read_offset: u64,
    reader: Option<File>,
    splitter: SplitterRunner,

    /// (file_id, end offset) of the most recently delivered record.
    delivered_to: (u32, u64),
    pending_acks: u32,
}

impl Spool {
    /// Open (or create) a spool directory and resume from its checkpoint.
    pub async fn open(config: SpoolConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.directory).await?;

        let (read_id, read_offset) = read_checkpoint(&config.directory).await?;
        let write_id = newest_file_id(&config.directory).await?.unwrap_or(read_id);
        let write_size = match tokio::fs::metadata(file_path(&config.directory, write_id)).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        Ok(Self {
            config,
            write_id,
            write_file: None,
            write_size,
            read_id,
            read_offset,
            reader: None,
            splitter: SplitterRunner::new(
                Box::new(FramedSplitter::default()),
                SplitterConfig::default(),
            ),
            delivered_to: (read_id, read_offset),
            pending_acks: 0,
        })
    }

    /// Append one record payload, framed, rotating as needed.
    pub async fn append(&mut self, payload: &[u8]) -> Result<()> {
        let mut framed = Vec::with_capacity(payload.len() + 16);
        frame_record(payload, None, &mut framed)?;

        if self.write_size > 0 && self.write_size + framed.len() as u64 > self.config.max_file_size
        {
            self.write_file = None;
            self.write_id += 1;
            self.write_size = 0;
        }

        if self.write_file.is_none() {
            self.write_file = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(file_path(&self.config.directory, self.write_id))
                    .await?,
            );
        }
        let file = self
            .write_file
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::Error::other("spool write file missing")))?;
        file.write_all(&framed).await?;
        file.flush().await?;
        self.write_size += framed.len() as u64;
        Ok(())
    }

    /// Read the next unread record, or `None` when caught up with the
    /// writer. Delivery alone does not move the checkpoint; see [`ack`].
    ///
    /// [`ack`]: Spool::ack
    pub async fn next(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(record) = self.splitter.next_record()? {
                self.delivered_to = (self.read_id, self.read_offset - self.splitter.buffered() as u64);
                return Ok(Some(record.payload));
            }

            if self.reader.is_none() {
                let path = file_path(&self.config.directory, self.read_id);
                match File::open(&path).await {
                    Ok(mut file) => {
                        file.seek(std::io::SeekFrom::Start(self.read_offset)).await?;
                        self.reader = Some(file);
                    }
                    Err(_) if self.read_id < self.write_id => {
                        self.advance_read_file().await;
                        continue;
                    }
                    Err(_) => return Ok(None),
                }
            }

            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| Error::Io(std::io::Error::other("spool read file missing")))?;
            let n = self.splitter.read_from(reader).await?;
            if n == 0 {
                if self.read_id < self.write_id {
                    // Finished file: delete it and move on. Frames never
                    // span files, so any buffered tail is corruption.
                    if self.splitter.buffered() > 0 {
                        tracing::warn!(
                            file_id = self.read_id,
                            bytes = self.splitter.buffered(),
                            "discarding corrupt spool tail"
                        );
                    }
                    let done = file_path(&self.config.directory, self.read_id);
                    let _ = tokio::fs::remove_file(done).await;
                    self.advance_read_file().await;
                    continue;
                }
                return Ok(None);
            }
            self.read_offset += n as u64;
        }
    }

    async fn advance_read_file(&mut self) {
        self.reader = None;
        self.read_id += 1;
        self.read_offset = 0;
        self.splitter = SplitterRunner::new(
            Box::new(FramedSplitter::default()),
            SplitterConfig::default(),
        );
    }

    /// Acknowledge one delivered record. Every `ack_every` acks the
    /// checkpoint advances to just past the last delivered record.
    pub async fn ack(&mut self) -> Result<()> {
        self.pending_acks += 1;
        if self.pending_acks >= self.config.ack_every {
            self.write_checkpoint().await?;
            self.pending_acks = 0;
        }
        Ok(())
    }

    async fn write_checkpoint(&self) -> Result<()> {
        let (id, offset) = self.delivered_to;
        let tmp = self.config.directory.join("cp.tmp");
        tokio::fs::write(&tmp, format!("{id} {offset}")).await?;
        tokio::fs::rename(tmp, self.config.directory.join(CHECKPOINT_FILE)).await?;
        Ok(())
    }
}

fn file_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{id:03}.log"))
}

async fn read_checkpoint(dir: &Path) -> Result<(u32, u64)> {
    let path = dir.join(CHECKPOINT_FILE);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(_) => return Ok((0, 0)),
    };
    let mut parts = text.split_whitespace();
    let id = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::config(format!("corrupt checkpoint: {text:?}")))?;
    let offset = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::config(format!("corrupt checkpoint: {text:?}")))?;
    Ok((id, offset))
}

async fn newest_file_id(dir: &Path) -> Result<Option<u32>> {
    let mut newest = None;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stem) = name.strip_suffix(".log") {
            if let Ok(id) = stem.parse::<u32>() {
                newest = Some(newest.map_or(id, |n: u32| n.max(id)));
            }
        }
    }
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(dir: &Path) -> SpoolConfig {
        SpoolConfig {
            directory: dir.to_path_buf(),
            max_file_size: 64,
            ack_every: 1,
        }
    }

    #[tokio::test]
    async fn write_read_ack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::open(SpoolConfig::new(dir.path())).await.unwrap();

        spool.append(b"one").await.unwrap();
        spool.append(b"two").await.unwrap();

        assert_eq!(spool.next().await.unwrap(), Some(b"one".to_vec()));
        spool.ack().await.unwrap();
        assert_eq!(spool.next().await.unwrap(), Some(b"two".to_vec()));
        spool.ack().await.unwrap();
        assert_eq!(spool.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn restart_resumes_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut spool = Spool::open(SpoolConfig::new(dir.path())).await.unwrap();
            spool.append(b"first").await.unwrap();
            spool.append(b"second").await.unwrap();
            assert_eq!(spool.next().await.unwrap(), Some(b"first".to_vec()));
            spool.ack().await.unwrap();
            // "second" was never delivered; the checkpoint sits after
            // "first".
        }

        let mut spool = Spool::open(SpoolConfig::new(dir.path())).await.unwrap();
        assert_eq!(spool.next().await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn unacked_records_are_redelivered_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut spool = Spool::open(SpoolConfig::new(dir.path())).await.unwrap();
            spool.append(b"payload").await.unwrap();
            assert_eq!(spool.next().await.unwrap(), Some(b"payload".to_vec()));
            // No ack: delivery must repeat.
        }

        let mut spool = Spool::open(SpoolConfig::new(dir.path())).await.unwrap();
        assert_eq!(spool.next().await.unwrap(), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn rotation_spans_multiple_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = Spool::open(small_config(dir.path())).await.unwrap();

        for i in 0..8 {
            spool
                .append(format!("record number {i}").as_bytes())
                .await
                .unwrap();
        }
        assert!(
            dir.path().join("001.log").exists(),
            "writer rotated past 000.log"
        );

        for i in 0..8 {
            let record = spool.next().await.unwrap().unwrap();
            assert_eq!(record, format!("record number {i}").into_bytes());
            spool.ack().await.unwrap();
        }
        assert_eq!(spool.next().await.unwrap(), None);
        assert!(
            !dir.path().join("000.log").exists(),
            "consumed files are removed"
        );
    }

    #[tokio::test]
    async fn batched_acks_defer_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SpoolConfig::new(dir.path());
        config.ack_every = 2;
        {
            let mut spool = Spool::open(config.clone()).await.unwrap();
            spool.append(b"a").await.unwrap();
            spool.append(b"b").await.unwrap();
            spool.append(b"c").await.unwrap();

            assert_eq!(spool.next().await.unwrap(), Some(b"a".to_vec()));
            spool.ack().await.unwrap(); // 1 of 2: checkpoint unchanged
        }

        let mut spool = Spool::open(config).await.unwrap();
        assert_eq!(
            spool.next().await.unwrap(),
            Some(b"a".to_vec()),
            "checkpoint never advanced"
        );
    }
}
