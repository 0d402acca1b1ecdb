use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::types::error::{EngineError, Result};

pub const LOG_SUFFIX: &str = ".log";

// File layout: [running checksum:4][frame][frame]...
// Frame layout: [size:4][checksum:4][data], integers big-endian.
const HEADER_LEN: u64 = 4;
const FRAME_HEADER_LEN: usize = 8;

const SEED: u32 = 13331;

/// Append-only, checksummed operation log.
///
/// Every append is fsynced before the running-checksum header is updated and
/// fsynced in turn, so the header never accounts for bytes that are not on
/// disk. On open, any torn tail past the last frame with a valid per-frame
/// checksum is truncated away.
pub struct Wal {
    inner: Mutex<WalInner>,
}

struct WalInner {
    file: File,
    // Sequential read cursor, used by recovery.
    position: u64,
    size: u64,
    x_checksum: u32,
}

impl Wal {
    pub fn create<P: AsRef<Path>>(base: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(log_path(base.as_ref()))?;
        file.write_all(&0u32.to_be_bytes())?;
        file.sync_data()?;
        Ok(Self {
            inner: Mutex::new(WalInner {
                file,
                position: HEADER_LEN,
                size: HEADER_LEN,
                x_checksum: 0,
            }),
        })
    }

    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(log_path(base.as_ref()))?;
        let size = file.metadata()?.len();
        if size < HEADER_LEN {
            return Err(EngineError::CorruptLog {
                reason: format!("file is {size} bytes, shorter than the header"),
            });
        }
        let mut header = [0u8; 4];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let mut inner = WalInner {
            file,
            position: HEADER_LEN,
            size,
            x_checksum: u32::from_be_bytes(header),
        };
        inner.trim_bad_tail()?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Append one record and make it durable, then fold it into the running
    /// checksum header.
    pub fn append(&self, data: &[u8]) -> Result<()> {
        let frame = wrap_frame(data);
        let mut inner = self.inner.lock();
        let size = inner.size;
        inner.file.seek(SeekFrom::Start(size))?;
        inner.file.write_all(&frame)?;
        inner.file.sync_data()?;
        inner.size += frame.len() as u64;

        inner.x_checksum = checksum(inner.x_checksum, &frame);
        let header = inner.x_checksum.to_be_bytes();
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&header)?;
        inner.file.sync_data()?;
        Ok(())
    }

    /// Next valid record payload in file order, or None at the end of the
    /// valid log.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        Ok(inner
            .next_frame()?
            .map(|frame| frame[FRAME_HEADER_LEN..].to_vec()))
    }

    pub fn rewind(&self) {
        self.inner.lock().position = HEADER_LEN;
    }

    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl WalInner {
    /// Walk every frame, drop a torn tail, and repair the header if the
    /// running checksum it stores does not cover exactly the surviving
    /// frames.
    fn trim_bad_tail(&mut self) -> Result<()> {
        self.position = HEADER_LEN;
        let mut recomputed = 0u32;
        while let Some(frame) = self.next_frame()? {
            recomputed = checksum(recomputed, &frame);
        }
        if self.position != self.size {
            warn!(
                dropped = self.size - self.position,
                "dropping torn bytes from log tail"
            );
            self.file.set_len(self.position)?;
            self.size = self.position;
        }
        if recomputed != self.x_checksum {
            warn!("log running checksum out of date, rewriting header");
            self.x_checksum = recomputed;
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_all(&recomputed.to_be_bytes())?;
        }
        self.file.sync_data()?;
        self.position = HEADER_LEN;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.position + FRAME_HEADER_LEN as u64 > self.size {
            return Ok(None);
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.read_exact(&mut header)?;
        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let stored = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if self.position + (FRAME_HEADER_LEN + size) as u64 > self.size {
            return Ok(None);
        }
        let mut frame = vec![0u8; FRAME_HEADER_LEN + size];
        frame[..FRAME_HEADER_LEN].copy_from_slice(&header);
        self.file.read_exact(&mut frame[FRAME_HEADER_LEN..])?;
        if checksum(0, &frame[FRAME_HEADER_LEN..]) != stored {
            return Ok(None);
        }
        self.position += frame.len() as u64;
        Ok(Some(frame))
    }
}

fn wrap_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + data.len());
    frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
    frame.extend_from_slice(&checksum(0, data).to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

fn checksum(seed: u32, data: &[u8]) -> u32 {
    data.iter().fold(seed, |acc, &byte| {
        acc.wrapping_mul(SEED).wrapping_add(byte as u32)
    })
}

pub fn log_path(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(LOG_SUFFIX);
    PathBuf::from(name)
}
