//! Byte-addressed non-volatile storage
//!
//! Models an EEPROM: fixed capacity, erased bytes read as 0xFF, and writes
//! only touch bytes whose value actually changes (write endurance is limited).
//! `FileNvStorage` keeps the image in a file on the host; `MemNvStorage` is
//! the in-memory variant used by tests and by the simulated setup.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Value of an erased cell
pub const ERASED: u8 = 0xFF;

/// Error type for storage operations
#[derive(Debug)]
pub enum StorageError {
    OutOfBounds { offset: usize, len: usize, capacity: usize },
    Io(std::io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::OutOfBounds { offset, len, capacity } => {
                write!(f, "access {offset}..{} exceeds capacity {capacity}", offset + len)
            }
            StorageError::Io(e) => write!(f, "storage io error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Byte-level read/write capability
pub trait NvStorage {
    fn capacity(&self) -> usize;

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Write `data` at `offset`, skipping bytes that already hold the same value.
    /// Returns the number of bytes physically written.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<usize, StorageError>;
}

fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::OutOfBounds { offset, len, capacity }),
    }
}

/// Copy changed bytes into `image`; returns how many changed
fn update_bytes(image: &mut [u8], offset: usize, data: &[u8]) -> usize {
    let mut changed = 0;
    for (cell, &byte) in image[offset..offset + data.len()].iter_mut().zip(data) {
        if *cell != byte {
            *cell = byte;
            changed += 1;
        }
    }
    changed
}

/// In-memory EEPROM image
#[derive(Debug, Clone)]
pub struct MemNvStorage {
    image: Vec<u8>,
    bytes_written: usize,
}

impl MemNvStorage {
    /// Fresh, fully erased device
    pub fn new(capacity: usize) -> Self {
        Self { image: vec![ERASED; capacity], bytes_written: 0 }
    }

    /// Device with existing contents, e.g. to simulate a restart
    pub fn from_image(image: Vec<u8>) -> Self {
        Self { image, bytes_written: 0 }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Total bytes physically written since construction
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl NvStorage for MemNvStorage {
    fn capacity(&self) -> usize {
        self.image.len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.image.len())?;
        buf.copy_from_slice(&self.image[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<usize, StorageError> {
        check_bounds(offset, data.len(), self.image.len())?;
        let changed = update_bytes(&mut self.image, offset, data);
        self.bytes_written += changed;
        Ok(changed)
    }
}

/// EEPROM image persisted to a file
pub struct FileNvStorage {
    path: PathBuf,
    image: Vec<u8>,
}

impl FileNvStorage {
    /// Open (or create) an image of exactly `capacity` bytes.
    /// A file of the wrong size is padded with erased cells or truncated.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let image = match fs::read(&path) {
            Ok(mut bytes) => {
                if bytes.len() != capacity {
                    warn!(
                        path = %path.display(),
                        found = bytes.len(),
                        expected = capacity,
                        "storage_image_resized"
                    );
                    bytes.resize(capacity, ERASED);
                    fs::write(&path, &bytes)?;
                }
                bytes
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let bytes = vec![ERASED; capacity];
                fs::write(&path, &bytes)?;
                info!(path = %path.display(), capacity = capacity, "storage_image_created");
                bytes
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, image })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NvStorage for FileNvStorage {
    fn capacity(&self) -> usize {
        self.image.len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.image.len())?;
        buf.copy_from_slice(&self.image[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<usize, StorageError> {
        check_bounds(offset, data.len(), self.image.len())?;

        let mut staged = self.image[offset..offset + data.len()].to_vec();
        let changed = update_bytes(&mut staged, 0, data);
        if changed == 0 {
            return Ok(0);
        }

        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&staged)?;
        file.sync_data()?;

        // Only mirror the write once it reached the file
        self.image[offset..offset + data.len()].copy_from_slice(&staged);
        debug!(offset = offset, changed = changed, "storage_written");
        Ok(changed)
    }
}
