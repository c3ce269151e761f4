//! Durable storage for the single reusable audio recording.
//!
//! Recordings are raw little-endian 16-bit PCM with no header.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to open '{name}': {source}")]
    Open {
        name: String,
        source: std::io::Error,
    },
    #[error("Write failed: {0}")]
    Write(std::io::Error),
    #[error("Read failed: {0}")]
    Read(std::io::Error),
}

/// Named append-only objects on a block device
pub trait Storage: Send + Sync {
    /// Open an object for writing, truncating any previous content
    fn create(&self, name: &str) -> Result<Box<dyn Write + Send>, StorageError>;

    /// Open an object for sequential reading
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError>;
}

/// Storage backed by a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Prepare the storage root; the device cannot work without it
    pub fn init(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        let unavailable = |source| StorageError::Unavailable {
            path: root.clone(),
            source,
        };

        fs::create_dir_all(&root).map_err(unavailable)?;
        let metadata = fs::metadata(&root).map_err(unavailable)?;
        if metadata.permissions().readonly() {
            return Err(unavailable(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "storage root is read-only",
            )));
        }

        log::info!("💾 Storage ready at {}", root.display());
        Ok(Self { root })
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Storage for FsStorage {
    fn create(&self, name: &str) -> Result<Box<dyn Write + Send>, StorageError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path_of(name))
            .map_err(|source| StorageError::Open {
                name: name.to_string(),
                source,
            })?;
        Ok(Box::new(file))
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let file = File::open(self.path_of(name)).map_err(|source| StorageError::Open {
            name: name.to_string(),
            source,
        })?;
        Ok(Box::new(file))
    }
}

/// Buffered writer of 16-bit samples; the object is closed on every exit path
pub struct RecordingWriter {
    name: String,
    writer: Option<BufWriter<Box<dyn Write + Send>>>,
    samples_written: usize,
}

impl RecordingWriter {
    pub fn create(storage: &dyn Storage, name: &str) -> Result<Self, StorageError> {
        let sink = storage.create(name)?;
        Ok(Self {
            name: name.to_string(),
            writer: Some(BufWriter::new(sink)),
            samples_written: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }

    pub fn append(&mut self, samples: &[i16]) -> Result<(), StorageError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            StorageError::Write(std::io::Error::other("recording already closed"))
        })?;

        for sample in samples {
            writer
                .write_all(&sample.to_le_bytes())
                .map_err(StorageError::Write)?;
        }
        self.samples_written += samples.len();
        Ok(())
    }

    /// Flush and close, returning the number of samples stored
    pub fn finish(mut self) -> Result<usize, StorageError> {
        self.close()?;
        Ok(self.samples_written)
    }

    fn close(&mut self) -> Result<(), StorageError> {
        match self.writer.take() {
            Some(mut writer) => writer.flush().map_err(StorageError::Write),
            None => Ok(()),
        }
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("❌ Failed to close recording '{}': {}", self.name, e);
        }
    }
}

/// Sequential reader of 16-bit samples
pub struct RecordingReader {
    reader: BufReader<Box<dyn Read + Send>>,
}

impl RecordingReader {
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self, StorageError> {
        Ok(Self {
            reader: BufReader::new(storage.open(name)?),
        })
    }

    /// Next sample, or `None` at the end of the object. A dangling odd byte is ignored.
    pub fn next_sample(&mut self) -> Result<Option<i16>, StorageError> {
        let mut bytes = [0u8; 2];
        match self.reader.read_exact(&mut bytes) {
            Ok(()) => Ok(Some(i16::from_le_bytes(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(StorageError::Read(e)),
        }
    }
}
