//! Paste identifiers and the allocators that issue them.
//!
//! Two allocation policies share the [`IdAllocator`] capability:
//! - [`CounterAllocator`]: sequential lowercase hex ids (`0000`, `0001`, ...)
//!   backed by a counter file, unique until the capacity ceiling is reached
//! - [`RandomAllocator`]: fixed-width random decimal ids, never exhausted but
//!   free to collide

use crate::config::{Config, IdPolicy};
use rand::Rng;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

/// Longest identifier accepted from the outside world
pub const MAX_ID_LENGTH: usize = 64;

/// Minimum width of counter-derived hex ids
const HEX_WIDTH: usize = 4;

/// A validated paste identifier.
///
/// Only ASCII alphanumerics are allowed, which keeps every id a plain file
/// name inside the paste directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PasteId(String);

impl PasteId {
    /// Validate an identifier taken from a request path
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LENGTH
            && raw.bytes().all(|b| b.is_ascii_alphanumeric());
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PasteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why an allocator could not issue an id
#[derive(Debug, Error)]
pub enum AllocError {
    /// Every id below the capacity ceiling has been issued
    #[error("identifier space exhausted ({capacity} ids issued)")]
    Exhausted { capacity: u64 },

    #[error("counter file '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("counter file '{}' holds {contents:?}, expected an integer", .path.display())]
    Corrupt { path: PathBuf, contents: String },
}

/// Issues identifiers for new pastes
pub trait IdAllocator: Send + Sync {
    /// Produce the next identifier
    fn next_id(&self) -> Result<PasteId, AllocError>;
}

/// Build the allocator selected by the configuration
pub fn from_config(config: &Config) -> Arc<dyn IdAllocator> {
    match config.id_policy {
        IdPolicy::Counter => {
            info!(
                counter_file = %config.counter_file.display(),
                capacity = config.id_capacity,
                "Using counter id allocation"
            );
            Arc::new(CounterAllocator::new(
                config.counter_file.clone(),
                config.id_capacity,
            ))
        }
        IdPolicy::Random => {
            info!(length = config.random_id_length, "Using random id allocation");
            Arc::new(RandomAllocator::new(config.random_id_length))
        }
    }
}

/// Sequential allocator persisting "ids issued so far" in a side file.
///
/// The read-modify-write of the counter happens under a mutex, and every
/// update is written to a temp file, fsynced and renamed over the old one.
pub struct CounterAllocator {
    path: PathBuf,
    capacity: u64,
    lock: Mutex<()>,
}

impl CounterAllocator {
    pub fn new(path: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            path: path.into(),
            capacity,
            lock: Mutex::new(()),
        }
    }

    fn io_error(&self, source: io::Error) -> AllocError {
        AllocError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read the current counter, creating the file with `0` if it is absent
    fn load(&self) -> Result<u64, AllocError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Initializing counter file");
                self.store(0)?;
                return Ok(0);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        contents
            .trim()
            .parse()
            .map_err(|_| AllocError::Corrupt {
                path: self.path.clone(),
                contents,
            })
    }

    fn store(&self, value: u64) -> Result<(), AllocError> {
        write_durably(&self.path, value.to_string().as_bytes()).map_err(|e| self.io_error(e))
    }
}

impl IdAllocator for CounterAllocator {
    fn next_id(&self) -> Result<PasteId, AllocError> {
        // A poisoned lock only means another allocation panicked; the file is
        // still the source of truth.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let count = self.load()?;
        if count >= self.capacity {
            return Err(AllocError::Exhausted {
                capacity: self.capacity,
            });
        }

        let id = format!("{count:0width$x}", width = HEX_WIDTH);
        self.store(count + 1)?;
        Ok(PasteId(id))
    }
}

/// Write `contents` to `path` so that readers see either the old or the new
/// bytes, and the new bytes are on disk before returning.
fn write_durably(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    sync_dir(parent_dir(path))
}

/// Directory holding `path`; a bare file name lives in the current directory.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

// The rename is only durable once the directory entry itself is flushed
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Random fixed-width decimal ids
pub struct RandomAllocator {
    length: usize,
}

impl RandomAllocator {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(1, MAX_ID_LENGTH),
        }
    }
}

impl IdAllocator for RandomAllocator {
    fn next_id(&self) -> Result<PasteId, AllocError> {
        let mut rng = rand::thread_rng();
        let id = (0..self.length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        Ok(PasteId(id))
    }
}
