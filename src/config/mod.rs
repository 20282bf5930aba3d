//! # Store Configuration
//!
//! This module centralizes the geometry of a log store: where the file
//! lives, how large the circular file region is, and how the in-memory
//! flush buffer ring is shaped. Interdependent limits are documented here
//! and enforced both at compile time (constants) and at open time
//! (`StoreConfig::validate`).
//!
//! ## Geometry
//!
//! ```text
//! max_size (file)        fixed on-disk footprint; logical offsets are
//!       │                taken modulo this value
//!       └─> must be >= buffer_size, or a single flush could not land
//!
//! buffer_size            capacity of one flush buffer
//!       │
//!       └─> must stay below 2^31: the fill offset shares a packed
//!           state word with the full flag and the writer count
//!
//! num_buffers            ring depth; bounds unflushed bytes at
//!                        num_buffers * buffer_size and provides the
//!                        backpressure window for writers
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let store = StoreConfig::new("/var/lib/engine/data.log")
//!     .buffer_size(1 << 20)
//!     .num_buffers(4)
//!     .max_size(100 << 30)
//!     .open()?;
//! ```

use std::path::{Path, PathBuf};

use eyre::{ensure, Result};

use crate::log::state::MAX_FILL;
use crate::log::LogStore;

/// Default capacity of a single flush buffer: 1 MiB.
pub const DEFAULT_FLUSH_BUFFER_SIZE: usize = 1024 * 1024;

/// Default flush buffer ring depth.
pub const DEFAULT_NUM_FLUSH_BUFFERS: usize = 4;

/// Default size of the circular file region: 100 GiB.
pub const DEFAULT_MAX_LOG_SIZE: u64 = 100 * 1024 * 1024 * 1024;

/// Minimum ring depth. One buffer accepts reservations while its
/// predecessor drains, so the ring never goes below two slots.
pub const MIN_NUM_FLUSH_BUFFERS: usize = 2;

const _: () = {
    assert!(DEFAULT_FLUSH_BUFFER_SIZE as u64 <= MAX_FILL as u64);
    assert!(DEFAULT_NUM_FLUSH_BUFFERS >= MIN_NUM_FLUSH_BUFFERS);
    assert!(DEFAULT_MAX_LOG_SIZE >= DEFAULT_FLUSH_BUFFER_SIZE as u64);
};

/// Configuration for a [`LogStore`].
///
/// Create one with [`StoreConfig::new`], adjust the geometry with the
/// fluent setters, then call [`StoreConfig::open`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the log file. Created if it does not exist.
    pub file: PathBuf,
    /// Size of the circular file region in bytes.
    pub max_size: u64,
    /// Capacity of each flush buffer in bytes.
    pub buffer_size: usize,
    /// Number of flush buffers in the ring.
    pub num_buffers: usize,
}

impl StoreConfig {
    /// Creates a configuration for the given log file with default
    /// geometry.
    pub fn new<P: AsRef<Path>>(file: P) -> Self {
        Self {
            file: file.as_ref().to_path_buf(),
            max_size: DEFAULT_MAX_LOG_SIZE,
            buffer_size: DEFAULT_FLUSH_BUFFER_SIZE,
            num_buffers: DEFAULT_NUM_FLUSH_BUFFERS,
        }
    }

    /// Sets the size of the circular file region in bytes.
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Sets the capacity of each flush buffer in bytes.
    ///
    /// A single reservation can never exceed this value.
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Sets the number of flush buffers in the ring.
    pub fn num_buffers(mut self, count: usize) -> Self {
        self.num_buffers = count;
        self
    }

    /// Checks the geometry for internal consistency.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.buffer_size > 0, "flush buffer size must be non-zero");
        ensure!(
            self.buffer_size as u64 <= MAX_FILL as u64,
            "flush buffer size {} exceeds the maximum of {} bytes",
            self.buffer_size,
            MAX_FILL
        );
        ensure!(
            self.num_buffers >= MIN_NUM_FLUSH_BUFFERS,
            "at least {} flush buffers are required, got {}",
            MIN_NUM_FLUSH_BUFFERS,
            self.num_buffers
        );
        ensure!(
            self.max_size >= self.buffer_size as u64,
            "log file size {} is smaller than a single flush buffer of {} bytes",
            self.max_size,
            self.buffer_size
        );
        Ok(())
    }

    /// Opens the log store described by this configuration.
    pub fn open(self) -> Result<LogStore> {
        LogStore::open(&self)
    }
}
