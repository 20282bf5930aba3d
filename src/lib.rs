//! # cinderlog - Lock-Free Log-Structured Store
//!
//! cinderlog is the persistence substrate for a page-based storage engine:
//! a lock-free, append-only, circular on-disk log. Writers reserve bounded
//! byte ranges out of a ring of in-memory flush buffers, fill them in place,
//! and release them; whichever thread performs a buffer's final release
//! copies the buffer to a fixed-size file region. Readers locate bytes
//! either in still-resident buffers or directly in the file.
//!
//! ## Architecture
//!
//! ```text
//! writer ──reserve──┐
//! writer ──reserve──┼──► flush buffer ring ──last release──► log file
//! writer ──reserve──┘         ▲                                  ▲
//!                             │                                  │
//! reader ──read──── unflushed offsets ───── flushed offsets ─────┘
//! ```
//!
//! The log is addressed by 64-bit logical offsets that grow forever; a
//! logical offset `o` lives at file position `o % max_size`, so the on-disk
//! footprint stays fixed while the log wraps over itself.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cinderlog::StoreConfig;
//!
//! let store = StoreConfig::new("./data.log")
//!     .buffer_size(1024 * 1024)
//!     .num_buffers(4)
//!     .max_size(16 << 30)
//!     .open()?;
//!
//! let mut r = store.reserve(128)?;
//! r.copy_from_slice(&payload);
//! let offset = r.offset();
//! store.finalize(r)?;
//!
//! let mut buf = vec![0u8; 128];
//! store.read(offset, &mut buf)?;
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: store geometry, defaults, and validation
//! - [`log`]: the flush buffer ring and the log store itself

pub mod config;
pub mod log;

pub use config::StoreConfig;
pub use log::{LogStore, Reservation};
