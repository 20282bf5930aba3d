//! # Log-Structured Store
//!
//! The append path of the storage engine: a circular on-disk log fed
//! through a ring of in-memory flush buffers. The module is built from
//! three pieces, leaves first:
//!
//! - `state`: the packed `(full, writers, fill)` word every buffer
//!   coordinates through
//! - `buffer`: the fixed-size staging arena with lock-free reservation and
//!   release counting
//! - `store`: the ring, the file handles, and the public
//!   reserve/finalize/read surface
//!
//! ## Why a ring of buffers
//!
//! Appends must be wait-free for writers while the disk write stays one
//! large sequential transfer per buffer. Writers reserve ranges out of the
//! current buffer with a single CAS; the buffer that overflows is sealed
//! and handed to whichever thread drops its last reference, which writes
//! it out and recycles the slot. The ring depth bounds memory and gives
//! writers a natural backpressure point: a reservation waits only when
//! every slot ahead of it still holds unflushed bytes.
//!
//! ## Ordering
//!
//! Flushes happen in strict ring order even though writers complete out of
//! order. Each generation of a buffer starts with a reference that only
//! its predecessor's flush releases, so a buffer can never flush before
//! the one in front of it. The tail offset therefore advances
//! monotonically, and a reader below the tail can always trust the file.
//!
//! ## Concurrency
//!
//! Everything here is driven by release/acquire atomics and CAS loops; no
//! locks, no allocation on the hot path. Readers racing a recycled buffer
//! detect the generation change and retry. Flush callbacks run on writer
//! threads; there is no background flusher thread to schedule or shut
//! down.

mod buffer;
pub(crate) mod state;
mod store;

pub use store::{LogStore, Reservation};
