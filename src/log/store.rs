//! # Log Store
//!
//! `LogStore` owns the flush buffer ring and two handles over one
//! fixed-size file: appends land through the writer handle inside the
//! flush, random reads go through the reader handle. Logical offsets grow
//! forever; byte `o` of the log lives at file position `o % max_size`.
//!
//! ## Data flow
//!
//! A writer calls [`LogStore::reserve`], fills the returned
//! [`Reservation`] in place, and hands it back to [`LogStore::finalize`].
//! When a reservation does not fit, the writer that sealed the current
//! buffer initializes the successor slot, links it into the chain, and
//! advances the ring cursor. The thread that drops the last reference on a
//! sealed buffer writes it to the file, publishes the new head and tail,
//! and resets the slot.
//!
//! ## Reads
//!
//! [`LogStore::read`] serves offsets below the tail from the file and
//! walks the live buffer chain for everything newer. Probe misses (a
//! buffer recycled mid-copy, a window observed while the ring moved) are
//! absorbed by retrying from a fresh tail snapshot; they are not surfaced.
//!
//! ## Failure model
//!
//! A flush that fails poisons the store: the failed buffer is never reset,
//! the error is returned to whichever caller triggered the flush, and
//! every later [`LogStore::reserve`] fails fast. There is no recovery
//! path.
//!
//! ## Thread safety
//!
//! `LogStore` is `Send + Sync`. Any thread may reserve, finalize, and
//! read; no operation takes a lock. Waiting (for a slot to drain, for a
//! racing window to settle) is a cooperative `yield_now`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::os::unix::fs::FileExt;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use eyre::{bail, ensure, Result, WrapErr};

use crate::config::StoreConfig;

use super::buffer::{Alloc, FlushBuffer};

/// Lock-free, append-only, circular log over a fixed-size file.
pub struct LogStore {
    writer: File,
    reader: File,
    max_size: u64,
    buffer_size: usize,
    buffers: Box<[FlushBuffer]>,
    /// Monotone ring cursor; `current % buffers.len()` is the active slot.
    current: AtomicU64,
    /// Slot of the oldest buffer still holding unflushed bytes.
    head: AtomicUsize,
    /// Logical end offset of the last flushed buffer; everything below it
    /// is on disk.
    tail_offset: AtomicU64,
    failed: AtomicBool,
}

impl LogStore {
    /// Opens (creating if necessary) the log file and builds the flush
    /// buffer ring.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = &config.file;

        let writer = OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open log file '{}' for writing", path.display()))?;
        let reader = File::open(path)
            .wrap_err_with(|| format!("failed to open log file '{}' for reading", path.display()))?;

        let buffers: Box<[FlushBuffer]> = (0..config.num_buffers)
            .map(|_| FlushBuffer::new(config.buffer_size))
            .collect();

        tracing::debug!(
            file = %path.display(),
            max_size = config.max_size,
            buffer_size = config.buffer_size,
            num_buffers = config.num_buffers,
            "opened log store"
        );

        Ok(Self {
            writer,
            reader,
            max_size: config.max_size,
            buffer_size: config.buffer_size,
            buffers,
            current: AtomicU64::new(0),
            head: AtomicUsize::new(0),
            tail_offset: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        })
    }

    /// Reserves `size` bytes of log space.
    ///
    /// The returned lease points at a byte range exclusive to the caller;
    /// its logical offset is unique and contiguous with every other
    /// reservation on this store. Fill the range, then hand the lease to
    /// [`LogStore::finalize`].
    ///
    /// Reservations cannot outgrow a flush buffer, and a poisoned store
    /// refuses new reservations; both surface as errors. Waiting for ring
    /// space never does.
    pub fn reserve(&self, size: u32) -> Result<Reservation<'_>> {
        ensure!(
            size as usize <= self.buffer_size,
            "reservation of {} bytes exceeds the flush buffer capacity of {}",
            size,
            self.buffer_size
        );

        loop {
            self.check_usable()?;

            let id = self.current.load(Ordering::Acquire);
            let slot = (id % self.buffers.len() as u64) as usize;
            let fb = &self.buffers[slot];

            match fb.alloc(size) {
                Alloc::Granted { offset, start } => {
                    return Ok(Reservation {
                        store: self,
                        slot,
                        offset,
                        ptr: fb.range_ptr(start),
                        len: size as usize,
                    });
                }
                Alloc::Sealed => {
                    let next_slot = ((id + 1) % self.buffers.len() as u64) as usize;
                    let next = &self.buffers[next_slot];

                    // Backpressure: the successor slot still holds an
                    // unflushed generation.
                    while next.is_full() {
                        self.check_usable()?;
                        thread::yield_now();
                    }

                    next.init(fb.end_offset());
                    fb.set_child(next_slot);
                    // Releases the sealed buffer's wait-for-successor
                    // reference; the CAS inside doubles as the fence that
                    // publishes the child link to the eventual flusher.
                    self.release(slot)?;

                    if self
                        .current
                        .compare_exchange(id, id + 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        // Exactly one writer observes the seal of a given
                        // generation.
                        panic!("ring cursor advanced by a second sealer");
                    }
                }
                Alloc::Busy => thread::yield_now(),
            }
        }
    }

    /// Completes a reservation. Must be called exactly once per reserve;
    /// the lease's move semantics enforce that.
    ///
    /// The caller's bytes must be fully written before this call for later
    /// reads to observe them. An error means the release triggered a flush
    /// that failed and the store is now poisoned.
    pub fn finalize(&self, reservation: Reservation<'_>) -> Result<()> {
        let slot = reservation.slot;
        std::mem::forget(reservation);
        self.release(slot)
    }

    /// Reads `buf.len()` bytes starting at logical `offset`.
    ///
    /// Offsets below the tail come from the file; newer offsets are served
    /// out of the live buffer chain. An offset at or beyond the end of the
    /// log is an error, as is asking for a range the file cannot satisfy.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        loop {
            let tail = self.tail_offset.load(Ordering::Acquire);
            if offset < tail {
                let fpos = offset % self.max_size;
                self.reader
                    .read_exact_at(buf, fpos)
                    .wrap_err_with(|| {
                        format!("failed to read {} bytes at log offset {}", buf.len(), offset)
                    })?;
                return Ok(buf.len());
            }

            let id = self.current.load(Ordering::Acquire);
            let current = &self.buffers[(id % self.buffers.len() as u64) as usize];
            let head = self.head.load(Ordering::Acquire);

            let start_offset = self.buffers[head].start_offset();
            let end_offset = current.end_offset();

            if start_offset < end_offset && offset >= start_offset && offset < end_offset {
                let mut idx = head;
                loop {
                    let fb = &self.buffers[idx];
                    if let Some(n) = fb.try_read(offset, buf) {
                        return Ok(n);
                    }
                    if std::ptr::eq(fb, current) {
                        break;
                    }
                    match fb.child() {
                        Some(next) => idx = next,
                        None => break,
                    }
                }
            } else if offset >= end_offset
                && self.current.load(Ordering::Acquire) == id
                && self.tail_offset.load(Ordering::Acquire) == tail
            {
                // Neither the cursor nor the tail moved while the window
                // was observed, so `end_offset` really is the end of the
                // log.
                bail!(
                    "log offset {} is out of range (log ends at {})",
                    offset,
                    end_offset
                );
            }

            thread::yield_now();
        }
    }

    /// Forces the log file contents to stable storage.
    ///
    /// Durability of the unflushed buffer tail is not affected; only bytes
    /// below the tail offset are on disk to begin with.
    pub fn sync(&self) -> Result<()> {
        self.writer.sync_data().wrap_err("failed to sync log file")
    }

    /// Logical offset of the oldest byte still held in RAM.
    pub fn head_offset(&self) -> u64 {
        self.buffers[self.head.load(Ordering::Acquire)].start_offset()
    }

    /// Logical end offset of the last flushed buffer. Everything below
    /// this is durable on disk.
    pub fn tail_offset(&self) -> u64 {
        self.tail_offset.load(Ordering::Acquire)
    }

    /// Logical end of the log: one past the newest reserved byte. Exact
    /// when the store is quiescent, a lower bound while writers are
    /// active.
    pub fn end_offset(&self) -> u64 {
        let id = self.current.load(Ordering::Acquire);
        self.buffers[(id % self.buffers.len() as u64) as usize].end_offset()
    }

    /// Bytes reserved but not yet flushed. Bounded by
    /// `num_buffers * buffer_size`.
    pub fn unflushed_bytes(&self) -> u64 {
        self.end_offset()
            .saturating_sub(self.tail_offset.load(Ordering::Acquire))
    }

    /// True once a flush failure has made the store unusable.
    pub fn is_poisoned(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn check_usable(&self) -> Result<()> {
        ensure!(
            !self.failed.load(Ordering::Acquire),
            "log store is unusable after a flush failure"
        );
        Ok(())
    }

    /// Drops one reference on `slot`. Whenever a release is the last one
    /// out of a sealed buffer, runs the flush and hands the freed pin down
    /// to the successor, which may cascade further flushes in ring order.
    fn release(&self, slot: usize) -> Result<()> {
        let mut idx = slot;
        loop {
            let fb = &self.buffers[idx];
            if !fb.release() {
                return Ok(());
            }

            // Captured before the flush resets the slot.
            let next = fb
                .child()
                .expect("sealed buffer reached zero references without a successor");
            self.flush(fb, next)?;
            idx = next;
        }
    }

    /// Writes a flush-ready buffer to the file and recycles the slot.
    ///
    /// Callers hold the buffer exclusively (sealed, zero references), and
    /// ring-ordered flushing keeps the writer handle single-threaded.
    fn flush(&self, fb: &FlushBuffer, next: usize) -> Result<()> {
        let start = fb.start_offset();
        let end = fb.end_offset();
        let bytes = unsafe { fb.filled() };
        let fpos = start % self.max_size;

        if let Err(err) = self.write_wrapped(bytes, fpos) {
            self.failed.store(true, Ordering::Release);
            tracing::error!(
                start,
                len = bytes.len(),
                error = %err,
                "flush failed; log store poisoned"
            );
            return Err(err).wrap_err_with(|| {
                format!("failed to flush {} bytes at log offset {}", bytes.len(), start)
            });
        }

        self.head.store(next, Ordering::Release);
        self.tail_offset.store(end, Ordering::Release);
        fb.reset();

        tracing::trace!(start, end, "flushed buffer");
        Ok(())
    }

    /// Positioned write that wraps at the file boundary, keeping the file
    /// within `max_size` even though buffer base offsets are not aligned
    /// to it.
    fn write_wrapped(&self, bytes: &[u8], fpos: u64) -> std::io::Result<()> {
        let until_end = (self.max_size - fpos) as usize;
        if bytes.len() <= until_end {
            self.writer.write_all_at(bytes, fpos)
        } else {
            self.writer.write_all_at(&bytes[..until_end], fpos)?;
            self.writer.write_all_at(&bytes[until_end..], 0)
        }
    }
}

impl fmt::Debug for LogStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStore")
            .field("max_size", &self.max_size)
            .field("buffer_size", &self.buffer_size)
            .field("num_buffers", &self.buffers.len())
            .field("head_offset", &self.head_offset())
            .field("tail_offset", &self.tail_offset())
            .field("end_offset", &self.end_offset())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

/// A lease on a reserved byte range of the log.
///
/// Dereferences to the raw range for filling. The range stays exclusive to
/// this lease until [`LogStore::finalize`] consumes it; writing after
/// finalize is impossible by construction. A lease dropped without
/// finalize still releases its reference so the ring keeps moving, but
/// any flush error it triggers is only reported through the poisoned
/// state.
pub struct Reservation<'a> {
    store: &'a LogStore,
    slot: usize,
    offset: u64,
    ptr: *mut u8,
    len: usize,
}

// The raw pointer targets a stable ring slot owned by `store`, and the
// range it spans belongs exclusively to this lease until release.
unsafe impl Send for Reservation<'_> {}
unsafe impl Sync for Reservation<'_> {}

impl Reservation<'_> {
    /// Logical offset the range will occupy in the log.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for Reservation<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for Reservation<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl fmt::Debug for Reservation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        // An abandoned lease still releases its reference. A flush failure
        // here has already poisoned the store and logged itself.
        let _ = self.store.release(self.slot);
    }
}
