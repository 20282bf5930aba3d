//! # Concurrent Append Tests
//!
//! Multi-writer coverage: reservations must tile the log with no gaps and
//! no overlaps regardless of interleaving, every writer's records must
//! survive verbatim, and readers racing the flush boundary must never
//! observe torn bytes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use cinderlog::{LogStore, StoreConfig};
use tempfile::tempdir;

const RECORD_SIZE: u32 = 8;

fn encode_record(writer: u32, seq: u32) -> [u8; 8] {
    let mut record = [0u8; 8];
    record[..4].copy_from_slice(&writer.to_le_bytes());
    record[4..].copy_from_slice(&seq.to_le_bytes());
    record
}

fn decode_record(record: &[u8]) -> (u32, u32) {
    (
        u32::from_le_bytes(record[..4].try_into().unwrap()),
        u32::from_le_bytes(record[4..].try_into().unwrap()),
    )
}

mod multi_writer_tests {
    use super::*;

    const WRITERS: u32 = 8;
    const RECORDS_PER_WRITER: u32 = 100_000;

    /// Eight writers blast sequenced records; afterwards a scan of the
    /// whole log must find every record of every writer exactly once.
    #[test]
    fn every_record_of_every_writer_survives() {
        let dir = tempdir().unwrap();
        let store = StoreConfig::new(dir.path().join("records.log"))
            .buffer_size(64 * 1024)
            .num_buffers(4)
            .max_size(16 * 1024 * 1024)
            .open()
            .unwrap();

        thread::scope(|scope| {
            for writer in 0..WRITERS {
                let store = &store;
                scope.spawn(move || {
                    for seq in 0..RECORDS_PER_WRITER {
                        let mut r = store.reserve(RECORD_SIZE).unwrap();
                        r.copy_from_slice(&encode_record(writer, seq));
                        store.finalize(r).unwrap();
                    }
                });
            }
        });

        let total = u64::from(WRITERS) * u64::from(RECORDS_PER_WRITER) * u64::from(RECORD_SIZE);
        assert_eq!(store.end_offset(), total);

        let mut seen = vec![vec![false; RECORDS_PER_WRITER as usize]; WRITERS as usize];
        let mut buf = [0u8; RECORD_SIZE as usize];
        for offset in (0..total).step_by(RECORD_SIZE as usize) {
            store.read(offset, &mut buf).unwrap();
            let (writer, seq) = decode_record(&buf);
            assert!(writer < WRITERS, "garbage writer id at offset {offset}");
            assert!(seq < RECORDS_PER_WRITER, "garbage sequence at offset {offset}");
            assert!(
                !seen[writer as usize][seq as usize],
                "record ({writer}, {seq}) appeared twice"
            );
            seen[writer as usize][seq as usize] = true;
        }

        // The multiset is complete: counts match, nothing was missed.
        for (writer, records) in seen.iter().enumerate() {
            let count = records.iter().filter(|s| **s).count();
            assert_eq!(
                count, RECORDS_PER_WRITER as usize,
                "writer {writer} lost records"
            );
        }
    }

    /// Mixed-size reservations from several threads tile a contiguous byte
    /// range: sorted by offset, each reservation begins exactly where the
    /// previous one ended.
    #[test]
    fn reservations_tile_the_log_without_gaps_or_overlaps() {
        let dir = tempdir().unwrap();
        let store = StoreConfig::new(dir.path().join("tiling.log"))
            .buffer_size(4096)
            .num_buffers(4)
            .max_size(64 * 1024 * 1024)
            .open()
            .unwrap();

        let spans: Vec<(u64, u32)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4u32)
                .map(|t| {
                    let store = &store;
                    scope.spawn(move || {
                        let mut spans = Vec::new();
                        for i in 0..5_000u32 {
                            let size = 1 + (t * 13 + i * 7) % 96;
                            let r = store.reserve(size).unwrap();
                            spans.push((r.offset(), size));
                            store.finalize(r).unwrap();
                        }
                        spans
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let mut spans = spans;
        spans.sort_unstable_by_key(|(offset, _)| *offset);

        assert_eq!(spans.first().unwrap().0, 0);
        for pair in spans.windows(2) {
            let (offset, size) = pair[0];
            let (next_offset, _) = pair[1];
            assert_eq!(
                offset + u64::from(size),
                next_offset,
                "gap or overlap after offset {offset}"
            );
        }

        let (last_offset, last_size) = *spans.last().unwrap();
        assert_eq!(last_offset + u64::from(last_size), store.end_offset());
    }
}

mod racing_reader_tests {
    use super::*;

    /// A reader chases a writer across flush boundaries. Whether a record
    /// is served from a resident buffer or from the file must be
    /// invisible: the bytes always match what the writer finalized.
    #[test]
    fn reads_racing_the_flusher_never_tear() {
        const RECORDS: u32 = 4_000;
        const PAYLOAD: u32 = 128;

        let dir = tempdir().unwrap();
        let store = StoreConfig::new(dir.path().join("race.log"))
            .buffer_size(4096)
            .num_buffers(2)
            .max_size(16 * 1024 * 1024)
            .open()
            .unwrap();

        let (sender, receiver) = mpsc::channel::<(u64, u8)>();

        thread::scope(|scope| {
            let writer_store: &LogStore = &store;
            scope.spawn(move || {
                for seq in 0..RECORDS {
                    let fill = (seq % 251) as u8;
                    let mut r = writer_store.reserve(PAYLOAD).unwrap();
                    r.fill(fill);
                    let offset = r.offset();
                    writer_store.finalize(r).unwrap();
                    sender.send((offset, fill)).unwrap();
                }
            });

            let reader_store: &LogStore = &store;
            scope.spawn(move || {
                let mut buf = [0u8; PAYLOAD as usize];
                for (offset, fill) in receiver {
                    // Several reads per record widen the window across the
                    // moment the buffer flushes.
                    for _ in 0..3 {
                        let n = reader_store.read(offset, &mut buf).unwrap();
                        assert_eq!(n, PAYLOAD as usize);
                        assert!(
                            buf.iter().all(|b| *b == fill),
                            "torn read at offset {offset}: expected {fill:#x}, got {buf:?}"
                        );
                    }
                }
            });
        });
    }

    /// Readers polling the tail while writers run only ever see it grow.
    #[test]
    fn tail_observed_by_a_racing_reader_is_monotone() {
        let dir = tempdir().unwrap();
        let store = StoreConfig::new(dir.path().join("monotone.log"))
            .buffer_size(1024)
            .num_buffers(2)
            .max_size(16 * 1024 * 1024)
            .open()
            .unwrap();

        let done = AtomicU64::new(0);

        thread::scope(|scope| {
            let store_ref: &LogStore = &store;
            let done_ref = &done;
            scope.spawn(move || {
                for _ in 0..20_000 {
                    let mut r = store_ref.reserve(64).unwrap();
                    r.fill(0x5A);
                    store_ref.finalize(r).unwrap();
                }
                done_ref.store(1, Ordering::Release);
            });

            scope.spawn(move || {
                let mut last = 0;
                while done_ref.load(Ordering::Acquire) == 0 {
                    let tail = store_ref.tail_offset();
                    assert!(tail >= last, "tail regressed: {last} -> {tail}");
                    last = tail;
                }
            });
        });

        // 64-byte records pack a 1024-byte buffer exactly, so the final
        // generation fills completely but is never sealed.
        assert_eq!(store.tail_offset(), store.end_offset() - 1024);
    }
}
