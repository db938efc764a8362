//! Run-length merging of per-object reports into diff records.
//!
//! Reports arrive in strictly increasing object order. The emitter keeps at
//! most one open record: a report that continues the open record (same kind,
//! first object immediately after its last) extends it, anything else flushes
//! it to the sink and opens a new one. Memory use is therefore constant no
//! matter how many objects the dataset holds.

use std::io;

use serde::{Deserialize, Serialize};
use snapdiff_types::{DiffRecord, ObjectId, RecordKind, RECORD_SIZE};
use tracing::trace;

use crate::stream::DiffSink;

/// Counters kept by a [`RecordEmitter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterStats {
    pub records_written: u64,
    pub bytes_written: u64,
    /// Objects reported in use, including any still in the open record.
    pub objects_in_use: u64,
    /// Objects reported free, including any still in the open record.
    pub objects_freed: u64,
}

/// Merges contiguous same-kind reports and writes finished records.
pub struct RecordEmitter<'s> {
    sink: &'s mut dyn DiffSink,
    pending: Option<DiffRecord>,
    stats: EmitterStats,
}

impl<'s> RecordEmitter<'s> {
    pub fn new(sink: &'s mut dyn DiffSink) -> Self {
        Self {
            sink,
            pending: None,
            stats: EmitterStats::default(),
        }
    }

    /// Report that objects `lo..=hi` share allocation state `kind`.
    ///
    /// `lo` must be greater than every object reported before. A sink
    /// failure is returned as is; the failed record is not retried.
    pub fn report(&mut self, lo: ObjectId, hi: ObjectId, kind: RecordKind) -> io::Result<()> {
        debug_assert!(lo <= hi, "inverted report {lo}..={hi}");
        debug_assert!(
            self.pending.map_or(true, |p| lo > p.last),
            "out-of-order report {lo} after {:?}",
            self.pending
        );

        let extends = matches!(
            self.pending,
            Some(open) if open.kind == kind && open.last.checked_add(1) == Some(lo)
        );
        if extends {
            if let Some(open) = self.pending.as_mut() {
                open.last = hi;
            }
        } else {
            if let Some(done) = self.pending.take() {
                self.flush(&done)?;
            }
            self.pending = Some(DiffRecord::new(kind, lo, hi));
        }

        // 0..=u64::MAX holds one more object than a u64 can count.
        let count = (hi - lo).saturating_add(1);
        let counter = match kind {
            RecordKind::InUse => &mut self.stats.objects_in_use,
            RecordKind::Free => &mut self.stats.objects_freed,
        };
        *counter = counter.saturating_add(count);
        Ok(())
    }

    /// The open record, if any.
    pub fn pending(&self) -> Option<&DiffRecord> {
        self.pending.as_ref()
    }

    pub fn stats(&self) -> EmitterStats {
        self.stats
    }

    /// Flush the open record and return the final counters.
    ///
    /// When nothing was ever reported no record is written: the stream
    /// simply ends.
    pub fn finalize(mut self) -> io::Result<EmitterStats> {
        if let Some(done) = self.pending.take() {
            self.flush(&done)?;
        }
        Ok(self.stats)
    }

    fn flush(&mut self, record: &DiffRecord) -> io::Result<()> {
        self.sink.write_record(record)?;
        self.stats.records_written += 1;
        self.stats.bytes_written += RECORD_SIZE as u64;
        trace!(kind = %record.kind, first = record.first, last = record.last, "flushed diff record");
        Ok(())
    }
}

impl std::fmt::Debug for RecordEmitter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordEmitter")
            .field("pending", &self.pending)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::decode_stream;
    use proptest::prelude::*;

    /// Accepts `budget` records, then fails every write.
    struct Flaky {
        written: Vec<u8>,
        budget: usize,
    }

    impl io::Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("sink full"));
            }
            self.budget -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn emit(reports: &[(u64, u64, RecordKind)]) -> Vec<DiffRecord> {
        let mut out = Vec::new();
        let mut emitter = RecordEmitter::new(&mut out);
        for &(lo, hi, kind) in reports {
            emitter.report(lo, hi, kind).unwrap();
        }
        emitter.finalize().unwrap();
        decode_stream(&out).unwrap()
    }

    #[test]
    fn contiguous_same_kind_merges() {
        let records = emit(&[
            (0, 0, RecordKind::InUse),
            (1, 1, RecordKind::InUse),
            (2, 9, RecordKind::InUse),
        ]);
        assert_eq!(records, vec![DiffRecord::in_use(0, 9)]);
    }

    #[test]
    fn kind_change_flushes() {
        let records = emit(&[
            (0, 49, RecordKind::InUse),
            (50, 59, RecordKind::Free),
            (60, 99, RecordKind::InUse),
        ]);
        assert_eq!(
            records,
            vec![
                DiffRecord::in_use(0, 49),
                DiffRecord::free(50, 59),
                DiffRecord::in_use(60, 99),
            ]
        );
    }

    #[test]
    fn gap_flushes_even_with_same_kind() {
        let records = emit(&[(0, 3, RecordKind::InUse), (8, 11, RecordKind::InUse)]);
        assert_eq!(
            records,
            vec![DiffRecord::in_use(0, 3), DiffRecord::in_use(8, 11)]
        );
    }

    #[test]
    fn nothing_reported_writes_nothing() {
        let mut out = Vec::new();
        let stats = RecordEmitter::new(&mut out).finalize().unwrap();
        assert!(out.is_empty());
        assert_eq!(stats, EmitterStats::default());
    }

    #[test]
    fn at_most_one_record_is_buffered() {
        let mut out = Vec::new();
        {
            let mut emitter = RecordEmitter::new(&mut out);
            emitter.report(0, 3, RecordKind::Free).unwrap();
            emitter.report(4, 4, RecordKind::InUse).unwrap();
            assert_eq!(emitter.pending(), Some(&DiffRecord::in_use(4, 4)));
            assert_eq!(emitter.stats().records_written, 1);
        }
        assert_eq!(decode_stream(&out).unwrap(), vec![DiffRecord::free(0, 3)]);
    }

    #[test]
    fn stats_count_objects_and_bytes() {
        let mut out = Vec::new();
        let mut emitter = RecordEmitter::new(&mut out);
        emitter.report(0, 9, RecordKind::InUse).unwrap();
        emitter.report(10, 14, RecordKind::Free).unwrap();
        let stats = emitter.finalize().unwrap();
        assert_eq!(stats.records_written, 2);
        assert_eq!(stats.bytes_written, 2 * RECORD_SIZE as u64);
        assert_eq!(stats.objects_in_use, 10);
        assert_eq!(stats.objects_freed, 5);
    }

    #[test]
    fn extends_up_to_the_last_object_number() {
        let records = emit(&[
            (u64::MAX - 1, u64::MAX - 1, RecordKind::Free),
            (u64::MAX, u64::MAX, RecordKind::Free),
        ]);
        assert_eq!(records, vec![DiffRecord::free(u64::MAX - 1, u64::MAX)]);
    }

    #[test]
    fn whole_id_space_report_saturates_counters() {
        let mut out = Vec::new();
        let mut emitter = RecordEmitter::new(&mut out);
        emitter.report(0, u64::MAX, RecordKind::Free).unwrap();
        let stats = emitter.finalize().unwrap();
        assert_eq!(stats.objects_freed, u64::MAX);
        assert_eq!(decode_stream(&out).unwrap(), vec![DiffRecord::free(0, u64::MAX)]);
    }

    #[test]
    fn write_failure_keeps_earlier_records() {
        let mut sink = Flaky {
            written: Vec::new(),
            budget: 1,
        };
        {
            let mut emitter = RecordEmitter::new(&mut sink);
            emitter.report(0, 0, RecordKind::InUse).unwrap();
            emitter.report(1, 1, RecordKind::Free).unwrap();
            let err = emitter.report(2, 2, RecordKind::InUse).unwrap_err();
            assert_eq!(err.to_string(), "sink full");
        }
        assert_eq!(
            decode_stream(&sink.written).unwrap(),
            vec![DiffRecord::in_use(0, 0)]
        );
    }

    #[test]
    fn finalize_surfaces_late_write_error() {
        let mut sink = Flaky {
            written: Vec::new(),
            budget: 0,
        };
        let mut emitter = RecordEmitter::new(&mut sink);
        emitter.report(0, 99, RecordKind::InUse).unwrap();
        assert!(emitter.finalize().is_err());
    }

    proptest! {
        /// Any per-object state sequence yields a gap-free partition with
        /// alternating kinds that reproduces the input.
        #[test]
        fn output_is_a_minimal_partition(states in prop::collection::vec(any::<bool>(), 1..300)) {
            let reports: Vec<_> = states
                .iter()
                .enumerate()
                .map(|(i, used)| {
                    let kind = if *used { RecordKind::InUse } else { RecordKind::Free };
                    (i as u64, i as u64, kind)
                })
                .collect();
            let records = emit(&reports);

            prop_assert_eq!(records[0].first, 0);
            prop_assert_eq!(records[records.len() - 1].last, states.len() as u64 - 1);
            for pair in records.windows(2) {
                prop_assert_eq!(pair[0].last + 1, pair[1].first);
                prop_assert_ne!(pair[0].kind, pair[1].kind);
            }
            for rec in &records {
                for obj in rec.objects() {
                    prop_assert_eq!(states[obj as usize], rec.kind == RecordKind::InUse);
                }
            }
            let runs = 1 + states.windows(2).filter(|w| w[0] != w[1]).count();
            prop_assert_eq!(records.len(), runs);
        }
    }
}
