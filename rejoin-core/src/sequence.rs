//! Deterministic workload generation.
//!
//! A [`SequenceGenerator`] yields the strictly ascending series `start..=end`
//! exactly once. It is consumed by value; a scenario that needs the series
//! again builds a fresh generator.

use rejoin_types::SequenceRecord;

/// Lazy, finite, non-restartable generator of ascending sequence records.
#[derive(Debug)]
pub struct SequenceGenerator {
    /// Next value to emit.
    next: u64,
    /// Last value to emit (inclusive).
    end: u64,
    /// Set once the series has been fully emitted.
    exhausted: bool,
}

impl SequenceGenerator {
    /// Generate `1..=len`.
    pub fn new(len: u64) -> Self {
        Self::range(1, len)
    }

    /// Generate `start..=end`. An empty range (`start > end`) is exhausted
    /// from the outset.
    pub fn range(start: u64, end: u64) -> Self {
        Self {
            next: start,
            end,
            exhausted: start > end,
        }
    }

    /// Next record in framed wire form, or `None` at end of sequence.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.next().map(|record| record.to_frame())
    }

    /// Number of records not yet emitted.
    pub fn remaining(&self) -> u64 {
        if self.exhausted {
            0
        } else {
            (self.end - self.next).saturating_add(1)
        }
    }

    /// True once every record has been emitted.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Last value of the series.
    pub fn last_value(&self) -> u64 {
        self.end
    }
}

impl Iterator for SequenceGenerator {
    type Item = SequenceRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let record = SequenceRecord::new(self.next);
        if self.next == self.end {
            self.exhausted = true;
        } else {
            self.next += 1;
        }
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejoin_types::decode_frame;

    #[test]
    fn yields_one_through_n_in_order() {
        let values: Vec<u64> = SequenceGenerator::new(5).map(|r| r.value()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn strictly_ascending_for_full_scenario_length() {
        let values: Vec<u64> = SequenceGenerator::new(200).map(|r| r.value()).collect();
        assert_eq!(values.len(), 200);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(values.first(), Some(&1));
        assert_eq!(values.last(), Some(&200));
    }

    #[test]
    fn not_restartable_after_exhaustion() {
        let mut gen = SequenceGenerator::new(2);
        assert!(gen.next().is_some());
        assert!(gen.next().is_some());
        assert!(gen.is_exhausted());
        assert!(gen.next().is_none());
        assert!(gen.next().is_none());
    }

    #[test]
    fn empty_sequence_is_exhausted_immediately() {
        let mut gen = SequenceGenerator::new(0);
        assert!(gen.is_exhausted());
        assert_eq!(gen.remaining(), 0);
        assert!(gen.next_frame().is_none());
    }

    #[test]
    fn remaining_counts_down() {
        let mut gen = SequenceGenerator::range(10, 12);
        assert_eq!(gen.remaining(), 3);
        gen.next();
        assert_eq!(gen.remaining(), 2);
        gen.next();
        gen.next();
        assert_eq!(gen.remaining(), 0);
    }

    #[test]
    fn next_frame_is_length_prefixed_decimal() {
        let mut gen = SequenceGenerator::range(199, 200);
        let first = gen.next_frame().unwrap();
        let (payload, _) = decode_frame(&first).unwrap();
        assert_eq!(payload, b"199");
        assert_eq!(gen.next_frame().unwrap(), vec![0, 0, 0, 3, b'2', b'0', b'0']);
    }

    #[test]
    fn range_ending_at_max_terminates() {
        let values: Vec<u64> = SequenceGenerator::range(u64::MAX - 1, u64::MAX)
            .map(|r| r.value())
            .collect();
        assert_eq!(values, vec![u64::MAX - 1, u64::MAX]);
    }
}
