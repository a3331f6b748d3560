#![forbid(unsafe_code)]

//! Tracking of which absolute byte offsets of a fixed-size file are present.
//!
//! Two representations, chosen once at creation by total size:
//!
//! - **Interval list** for files up to [`BITMAP_THRESHOLD`]: a coalesced
//!   [`rangemap::RangeSet`] plus a scratch tail of deferred inserts.
//!   Coalescing runs on query, serialization, or when the tail overflows.
//! - **Block bitmap** above the threshold: one bit per [`BLOCK_SIZE`] block.
//!   Marking rounds outward (every touched block is set), querying rounds
//!   inward (every overlapping block must be set). Sound because writes land
//!   at the exact requested start offset, so insertions cover whole blocks
//!   except possibly the final block of the file.
//!
//! Query methods take `&mut self` — they may fold the scratch tail first.

use rangemap::RangeSet as MergedSet;

use crate::{StorageError, StorageResult};

/// Files larger than this use the bitmap representation.
pub const BITMAP_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Bitmap granularity.
pub const BLOCK_SIZE: u64 = 64 * 1024;

/// Deferred inserts held before forcing a coalesce.
const TAIL_COALESCE_LIMIT: usize = 100;

/// Set of cached byte offsets of a resource with known total size.
///
/// All ranges are inclusive `[start, end]` with `end < total_size`.
#[derive(Debug, Clone)]
pub enum RangeSet {
    Intervals(IntervalSet),
    Bitmap(BlockBitmap),
}

impl RangeSet {
    /// Create an empty set; picks the representation from `total_size`.
    #[must_use]
    pub fn new(total_size: u64) -> Self {
        if total_size > BITMAP_THRESHOLD {
            Self::Bitmap(BlockBitmap::new(total_size))
        } else {
            Self::Intervals(IntervalSet::new(total_size))
        }
    }

    /// Rebuild a set from persisted inclusive ranges.
    #[must_use]
    pub fn from_ranges(total_size: u64, ranges: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut set = Self::new(total_size);
        for (start, end) in ranges {
            set.insert(start, end);
        }
        set
    }

    /// Rebuild a bitmap set from persisted bitmap bytes.
    pub fn from_bitmap_bytes(total_size: u64, bytes: &[u8]) -> StorageResult<Self> {
        BlockBitmap::from_bytes(total_size, bytes).map(Self::Bitmap)
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        match self {
            Self::Intervals(s) => s.total,
            Self::Bitmap(b) => b.total,
        }
    }

    #[must_use]
    pub fn is_bitmap(&self) -> bool {
        matches!(self, Self::Bitmap(_))
    }

    /// Mark `[start, end]` as present. Idempotent; out-of-bounds tails are
    /// clamped, fully out-of-bounds inserts are ignored.
    pub fn insert(&mut self, start: u64, end: u64) {
        let total = self.total_size();
        if total == 0 || start >= total || start > end {
            return;
        }
        let end = end.min(total - 1);
        match self {
            Self::Intervals(s) => s.insert(start, end),
            Self::Bitmap(b) => b.insert(start, end),
        }
    }

    /// True iff every byte of `[start, end]` is marked.
    pub fn contains(&mut self, start: u64, end: u64) -> bool {
        if start > end || end >= self.total_size() {
            return false;
        }
        match self {
            Self::Intervals(s) => s.contains(start, end),
            Self::Bitmap(b) => b.contains(start, end),
        }
    }

    /// Nearest missing interval containing or following `pos`.
    ///
    /// In the bitmap representation the returned start is block-aligned so
    /// that fetches filling the gap mark only blocks they fully cover.
    pub fn next_gap(&mut self, pos: u64) -> Option<(u64, u64)> {
        if pos >= self.total_size() {
            return None;
        }
        match self {
            Self::Intervals(s) => s.next_gap(pos),
            Self::Bitmap(b) => b.next_gap(pos),
        }
    }

    /// All missing intervals, in order.
    pub fn all_gaps(&mut self) -> Vec<(u64, u64)> {
        match self {
            Self::Intervals(s) => s.all_gaps(),
            Self::Bitmap(b) => b.all_gaps(),
        }
    }

    /// Number of bytes counted as present.
    pub fn bytes_present(&mut self) -> u64 {
        match self {
            Self::Intervals(s) => s.bytes_present(),
            Self::Bitmap(b) => b.bytes_present(),
        }
    }

    /// Cached share in percent, `0.0..=100.0`.
    pub fn progress(&mut self) -> f64 {
        let total = self.total_size();
        if total == 0 {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.bytes_present() as f64 / total as f64 * 100.0;
        pct.min(100.0)
    }

    pub fn is_complete(&mut self) -> bool {
        let total = self.total_size();
        total == 0 || self.next_gap(0).is_none()
    }

    /// Coalesced inclusive ranges, for persistence.
    pub fn to_ranges(&mut self) -> Vec<(u64, u64)> {
        match self {
            Self::Intervals(s) => s.to_ranges(),
            Self::Bitmap(b) => b.to_ranges(),
        }
    }

    /// Raw bitmap bytes; `None` for the interval representation.
    #[must_use]
    pub fn bitmap_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Intervals(_) => None,
            Self::Bitmap(b) => Some(b.bits.clone()),
        }
    }
}

/// Interval-list representation: coalesced core plus deferred scratch tail.
#[derive(Debug, Clone)]
pub struct IntervalSet {
    merged: MergedSet<u64>,
    tail: Vec<(u64, u64)>,
    total: u64,
}

impl IntervalSet {
    fn new(total: u64) -> Self {
        Self {
            merged: MergedSet::new(),
            tail: Vec::new(),
            total,
        }
    }

    fn insert(&mut self, start: u64, end: u64) {
        self.tail.push((start, end));
        if self.tail.len() > TAIL_COALESCE_LIMIT {
            self.coalesce();
        }
    }

    fn coalesce(&mut self) {
        for (start, end) in self.tail.drain(..) {
            self.merged.insert(start..end + 1);
        }
    }

    fn contains(&mut self, start: u64, end: u64) -> bool {
        self.coalesce();
        self.merged.gaps(&(start..end + 1)).next().is_none()
    }

    fn next_gap(&mut self, pos: u64) -> Option<(u64, u64)> {
        self.coalesce();
        self.merged
            .gaps(&(pos..self.total))
            .next()
            .map(|g| (g.start, g.end - 1))
    }

    fn all_gaps(&mut self) -> Vec<(u64, u64)> {
        self.coalesce();
        if self.total == 0 {
            return Vec::new();
        }
        self.merged
            .gaps(&(0..self.total))
            .map(|g| (g.start, g.end - 1))
            .collect()
    }

    fn bytes_present(&mut self) -> u64 {
        self.coalesce();
        self.merged.iter().map(|r| r.end - r.start).sum()
    }

    fn to_ranges(&mut self) -> Vec<(u64, u64)> {
        self.coalesce();
        self.merged.iter().map(|r| (r.start, r.end - 1)).collect()
    }
}

/// Block-bitmap representation: one bit per 64 KiB block, LSB-first.
#[derive(Debug, Clone)]
pub struct BlockBitmap {
    bits: Vec<u8>,
    blocks: u64,
    total: u64,
}

impl BlockBitmap {
    fn new(total: u64) -> Self {
        let blocks = total.div_ceil(BLOCK_SIZE);
        Self {
            bits: vec![0; blocks.div_ceil(8) as usize],
            blocks,
            total,
        }
    }

    fn from_bytes(total: u64, bytes: &[u8]) -> StorageResult<Self> {
        let blocks = total.div_ceil(BLOCK_SIZE);
        let expected = blocks.div_ceil(8) as usize;
        if bytes.len() != expected {
            return Err(StorageError::Corrupt(format!(
                "bitmap length {} does not match {} blocks",
                bytes.len(),
                blocks
            )));
        }
        Ok(Self {
            bits: bytes.to_vec(),
            blocks,
            total,
        })
    }

    fn set(&mut self, block: u64) {
        self.bits[(block / 8) as usize] |= 1 << (block % 8);
    }

    fn get(&self, block: u64) -> bool {
        self.bits[(block / 8) as usize] & (1 << (block % 8)) != 0
    }

    fn insert(&mut self, start: u64, end: u64) {
        // Outward rounding: every block touched by [start, end] is marked.
        for block in start / BLOCK_SIZE..=end / BLOCK_SIZE {
            self.set(block);
        }
    }

    fn contains(&self, start: u64, end: u64) -> bool {
        // Inward rounding: every block overlapping [start, end] must be set.
        (start / BLOCK_SIZE..=end / BLOCK_SIZE).all(|b| self.get(b))
    }

    fn next_gap(&self, pos: u64) -> Option<(u64, u64)> {
        let mut block = pos / BLOCK_SIZE;
        while block < self.blocks && self.get(block) {
            block += 1;
        }
        if block >= self.blocks {
            return None;
        }
        let first = block;
        while block < self.blocks && !self.get(block) {
            block += 1;
        }
        let gap_end = (block * BLOCK_SIZE).min(self.total) - 1;
        Some((first * BLOCK_SIZE, gap_end))
    }

    fn all_gaps(&self) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        let mut pos = 0;
        while let Some(gap) = self.next_gap(pos) {
            pos = gap.1 + 1;
            gaps.push(gap);
            if pos >= self.total {
                break;
            }
        }
        gaps
    }

    fn bytes_present(&self) -> u64 {
        let mut bytes = 0;
        for block in 0..self.blocks {
            if self.get(block) {
                let block_start = block * BLOCK_SIZE;
                bytes += (self.total - block_start).min(BLOCK_SIZE);
            }
        }
        bytes
    }

    fn to_ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges = Vec::new();
        let mut block = 0;
        while block < self.blocks {
            if self.get(block) {
                let first = block;
                while block < self.blocks && self.get(block) {
                    block += 1;
                }
                let end = (block * BLOCK_SIZE).min(self.total) - 1;
                ranges.push((first * BLOCK_SIZE, end));
            } else {
                block += 1;
            }
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn representation_follows_total_size() {
        assert!(!RangeSet::new(1).is_bitmap());
        assert!(!RangeSet::new(BITMAP_THRESHOLD).is_bitmap());
        assert!(RangeSet::new(BITMAP_THRESHOLD + 1).is_bitmap());
        assert!(RangeSet::new(10 * 1024 * 1024 * 1024).is_bitmap());
    }

    #[rstest]
    #[case::one_byte(1)]
    #[case::one_block(BLOCK_SIZE)]
    #[case::bitmap_regime(BITMAP_THRESHOLD + 1)]
    fn full_insert_completes(#[case] total: u64) {
        let mut set = RangeSet::new(total);
        assert!(!set.is_complete());
        set.insert(0, total - 1);
        assert!(set.is_complete());
        assert!((set.progress() - 100.0).abs() < f64::EPSILON);
        assert!(set.next_gap(0).is_none());
        assert!(set.all_gaps().is_empty());
    }

    #[test]
    fn insert_is_idempotent() {
        let mut set = RangeSet::new(1000);
        set.insert(100, 199);
        set.insert(100, 199);
        assert_eq!(set.bytes_present(), 100);
        assert_eq!(set.to_ranges(), vec![(100, 199)]);
    }

    #[test]
    fn contains_holds_for_sub_ranges_after_insert() {
        let mut set = RangeSet::new(1000);
        set.insert(100, 499);
        assert!(set.contains(100, 499));
        assert!(set.contains(250, 260));
        assert!(set.contains(499, 499));
        assert!(!set.contains(99, 100));
        assert!(!set.contains(499, 500));
    }

    #[test]
    fn adjacent_and_overlapping_inserts_merge() {
        let mut set = RangeSet::new(1000);
        set.insert(0, 99);
        set.insert(100, 199);
        set.insert(150, 300);
        assert_eq!(set.to_ranges(), vec![(0, 300)]);
    }

    #[test]
    fn gaps_and_ranges_partition_the_file() {
        let mut set = RangeSet::new(1000);
        set.insert(100, 199);
        set.insert(400, 599);
        set.insert(999, 999);

        let mut covered: Vec<(u64, u64)> = set.to_ranges();
        covered.extend(set.all_gaps());
        covered.sort_unstable();

        let mut pos = 0;
        for (start, end) in covered {
            assert_eq!(start, pos, "partition must be contiguous and disjoint");
            pos = end + 1;
        }
        assert_eq!(pos, 1000);
    }

    #[test]
    fn next_gap_finds_gap_at_or_after_pos() {
        let mut set = RangeSet::new(1000);
        set.insert(0, 99);
        set.insert(500, 999);
        assert_eq!(set.next_gap(0), Some((100, 499)));
        assert_eq!(set.next_gap(100), Some((100, 499)));
        assert_eq!(set.next_gap(250), Some((250, 499)));
        assert_eq!(set.next_gap(500), None);
    }

    #[test]
    fn tail_overflow_coalesces_without_losing_ranges() {
        let mut set = RangeSet::new(100_000);
        for i in 0..150u64 {
            set.insert(i * 10, i * 10 + 9);
        }
        assert_eq!(set.bytes_present(), 1500);
        assert_eq!(set.to_ranges(), vec![(0, 1499)]);
    }

    #[test]
    fn list_roundtrip_through_ranges() {
        let mut set = RangeSet::new(10_000);
        set.insert(0, 10);
        set.insert(5_000, 6_000);
        let reloaded_ranges = RangeSet::from_ranges(10_000, set.to_ranges()).to_ranges();
        assert_eq!(reloaded_ranges, set.to_ranges());
    }

    // Bitmap-specific behavior.

    const BM_TOTAL: u64 = BITMAP_THRESHOLD + 3 * BLOCK_SIZE + 17;

    #[test]
    fn bitmap_marks_round_outward() {
        let mut set = RangeSet::new(BM_TOTAL);
        // Partial write into the middle of block 2 marks the whole block.
        set.insert(2 * BLOCK_SIZE + 100, 2 * BLOCK_SIZE + 200);
        assert!(set.contains(2 * BLOCK_SIZE, 3 * BLOCK_SIZE - 1));
    }

    #[test]
    fn bitmap_queries_round_inward() {
        let mut set = RangeSet::new(BM_TOTAL);
        set.insert(0, BLOCK_SIZE - 1);
        // One byte past the block boundary pulls in an unset block.
        assert!(set.contains(0, BLOCK_SIZE - 1));
        assert!(!set.contains(0, BLOCK_SIZE));
    }

    #[test]
    fn bitmap_partial_last_block() {
        let mut set = RangeSet::new(BM_TOTAL);
        let last_block_start = (BM_TOTAL / BLOCK_SIZE) * BLOCK_SIZE;
        set.insert(last_block_start, BM_TOTAL - 1);
        assert!(set.contains(last_block_start, BM_TOTAL - 1));
        assert_eq!(set.bytes_present(), BM_TOTAL - last_block_start);

        set.insert(0, last_block_start - 1);
        assert!(set.is_complete());
        assert_eq!(set.bytes_present(), BM_TOTAL);
    }

    #[test]
    fn bitmap_next_gap_is_block_aligned() {
        let mut set = RangeSet::new(BM_TOTAL);
        set.insert(0, 5 * BLOCK_SIZE - 1);
        let (gap_start, _) = set.next_gap(5 * BLOCK_SIZE + 123).unwrap();
        assert_eq!(gap_start % BLOCK_SIZE, 0);
    }

    #[test]
    fn bitmap_bytes_roundtrip() {
        let mut set = RangeSet::new(BM_TOTAL);
        set.insert(0, 10 * BLOCK_SIZE - 1);
        set.insert(BM_TOTAL - 5, BM_TOTAL - 1);

        let bytes = set.bitmap_bytes().unwrap();
        let mut reloaded = RangeSet::from_bitmap_bytes(BM_TOTAL, &bytes).unwrap();
        assert_eq!(reloaded.to_ranges(), set.to_ranges());
        assert_eq!(reloaded.bytes_present(), set.bytes_present());
    }

    #[test]
    fn bitmap_bytes_length_mismatch_is_corrupt() {
        let err = RangeSet::from_bitmap_bytes(BM_TOTAL, &[0u8; 3]).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[test]
    fn out_of_bounds_inserts_are_clamped_or_ignored() {
        let mut set = RangeSet::new(100);
        set.insert(200, 300); // fully outside
        assert_eq!(set.bytes_present(), 0);
        set.insert(50, 500); // tail clamped
        assert_eq!(set.to_ranges(), vec![(50, 99)]);
    }

    #[test]
    fn progress_counts_exactly_the_marked_bytes() {
        let mut set = RangeSet::new(2_000_000);
        set.insert(0, 499_999);
        assert!((set.progress() - 25.0).abs() < 1e-9);
    }
}
