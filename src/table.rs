use std::io::{self, Write};

use log::debug;

use crate::frame::FrameInfo;

/// One round of xorshift64*. The multiplier is the generator's published
/// constant and must not be changed: bucket assignment has to be
/// reproducible across builds.
fn hash_fn(mut x: u64) -> u64 {
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    x.wrapping_mul(2685821657736338717)
}

/// Hash bucket holding the frames of every key that mapped to it, in
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    entries: Vec<FrameInfo>,
    size_of_entries: usize,
}

impl Bucket {
    pub fn num_entries(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Total bytes of frame-record storage this bucket accounts for.
    pub fn size_of_entries(&self) -> usize {
        self.size_of_entries
    }

    pub fn entries(&self) -> &[FrameInfo] {
        &self.entries
    }
}

/// Return-address keyed index over every callsite in a stack-map.
///
/// Built once, with a fixed bucket count, then only read. Lookups from
/// concurrent stack walkers are safe once construction is done; the table
/// is plain owned data.
#[derive(Debug)]
pub struct FrameTable {
    buckets: Vec<Bucket>,
}

impl FrameTable {
    /// Allocate an empty table sized for `expected` entries at the given
    /// load factor. The bucket count is fixed from here on.
    pub fn new(load_factor: f32, expected: u64) -> Self {
        assert!(load_factor > 0.0, "load factor must be positive");

        let num_buckets = (expected as f64 / load_factor as f64).ceil() as usize + 1;
        debug!("frame table sized at {} buckets for {} entries", num_buckets, expected);

        FrameTable { buckets: vec![Bucket::default(); num_buckets] }
    }

    pub fn size(&self) -> u64 {
        self.buckets.len() as u64
    }

    fn bucket_index(&self, key: u64) -> usize {
        // modulo reduction introduces a little bias; negligible at this
        // table's scale
        (hash_fn(key) % self.size()) as usize
    }

    /// Move `frame` into the table under `key`, which must be the frame's
    /// own return address. Duplicate keys are not checked; the linear scan
    /// in [`lookup`](Self::lookup) makes the first insertion win.
    pub fn insert(&mut self, key: u64, frame: FrameInfo) {
        debug_assert_eq!(key, frame.ret_addr);

        let idx = self.bucket_index(key);
        let bucket = &mut self.buckets[idx];
        bucket.size_of_entries += frame.size_bytes();
        bucket.entries.push(frame);
    }

    /// Find the frame recorded for a return address observed during a stack
    /// walk. `None` means the address is not a safepoint.
    pub fn lookup(&self, ret_addr: u64) -> Option<&FrameInfo> {
        let idx = self.bucket_index(ret_addr);
        self.buckets[idx].entries.iter().find(|f| f.ret_addr == ret_addr)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Every frame in the table, bucket by bucket.
    pub fn frames(&self) -> impl Iterator<Item = &FrameInfo> {
        self.buckets.iter().flat_map(|b| b.entries.iter())
    }

    /// Human-readable dump of every bucket and its frames.
    pub fn print(&self, stream: &mut impl Write) -> io::Result<()> {
        for (i, bucket) in self.buckets.iter().enumerate() {
            writeln!(stream, "\n--- bucket #{} ---", i)?;
            writeln!(
                stream,
                "num entries: {}, memory allocated (bytes): {}",
                bucket.num_entries(),
                bucket.size_of_entries()
            )?;

            for (j, frame) in bucket.entries.iter().enumerate() {
                writeln!(stream, "** frame #{} **", j)?;
                frame.print(stream)?;
            }
        }

        Ok(())
    }
}
