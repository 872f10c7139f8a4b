//! Bucket size table and the `O(1)` fast-lookup table used to classify a
//! total-size request (user size + header) into a bucket index.
//!
//! Bucket sizes are grounded directly on `examples/original_source/llheap.cc`
//! (`bucketSizes[]`): 91 strictly increasing sizes, each a multiple of 16,
//! with finer granularity near common small sizes and coarser steps up to a
//! few megabytes.

use crate::header::HEADER_SIZE;

/// Number of distinct bucket sizes.
pub const BUCKET_COUNT: usize = 91;

// Bucket sizes are listed as round numbers; entries marked `+H` fold in
// HEADER_SIZE exactly as `llheap.cc`'s `bucketSizes[]` does. The smallest two
// groups add the header to every entry (small requests are dominated by
// header overhead); subsequent groups only add it to the group's last
// (round power-of-two-ish) entry, so that size class exactly matches the
// most common request sizes once the header is accounted for.
const RAW_BUCKET_SIZES: [(usize, bool); BUCKET_COUNT] = [
  (16, true), (32, true), (48, true), (64, true), // 4
  (96, true), (112, true), (128, true), // 3
  (160, false), (192, false), (224, false), (256, true), // 4
  (320, false), (384, false), (448, false), (512, true), // 4
  (640, false), (768, false), (896, false), (1_024, true), // 4
  (1_536, false), (2_048, true), // 2
  (2_560, false), (3_072, false), (3_584, false), (4_096, true), // 4
  (6_144, false), (8_192, true), // 2
  (9_216, false), (10_240, false), (11_264, false), (12_288, false),
  (13_312, false), (14_336, false), (15_360, false), (16_384, true), // 8
  (18_432, false), (20_480, false), (22_528, false), (24_576, false),
  (26_624, false), (28_672, false), (30_720, false), (32_768, true), // 8
  (36_864, false), (40_960, false), (45_056, false), (49_152, false),
  (53_248, false), (57_344, false), (61_440, false), (65_536, true), // 8
  (73_728, false), (81_920, false), (90_112, false), (98_304, false),
  (106_496, false), (114_688, false), (122_880, false), (131_072, true), // 8
  (147_456, false), (163_840, false), (180_224, false), (196_608, false),
  (212_992, false), (229_376, false), (245_760, false), (262_144, true), // 8
  (294_912, false), (327_680, false), (360_448, false), (393_216, false),
  (425_984, false), (458_752, false), (491_520, false), (524_288, true), // 8
  (655_360, false), (786_432, false), (917_504, false), (1_048_576, true), // 4
  (1_179_648, false), (1_310_720, false), (1_441_792, false), (1_572_864, false),
  (1_703_936, false), (1_835_008, false), (1_966_080, false), (2_097_152, true), // 8
  (2_621_440, false), (3_145_728, false), (3_670_016, false), (4_194_304, true), // 4
];

pub const BUCKET_SIZES: [usize; BUCKET_COUNT] = {
  let mut out = [0usize; BUCKET_COUNT];
  let mut i = 0;
  while i < BUCKET_COUNT {
    let (raw, header_bearing) = RAW_BUCKET_SIZES[i];
    out[i] = if header_bearing { raw + HEADER_SIZE } else { raw };
    i += 1;
  }
  out
};

const _: () = {
  let mut i = 1;
  while i < BUCKET_COUNT {
    assert!(BUCKET_SIZES[i] > BUCKET_SIZES[i - 1], "bucket table must be strictly increasing");
    assert!(BUCKET_SIZES[i] % 16 == 0, "bucket size must be a multiple of 16");
    i += 1;
  }
  assert!(BUCKET_SIZES[0] == 16 + HEADER_SIZE, "first bucket must be ALIGN + HEADER_SIZE");
};

/// Number of entries in the fast-lookup table: total-size requests in
/// `[0, 65536 + HEADER_SIZE]` map in `O(1)`.
pub const LOOKUP_SIZE: usize = 65_536 + HEADER_SIZE;

/// `lookup[i]` is the smallest bucket index `k` such that
/// `BUCKET_SIZES[k] >= i`, for `i` in `1..=LOOKUP_SIZE`. Index 0 is unused
/// (no request is ever zero-sized by the time it reaches classification,
/// see `config::ZERO_SIZE_BUCKET`).
///
/// Built once at compile time into a fixed-size array rather than a
/// heap-allocated slice: this table is constructed from inside the
/// heap-master's own initializer, so it must never itself call into the
/// allocator it is part of setting up (the original's static `lookup[]`
/// array exists for the same reason).
pub struct Lookup {
  table: [u8; LOOKUP_SIZE + 1],
}

const LOOKUP_TABLE: [u8; LOOKUP_SIZE + 1] = {
  let mut table = [0u8; LOOKUP_SIZE + 1];
  let mut idx = 0usize;
  let mut i = 0usize;
  while i <= LOOKUP_SIZE {
    if i > BUCKET_SIZES[idx] {
      idx += 1;
    }
    table[i] = idx as u8;
    assert!(i <= BUCKET_SIZES[idx]);
    i += 1;
  }
  table
};

impl Lookup {
  /// Copies the compile-time-built fast-lookup table. No heap allocation.
  pub fn build() -> Self {
    Lookup { table: LOOKUP_TABLE }
  }

  #[inline]
  pub fn get(&self, total_size: usize) -> usize {
    self.table[total_size] as usize
  }
}

/// Binary search for the smallest bucket index whose size is `>= key`,
/// bounded by `max_index` inclusive (used once a request exceeds the
/// fast-lookup table, and to find the mmap crossover's bucket at boot).
pub fn bsearchl(key: usize, max_index: usize) -> usize {
  let mut lo = 0usize;
  let mut hi = max_index + 1;
  while lo < hi {
    let mid = (lo + hi) / 2;
    if BUCKET_SIZES[mid] < key {
      lo = mid + 1;
    } else {
      hi = mid;
    }
  }
  lo
}

/// Classifies a total-size request (`user_size + HEADER_SIZE`) into a bucket
/// index, using the fast-lookup table when in range and binary search
/// otherwise, bounded by `max_bucket` (the largest bucket at or below the
/// mmap crossover).
#[inline]
pub fn classify(lookup: &Lookup, total_size: usize, max_bucket: usize) -> usize {
  if total_size <= LOOKUP_SIZE {
    lookup.get(total_size)
  } else {
    bsearchl(total_size, max_bucket)
  }
}
