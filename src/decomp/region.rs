//! Region finder: flat↔multi-dimensional index arithmetic and maximal-run
//! detection over a decomposition map.
//!
//! A map is an ordered sequence of **1-based** global flat offsets; a
//! value `<= 0` is a hole (a local slot holding no real data). A
//! [`Region`] is a maximal hyperslab — start and count per dimension —
//! whose elements are contiguous in global flat-index space. The storage
//! layer performs one hyperslab call per region, so fewer, fatter regions
//! mean fewer I/O calls.

use log::trace;

/// One maximal hyperslab of the global array, plus the offset into the
/// local buffer where its data begins.
///
/// Regions form an owned, ordered sequence on the decomposition
/// descriptor; order matters because `loffset` accumulates through it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: Vec<i64>,
    pub count: Vec<i64>,
    pub loffset: usize,
}

impl Region {
    pub fn new(ndims: usize) -> Self {
        Self {
            start: vec![0; ndims],
            count: vec![0; ndims],
            loffset: 0,
        }
    }

    /// Number of elements this region covers.
    pub fn len(&self) -> usize {
        if self.count.iter().any(|&c| c <= 0) {
            return 0;
        }
        self.count.iter().product::<i64>() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convert a 0-based flat index into per-dimension coordinates by
/// successive integer division, innermost dimension last.
pub fn idx_to_coords(gdimlen: &[usize], idx: i64, coords: &mut [i64]) {
    debug_assert!(idx >= 0, "flat index must be non-negative");
    debug_assert_eq!(gdimlen.len(), coords.len());
    let mut idx = idx;
    for i in (0..gdimlen.len()).rev() {
        let next = idx / gdimlen[i] as i64;
        coords[i] = idx - next * gdimlen[i] as i64;
        idx = next;
    }
}

/// Row-major coordinate → index within a local hyperslab of shape `count`.
pub fn coord_to_local_index(lcoord: &[i64], count: &[i64]) -> i64 {
    debug_assert_eq!(lcoord.len(), count.len());
    let mut lindex = 0;
    let mut stride = 1;
    for i in (0..count.len()).rev() {
        lindex += lcoord[i] * stride;
        stride *= count[i];
    }
    lindex
}

/// Grow a region as far as the map allows, innermost dimension outward.
///
/// Growth step `i` along a dimension is accepted only if every offset `j`
/// in the block built so far sees `map[j + i*region_size] == map[j] +
/// i*region_stride`, i.e. the next block sits exactly one stride further
/// in global index space. An explicit loop with block-size/stride
/// accumulators; dimensionality never becomes a recursion depth.
fn expand_region(gdimlen: &[usize], map: &[i64], max_size: &[i64], count: &mut [i64]) {
    let ndims = gdimlen.len();
    let mut region_size: usize = 1;
    let mut region_stride: i64 = 1;

    for dim in (0..ndims).rev() {
        let mut blocks: i64 = 1;
        'grow: while blocks < max_size[dim] {
            for j in 0..region_size {
                let test = j + blocks as usize * region_size;
                if test >= map.len() || map[test] != map[j] + blocks * region_stride {
                    break 'grow;
                }
            }
            blocks += 1;
        }
        count[dim] = blocks;
        region_size *= blocks as usize;
        region_stride *= gdimlen[dim] as i64;
    }
}

/// Describe the first region in `map` (which must start with a non-hole,
/// in-bounds entry). Fills `start`/`count` and returns the number of map
/// elements the region consumes.
pub fn find_region(gdimlen: &[usize], map: &[i64], start: &mut [i64], count: &mut [i64]) -> usize {
    debug_assert!(!map.is_empty() && map[0] > 0, "region must start on data");

    // The map is 1-based; calculations are 0-based.
    idx_to_coords(gdimlen, map[0] - 1, start);

    // Growth can never read past the array edge.
    let max_size: Vec<i64> = gdimlen
        .iter()
        .zip(start.iter())
        .map(|(&g, &s)| g as i64 - s)
        .collect();

    expand_region(gdimlen, map, &max_size, count);
    count.iter().product::<i64>() as usize
}

/// Carve `map` into maximal regions. Leading holes are skipped before the
/// first region; each region's `loffset` is the map position where its
/// data begins. Returns the region list and its length (the per-process
/// region count, later max-reduced across the I/O group so collective
/// region-based I/O calls agree on how many to make).
///
/// An empty or hole-only map yields an empty list.
pub fn find_all_regions(gdimlen: &[usize], map: &[i64]) -> (Vec<Region>, usize) {
    let ndims = gdimlen.len();
    let mut consumed = 0usize;
    while consumed < map.len() && map[consumed] <= 0 {
        consumed += 1;
    }

    let mut regions = Vec::new();
    while consumed < map.len() {
        let mut region = Region::new(ndims);
        region.loffset = consumed;
        let regionlen = find_region(
            gdimlen,
            &map[consumed..],
            &mut region.start,
            &mut region.count,
        );
        trace!(
            "region {} start {:?} count {:?} loffset {}",
            regions.len(),
            region.start,
            region.count,
            region.loffset
        );
        consumed += regionlen;
        regions.push(region);
    }

    let nregions = regions.len();
    (regions, nregions)
}
