//! Properties of the region finder: every map decomposes into disjoint
//! maximal hyperslabs that cover it exactly.

use gridswap::decomp::region::{find_all_regions, idx_to_coords};
use proptest::prelude::*;

/// Rebuild the flat offset list a region list describes, in order.
fn rebuild_1d(regions: &[gridswap::decomp::Region]) -> Vec<i64> {
    let mut out = Vec::new();
    for r in regions {
        for k in 0..r.count[0] {
            out.push(r.start[0] + k + 1);
        }
    }
    out
}

#[test]
fn regions_cover_map_in_order() {
    let map = vec![2i64, 3, 4, 8, 9, 15];
    let (regions, n) = find_all_regions(&[16], &map);
    assert_eq!(n, 3);
    assert_eq!(rebuild_1d(&regions), map);
    // loffset always points at the region's first element in the map.
    for r in &regions {
        assert_eq!(map[r.loffset], r.start[0] + 1);
    }
}

#[test]
fn regions_are_maximal() {
    // No two consecutive regions may be mergeable.
    let map = vec![1i64, 2, 5, 6, 7, 11];
    let (regions, _) = find_all_regions(&[12], &map);
    for pair in regions.windows(2) {
        assert!(pair[0].start[0] + pair[0].count[0] < pair[1].start[0]);
    }
}

#[test]
fn two_dim_interior_block() {
    // Rows 1..3, columns 1..4 of a 5x5 array.
    let mut map = Vec::new();
    for row in 1..3i64 {
        for col in 1..4i64 {
            map.push(row * 5 + col + 1);
        }
    }
    let (regions, n) = find_all_regions(&[5, 5], &map);
    assert_eq!(n, 1);
    assert_eq!(regions[0].start, vec![1, 1]);
    assert_eq!(regions[0].count, vec![2, 3]);
}

#[test]
fn ragged_rows_split() {
    // Row 0 complete, row 1 missing its last column: the full rectangle
    // would overclaim, so two regions result.
    let map = vec![1i64, 2, 3, 4, 5];
    let (regions, n) = find_all_regions(&[2, 3], &map);
    assert_eq!(n, 2);
    assert_eq!(regions[0].count, vec![1, 3]);
    assert_eq!(regions[1].start, vec![1, 0]);
    assert_eq!(regions[1].count, vec![1, 2]);
}

#[test]
fn coords_round_trip_against_shape() {
    let gdimlen = [3usize, 4, 5];
    let mut coords = [0i64; 3];
    for idx in 0..60i64 {
        idx_to_coords(&gdimlen, idx, &mut coords);
        let back = (coords[0] * 4 + coords[1]) * 5 + coords[2];
        assert_eq!(back, idx);
    }
}

proptest! {
    /// Any subset of a 1-D array decomposes into regions that rebuild the
    /// subset exactly, with consistent local offsets.
    #[test]
    fn random_subsets_reconstruct(bits in proptest::collection::vec(any::<bool>(), 1..96)) {
        let n = bits.len();
        let map: Vec<i64> = bits
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b)
            .map(|(i, _)| (i + 1) as i64)
            .collect();
        let (regions, cnt) = find_all_regions(&[n], &map);
        prop_assert_eq!(cnt, regions.len());
        prop_assert_eq!(rebuild_1d(&regions), map.clone());

        let mut consumed = 0;
        for r in &regions {
            prop_assert_eq!(r.loffset, consumed);
            consumed += r.count[0] as usize;
        }
        prop_assert_eq!(consumed, map.len());
    }

    /// Maps with leading holes still decompose cleanly.
    #[test]
    fn leading_holes_ignored(holes in 0usize..5, len in 1usize..20) {
        let mut map = vec![0i64; holes];
        map.extend((1..=len as i64).collect::<Vec<_>>());
        let (regions, cnt) = find_all_regions(&[len], &map);
        prop_assert_eq!(cnt, 1);
        prop_assert_eq!(regions[0].loffset, holes);
        prop_assert_eq!(regions[0].count[0] as usize, len);
    }
}
