#![no_main]

use libfuzzer_sys::fuzz_target;
use wheelhouse_ranges::{covered, exclude, intersect};

fuzz_target!(|data: (Vec<(u32, u16)>, u32, u16)| {
    let (raw_ranges, ex_start, ex_len) = data;

    // Build an ascending, disjoint list out of the raw pairs.
    let mut cursor = 0u64;
    let mut ranges = Vec::new();
    for (gap, len) in raw_ranges.into_iter().take(64) {
        let start = cursor + gap as u64 + 1;
        let end = start + len as u64 + 1;
        ranges.push(start..end);
        cursor = end;
    }
    let ex = ex_start as u64..ex_start as u64 + ex_len as u64 + 1;

    let out = exclude(&ranges, &ex);

    // Output stays ascending and disjoint with nothing of `ex` left.
    assert!(out.windows(2).all(|w| w[0].end <= w[1].start));
    assert!(out.iter().all(|r| r.start < r.end));
    assert!(out.iter().all(|r| intersect(r, &ex).is_none()));
    assert!(covered(&out) <= covered(&ranges));

    // Excluding again changes nothing.
    assert_eq!(exclude(&out, &ex), out);
});
