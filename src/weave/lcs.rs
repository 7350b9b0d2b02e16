//! Recursive unique-line LCS (spec §4.6), supplemented from
//! `original_source/pcdv.cc`'s `unique_lcs`/`recurse_matches`.
//!
//! A first pass matches only lines that occur exactly once on both sides,
//! found via patience sorting (longest increasing subsequence over the
//! matched lines' positions in `b`). The gaps before, between, and after
//! those matches are then recursed into, up to a fixed depth, so that
//! sections with no unique anchors still get a best-effort alignment
//! instead of being left unmatched.

use std::collections::BTreeMap;

/// Recursion depth cap (spec §9's "no lazy streams / explicit termination").
const DEFAULT_MAX_RECURSION: u32 = 128;

/// Compute matching `(a_index, b_index)` pairs between `a` and `b`, ordered
/// by ascending `a_index`.
#[must_use]
pub fn unique_lcs(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    recurse_matches(a, b, 0, 0, a.len(), b.len(), &mut out, DEFAULT_MAX_RECURSION);
    out
}

fn recurse_matches(
    a: &[&str],
    b: &[&str],
    alo: usize,
    blo: usize,
    ahi: usize,
    bhi: usize,
    out: &mut Vec<(usize, usize)>,
    max_recursion: u32,
) {
    if alo >= ahi || blo >= bhi {
        return;
    }

    let anchors = unique_lcs_matches(&a[alo..ahi], &b[blo..bhi]);
    if anchors.is_empty() {
        return;
    }

    let mut prev_a = alo;
    let mut prev_b = blo;
    for (local_a, local_b) in anchors {
        let global_a = alo + local_a;
        let global_b = blo + local_b;
        if max_recursion > 0 {
            recurse_matches(a, b, prev_a, prev_b, global_a, global_b, out, max_recursion - 1);
        }
        out.push((global_a, global_b));
        prev_a = global_a + 1;
        prev_b = global_b + 1;
    }
    if max_recursion > 0 {
        recurse_matches(a, b, prev_a, prev_b, ahi, bhi, out, max_recursion - 1);
    }
}

/// Matches among lines that occur exactly once in both `a` and `b`, as the
/// longest increasing subsequence (by `b`-position) of candidate pairs.
fn unique_lcs_matches(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let mut b_counts: BTreeMap<&str, u32> = BTreeMap::new();
    let mut b_first: BTreeMap<&str, usize> = BTreeMap::new();
    for (j, &line) in b.iter().enumerate() {
        *b_counts.entry(line).or_insert(0) += 1;
        b_first.entry(line).or_insert(j);
    }
    let mut a_counts: BTreeMap<&str, u32> = BTreeMap::new();
    for &line in a {
        *a_counts.entry(line).or_insert(0) += 1;
    }

    let mut candidates = Vec::new();
    for (i, &line) in a.iter().enumerate() {
        if a_counts.get(line) == Some(&1) && b_counts.get(line) == Some(&1) {
            candidates.push((i, b_first[line]));
        }
    }
    patience_longest_increasing(&candidates)
}

/// Longest subsequence of `candidates` (already ascending in `.0`) whose
/// `.1` values are strictly increasing, via patience sorting.
fn patience_longest_increasing(candidates: &[(usize, usize)]) -> Vec<(usize, usize)> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let mut pile_tops: Vec<usize> = Vec::new(); // index into `candidates` of each pile's top card
    let mut backpointers: Vec<Option<usize>> = vec![None; candidates.len()];

    for (idx, &(_, bpos)) in candidates.iter().enumerate() {
        let pos = pile_tops.partition_point(|&top| candidates[top].1 < bpos);
        if pos > 0 {
            backpointers[idx] = Some(pile_tops[pos - 1]);
        }
        if pos == pile_tops.len() {
            pile_tops.push(idx);
        } else {
            pile_tops[pos] = idx;
        }
    }

    let mut result = Vec::new();
    let mut cursor = pile_tops.last().copied();
    while let Some(idx) = cursor {
        result.push(candidates[idx]);
        cursor = backpointers[idx];
    }
    result.reverse();
    result
}
