//! Desired-output deltas from a probability distribution.
//!
//! Strategy:
//!  - `dy[target] += push`
//!  - pull down the strongest competitors (largest probabilities other than
//!    the target): `dy[comp] -= pull / K`
//!
//! Ties between equal probabilities resolve to the lowest index: a candidate
//! only displaces a kept one when strictly greater.

use crate::config::MAX_TOPK;

/// Index of the largest probability other than `exclude`.
///
/// Returns `None` when no candidate exists (`probs.len() <= 1` with the only
/// slot excluded, or an empty distribution).
pub fn argmax_excluding(probs: &[f32], exclude: usize) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &p) in probs.iter().enumerate() {
        if i == exclude {
            continue;
        }
        match best {
            None => best = Some(i),
            Some(b) if p > probs[b] => best = Some(i),
            Some(_) => {}
        }
    }
    best
}

/// Bounded top-K selection excluding one index, descending by probability.
///
/// Fills `out` front to back and returns how many slots were filled.
/// `k` is capped at `MAX_TOPK` and at `out.len()`. O(K·n).
pub fn topk_excluding(probs: &[f32], exclude: usize, k: usize, out: &mut [usize]) -> usize {
    let k = k.min(MAX_TOPK).min(out.len());
    let mut found = 0usize;

    for (i, &p) in probs.iter().enumerate() {
        if i == exclude {
            continue;
        }

        // First kept slot that is empty or strictly weaker.
        let pos = (0..k).find(|&slot| slot >= found || p > probs[out[slot]]);
        let Some(pos) = pos else {
            continue;
        };

        let last = if found < k { found } else { k - 1 };
        for slot in (pos + 1..=last).rev() {
            out[slot] = out[slot - 1];
        }
        out[pos] = i;
        if found < k {
            found += 1;
        }
    }

    found
}

/// Build the desired-output delta into `dy` (length = `probs.len()`).
///
/// `topk == 0` suppresses only the single strongest competitor by `pull`;
/// otherwise the `min(topk, MAX_TOPK)` strongest each receive `-pull / K`
/// where K is the number actually found.
///
/// An out-of-range `target` or mismatched lengths leave `dy` all zero.
pub fn build_delta_into(
    dy: &mut [f32],
    probs: &[f32],
    target: usize,
    push: f32,
    pull: f32,
    topk: usize,
) {
    dy.fill(0.0);
    if probs.len() != dy.len() || target >= dy.len() {
        return;
    }

    dy[target] += push;

    if topk == 0 {
        if let Some(comp) = argmax_excluding(probs, target) {
            dy[comp] -= pull;
        }
        return;
    }

    let mut idx = [0usize; MAX_TOPK];
    let found = topk_excluding(probs, target, topk, &mut idx);
    if found == 0 {
        return;
    }

    let each = pull / found as f32;
    for &j in &idx[..found] {
        dy[j] -= each;
    }
}

/// Allocating form of [`build_delta_into`].
pub fn build_delta_from_probs(
    probs: &[f32],
    target: usize,
    push: f32,
    pull: f32,
    topk: usize,
) -> Vec<f32> {
    let mut dy = vec![0.0f32; probs.len()];
    build_delta_into(&mut dy, probs, target, push, pull, topk);
    dy
}
