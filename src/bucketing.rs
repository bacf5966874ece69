//! Sort-and-group length bucketing.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::data::Example;

/// Split `items` into groups of at most `batch_size`, ordered by `key`.
///
/// The sort is stable, so items with equal keys keep arrival order. The last
/// group is shorter when `items.len()` is not a multiple of `batch_size`.
/// When `rng` is given, the order of groups is shuffled; group contents are
/// never reordered by the shuffle.
pub fn bucket_by_key<T, K, F, R>(
    mut items: Vec<T>,
    batch_size: usize,
    key: F,
    rng: Option<&mut R>,
) -> Vec<Vec<T>>
where
    K: Ord,
    F: FnMut(&T) -> K,
    R: Rng + ?Sized,
{
    if items.is_empty() || batch_size == 0 {
        return Vec::new();
    }
    items.sort_by_key(key);
    let mut groups = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        groups.push(iter.by_ref().take(batch_size).collect::<Vec<_>>());
    }
    if let Some(rng) = rng {
        groups.shuffle(rng);
    }
    groups
}

/// [`bucket_by_key`] over encoder length.
pub fn bucket_examples<R: Rng + ?Sized>(
    window: Vec<Example>,
    batch_size: usize,
    rng: Option<&mut R>,
) -> Vec<Vec<Example>> {
    bucket_by_key(window, batch_size, |example| example.encoder_len, rng)
}
