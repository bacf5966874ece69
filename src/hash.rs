use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub fn stable_hash_with(f: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    f(&mut hasher);
    hasher.finish()
}

pub fn stable_hash_str(seed: u64, value: &str) -> u64 {
    stable_hash_with(|hasher| {
        seed.hash(hasher);
        value.hash(hasher);
    })
}

/// Seed for one incarnation of a pipeline worker.
///
/// Restarted workers get a new `generation`, so a replacement never replays the
/// shuffle sequence of the worker it replaces.
pub fn worker_seed(seed: u64, role: &str, index: usize, generation: u64) -> u64 {
    stable_hash_with(|hasher| {
        seed.hash(hasher);
        role.hash(hasher);
        index.hash(hasher);
        generation.hash(hasher);
    })
}
