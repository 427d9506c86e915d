use std::sync::atomic::{AtomicIsize, Ordering};

/// Pads and aligns a value to the length of a cache line.
#[derive(Default)]
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64"),
    repr(align(128))
)]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64")),
    repr(align(64))
)]
pub(crate) struct CachePadded<T> {
    pub(crate) value: T,
}

// A sharded counter for the approximate set size.
//
// A single counter word would be a point of contention for every insert and
// remove. Registrations already carry a dense index, so the counter keeps
// one shard per registration slot and a thread record's index maps straight
// to its own cache line. Shards are combined only by `sum`, which tolerates
// tearing: the size is advisory and only exact at quiescence.
pub(crate) struct Counter(Box<[CachePadded<AtomicIsize>]>);

impl Counter {
    // One shard per registration slot, rounded up to a power of two so the
    // lookup is a mask.
    pub(crate) fn new(threads: usize) -> Counter {
        let shards = (0..threads.next_power_of_two())
            .map(|_| Default::default())
            .collect();

        Counter(shards)
    }

    // Return the shard for the given registration index.
    #[inline]
    pub(crate) fn get(&self, thread: usize) -> &AtomicIsize {
        &self.0[thread & (self.0.len() - 1)].value
    }

    // Returns the sum of all counter shards.
    #[inline]
    pub(crate) fn sum(&self) -> usize {
        self.0
            .iter()
            .map(|x| x.value.load(Ordering::Relaxed))
            .sum::<isize>()
            .try_into()
            // Depending on the order of concurrent increments and decrements
            // the sum might be transiently negative, so report empty.
            .unwrap_or(0)
    }
}
