#![allow(dead_code)]

/// The number of worker threads for concurrent tests.
pub fn threads() -> usize {
    if cfg!(miri) {
        2
    } else {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4)
            .clamp(2, 8)
    }
}

/// Scales an iteration count down under miri.
pub fn scale(n: usize) -> usize {
    if cfg!(miri) {
        (n / 64).max(1)
    } else {
        n
    }
}
