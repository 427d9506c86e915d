// Memory access latency as a function of working-set size.
//
// Chases a strided index chain through buffers of increasing size, so each
// access lands on a cold line once the buffer outgrows a cache level. Run
// with `cargo bench --bench latency`.

use std::time::Instant;

const STRIDE: usize = 4093; // prime, in elements; defeats the prefetcher
const BATCH: usize = 1024;
const BATCHES: usize = 1024;

fn main() {
    println!("{:>12} {:>10} {:>10} {:>10}", "working set", "min", "avg", "max");

    // 256 KiB through 64 MiB of usize elements
    let mut elements = (256 << 10) / std::mem::size_of::<usize>();
    while elements <= (64 << 20) / std::mem::size_of::<usize>() {
        let (min, avg, max) = chase(elements);
        println!(
            "{:>9} KiB {:>8} ns {:>8} ns {:>8} ns",
            elements * std::mem::size_of::<usize>() >> 10,
            min,
            avg,
            max,
        );
        elements <<= 1;
    }
}

// Builds the chain and reports (min, avg, max) nanoseconds per access,
// where min and max are taken over per-batch averages.
fn chase(elements: usize) -> (u128, u128, u128) {
    let mut buffer: Vec<usize> = vec![0; elements];
    for i in 0..elements {
        buffer[i] = (i + STRIDE) % elements;
    }

    let mut index = 0;
    let mut min = u128::MAX;
    let mut max = 0;
    let mut total = 0;

    for _ in 0..BATCHES {
        let start = Instant::now();
        for _ in 0..BATCH {
            index = buffer[index];
        }
        let elapsed = start.elapsed().as_nanos();

        total += elapsed;
        min = min.min(elapsed);
        max = max.max(elapsed);
    }

    // keep the chase from being optimized out
    assert!(index < elements);

    (min / BATCH as u128, total / (BATCH * BATCHES) as u128, max / BATCH as u128)
}
