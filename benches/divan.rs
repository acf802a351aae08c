// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

fn main() {
    divan::main();
}

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[10_000, 100_000, 1_000_000];
const NUM_ITEMS: &[u64] = &[1_000, 10_000];

/// Some arbitrary computation, heavy enough that a pipeline stage isn't
/// dominated by synchronization.
fn mix(mut x: u64) -> u64 {
    for _ in 0..64 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
    }
    x
}

/// Baseline benchmarks without any multi-threading involved.
mod serial {
    use super::{mix, LENGTHS, NUM_ITEMS};
    use divan::counter::{BytesCount, ItemsCount};
    use divan::{black_box, Bencher};

    #[divan::bench(args = LENGTHS)]
    fn square(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let mut output = vec![0; len];
        let input_slice = input.as_slice();
        let output_slice = output.as_mut_slice();

        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
                black_box(input_slice)
                    .iter()
                    .zip(output_slice.iter_mut())
                    .for_each(|(&x, out)| *out = x * x)
            })
    }

    #[divan::bench(args = NUM_ITEMS)]
    fn pipeline(bencher: Bencher, num_items: u64) {
        bencher
            .counter(ItemsCount::new(num_items))
            .bench_local(|| {
                (0..num_items)
                    .map(|x| mix(black_box(x)))
                    .map(|x| mix(x) & 0xff)
                    .sum::<u64>()
            })
    }
}

/// Benchmarks using Rayon.
mod rayon {
    use super::{LENGTHS, NUM_THREADS};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn square<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let mut output = vec![0; len];
        let input_slice = input.as_slice();
        let output_slice = output.as_mut_slice();

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        // divan::Bencher isn't Send, so only the measured closure runs inside the
        // Rayon thread pool.
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
                thread_pool.install(|| {
                    let input = black_box(input_slice);
                    output_slice
                        .par_iter_mut()
                        .enumerate()
                        .for_each(|(i, out)| *out = input[i] * input[i])
                })
            });
    }
}

/// Benchmarks using Parastage.
mod parastage {
    use super::{mix, LENGTHS, NUM_ITEMS, NUM_THREADS};
    use divan::counter::{BytesCount, ItemsCount};
    use divan::{black_box, Bencher};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn square<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let output = (0..len).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        let input_slice = input.as_slice();

        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
                let input = black_box(input_slice);
                ::parastage::parallel_for(NUM_THREADS, input.len(), |i, _| {
                    output[i].store(input[i] * input[i], Ordering::Relaxed);
                })
                .unwrap()
            });
    }

    #[divan::bench(consts = NUM_THREADS, args = NUM_ITEMS)]
    fn pipeline<const NUM_THREADS: usize>(bencher: Bencher, num_items: u64) {
        bencher
            .counter(ItemsCount::new(num_items))
            .bench_local(|| {
                let next = AtomicU64::new(0);
                let sum = AtomicU64::new(0);
                ::parastage::run_pipeline(NUM_THREADS, 3, |step, input: Option<u64>| match step {
                    0 => Some(next.fetch_add(1, Ordering::Relaxed))
                        .filter(|&i| i < num_items)
                        .map(|x| mix(black_box(x))),
                    1 => input.map(mix),
                    _ => {
                        sum.fetch_add(input.unwrap() & 0xff, Ordering::Relaxed);
                        None
                    }
                })
                .unwrap();
                sum.into_inner()
            });
    }
}
