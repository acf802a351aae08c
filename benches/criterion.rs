// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::mem::size_of;

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[10_000, 100_000, 1_000_000];
const NUM_ITEMS: &[u64] = &[1_000, 10_000];

fn square(c: &mut Criterion) {
    let mut group = c.benchmark_group("square");
    for len in LENGTHS {
        group.throughput(Throughput::Bytes((len * size_of::<u64>()) as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::square);
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("rayon@{num_threads}"), len),
                len,
                |bencher, len| rayon::square(bencher, num_threads, len),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("parastage@{num_threads}"), len),
                len,
                |bencher, len| parastage::square(bencher, num_threads, len),
            );
        }
    }
    group.finish();
}

fn pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    for num_items in NUM_ITEMS {
        group.throughput(Throughput::Elements(*num_items));
        group.bench_with_input(
            BenchmarkId::new("serial", num_items),
            num_items,
            serial::pipeline,
        );
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("parastage@{num_threads}"), num_items),
                num_items,
                |bencher, num_items| parastage::pipeline(bencher, num_threads, num_items),
            );
        }
    }
    group.finish();
}

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
    use super::mix;
    use criterion::{black_box, Bencher};

    pub fn square(bencher: &mut Bencher, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let mut output = vec![0; *len];
        bencher.iter(|| {
            for (out, x) in output.iter_mut().zip(black_box(input.as_slice())) {
                *out = x * x;
            }
        });
    }

    pub fn pipeline(bencher: &mut Bencher, num_items: &u64) {
        bencher.iter(|| {
            (0..*num_items)
                .map(|x| mix(black_box(x)))
                .map(|x| mix(x) & 0xff)
                .sum::<u64>()
        });
    }
}

/// Benchmarks using Rayon.
mod rayon {
    use criterion::{black_box, Bencher};
    use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};

    pub fn square(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let mut output = vec![0; *len];
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        thread_pool.install(|| {
            bencher.iter(|| {
                let input = black_box(input.as_slice());
                output
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(i, out)| *out = input[i] * input[i])
            })
        });
    }
}

/// Benchmarks using Parastage.
mod parastage {
    use super::mix;
    use criterion::{black_box, Bencher};
    use std::sync::atomic::{AtomicU64, Ordering};

    pub fn square(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let output = (0..*len).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        bencher.iter(|| {
            let input = black_box(input.as_slice());
            ::parastage::parallel_for(num_threads, input.len(), |i, _| {
                output[i].store(input[i] * input[i], Ordering::Relaxed);
            })
            .unwrap()
        });
    }

    pub fn pipeline(bencher: &mut Bencher, num_threads: usize, num_items: &u64) {
        bencher.iter(|| {
            let next = AtomicU64::new(0);
            let sum = AtomicU64::new(0);
            ::parastage::run_pipeline(num_threads, 3, |step, input: Option<u64>| match step {
                0 => Some(next.fetch_add(1, Ordering::Relaxed))
                    .filter(|&i| i < *num_items)
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

criterion_group!(benches, square, pipeline);
criterion_main!(benches);
