// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that computes a sum of squares on the calling thread.

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};

fn main() {
    let input_size = 1_000_000;

    let input = (0..input_size).collect::<Vec<u64>>();
    let input = black_box(input);
    let sum = AtomicU64::new(0);
    parastage::parallel_for(1, input.len(), |i, _| {
        sum.fetch_add(input[i] * input[i] % 1000, Ordering::Relaxed);
    })
    .unwrap();
    println!("sum = {}", sum.into_inner());
}
