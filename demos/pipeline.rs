// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that reads lines, hashes them in parallel and prints the
//! hashes in input order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{self, BufRead, BufReader};
use std::sync::Mutex;

fn main() {
    let lines = Mutex::new(BufReader::new(io::stdin()).lines());

    parastage::run_pipeline(4, 3, |step, input: Option<(String, u64)>| match step {
        0 => {
            let line = lines.lock().unwrap().next()?.ok()?;
            Some((line, 0))
        }
        1 => input.map(|(line, _)| {
            let mut hasher = DefaultHasher::new();
            line.hash(&mut hasher);
            let hash = hasher.finish();
            (line, hash)
        }),
        _ => {
            let (line, hash) = input?;
            println!("{hash:016x}  {line}");
            None
        }
    })
    .unwrap();
}
