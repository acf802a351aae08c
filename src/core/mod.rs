// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core engine: strided work stealing, ordered pipelines and the worker
//! threads running them.

mod config;
mod order;
mod stride;
mod sync;
mod workers;

pub use config::{CpuPinningPolicy, ThreadCount, WorkerConfig};
