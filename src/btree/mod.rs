// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! In-memory B+-tree index with point lookup, range scan, insertion,
//! deletion, and a deterministic file snapshot format.
//!
//! See [`BPlusTree`] for the public entry point.

mod node;
mod snapshot;
mod tree;
pub mod iter;
pub mod types;

pub use iter::RangeScan;
pub use tree::BPlusTree;
pub use types::{NodeId, Order};
