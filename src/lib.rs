// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! An in-memory B+-tree index with point lookup, update, range scan,
//! insertion, deletion, and a deterministic file snapshot format.
//!
//! ## Quick start
//!
//! ```rust
//! use bptreeindex::BPlusTree;
//!
//! let mut tree = BPlusTree::<i32, i32>::new(4).unwrap();
//! tree.insert(1, 100);
//! tree.insert(2, 200);
//! tree.insert(3, 300);
//!
//! assert_eq!(tree.search(&2), Some(200));
//! assert!(tree.remove(&2));
//! assert_eq!(tree.search(&2), None);
//!
//! let scanned: Vec<_> = tree.range_scan(&1, &3).collect();
//! assert_eq!(scanned, vec![(1, 100), (3, 300)]);
//! ```
//!
//! ## Architecture
//!
//! - **btree**: node arena, descent, split/rebalance cascades, range scan,
//!   and the snapshot codec.
//! - **error**: the error taxonomy shared by every fallible operation.

pub mod btree;
pub mod error;

pub use btree::{BPlusTree, NodeId, Order, RangeScan};
pub use error::{BTreeError, BTreeResult};
