// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic file snapshot format for a [`BPlusTree`].
//!
//! ## Layout
//!
//! ```text
//! [ MetaData ][ node record ][ node record ] ...
//! ```
//!
//! `MetaData` is always the first record and is fixed-size, so the reader
//! can load it without first knowing anything about the tree. Every
//! subsequent record is a `NodeRecord`, self-describing via its `bincode`
//! enum discriminant (`Leaf` or `Internal`).
//!
//! ## Writer
//!
//! A single depth-first pass, root first: an internal node's record is
//! written with placeholder (zero) child offsets, its children are written
//! recursively, and then the writer seeks back and overwrites the
//! placeholders with the children's real offsets. This works without a
//! second file pass because `bincode::serialized_size` for a record
//! depends only on the *lengths* of its vectors, never their contents, so
//! the record's final byte size, and therefore the position to seek back
//! to, is known before the children's offsets are.
//!
//! Depth-first child order visits leaves left-to-right, the same order as
//! the leaf chain, so a leaf's `next_offset` is patched the moment its
//! successor leaf is written, by remembering the file position of the
//! trailing `next_offset` field (always a record's last 8 bytes) and
//! seeking back to it. That pending field position is threaded through the
//! whole recursive write, not just one internal node's own children,
//! because the true successor of the last leaf under one internal node is
//! the first leaf under the next one, wherever in the tree that sibling
//! sits.
//!
//! ## Reader
//!
//! Validates `(max_keys, min_keys)` against the live instance before
//! touching any node data, then loads recursively from `root_offset`
//! through an `offset -> NodeId` cache, so a leaf reached first via a
//! sibling's `next` offset is not re-parsed when the parent-side traversal
//! reaches it moments later.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::node::NodeBody as LiveNodeBody;
use super::tree::BPlusTree;
use super::types::NodeId;
use crate::error::{BTreeError, BTreeResult};

/// Fixed-size header record, always the snapshot's first bytes.
#[derive(Debug, Serialize, Deserialize)]
struct MetaData {
    max_keys: u64,
    min_keys: u64,
    root_offset: u64,
    tree_height: u64,
}

/// On-disk node representation. The `Leaf`/`Internal` discriminant plays
/// the role of the explicit `is_leaf` flag; children and `next` are
/// encoded as byte offsets into the snapshot file rather than arena ids,
/// since `NodeId`s are not stable across a save/load round trip.
#[derive(Debug, Serialize, Deserialize)]
enum NodeRecord<K, V> {
    Leaf {
        keys: Vec<K>,
        values: Vec<V>,
        next_offset: u64,
    },
    Internal {
        keys: Vec<K>,
        children: Vec<u64>,
    },
}

/// Sentinel written in place of a not-yet-known offset; patched once the
/// real value is known. Offset `0` always belongs to `MetaData`, so a node
/// record can never legitimately point back to it.
const PENDING_OFFSET: u64 = 0;

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Copy + Serialize + DeserializeOwned,
    V: Copy + Serialize + DeserializeOwned,
{
    /// Write a deterministic snapshot of the tree to the file at `path`,
    /// creating or truncating it.
    ///
    /// The file handle is opened, written, and dropped within this call on
    /// every exit path, including an error return.
    ///
    /// ## Errors
    /// [`BTreeError::IoError`] on open/write/seek failure,
    /// [`BTreeError::SerializationError`] if a record fails to encode.
    pub fn serialise(&self, path: impl AsRef<Path>) -> BTreeResult<()> {
        let file = File::create(path).map_err(|e| BTreeError::IoError {
            operation: "create snapshot file".into(),
            reason: e.to_string(),
        })?;
        let mut writer = BufWriter::new(file);
        self.serialise_to(&mut writer)?;
        writer.flush().map_err(|e| BTreeError::IoError {
            operation: "flush snapshot file".into(),
            reason: e.to_string(),
        })
    }

    /// Write a deterministic snapshot of the tree to `writer`.
    ///
    /// Two trees with identical contents produce byte-identical snapshots:
    /// node layout mirrors the live arena's depth-first shape rather than
    /// arena slot order, so a tree rebuilt from freed-and-reused slots
    /// serialises the same as one built without any deletions.
    ///
    /// ## Errors
    /// [`BTreeError::IoError`] on a write/seek failure,
    /// [`BTreeError::SerializationError`] if a record fails to encode.
    pub fn serialise_to<W: Write + Seek>(&self, writer: &mut W) -> BTreeResult<()> {
        let meta = MetaData {
            max_keys: self.order().max_keys() as u64,
            min_keys: self.order().min_keys() as u64,
            root_offset: PENDING_OFFSET,
            tree_height: self.height() as u64,
        };
        let meta_size = bincode::serialized_size(&meta)
            .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;
        bincode::serialize_into(&mut *writer, &meta)
            .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;

        let mut pending_next_field: Option<u64> = None;
        let root_offset = match self.root_id() {
            Some(root) => self.write_node(writer, root, &mut pending_next_field)?,
            None => meta_size,
        };

        writer
            .seek(SeekFrom::Start(0))
            .map_err(|e| BTreeError::IoError { operation: "seek to metadata".into(), reason: e.to_string() })?;
        let meta = MetaData {
            root_offset,
            ..meta
        };
        bincode::serialize_into(&mut *writer, &meta)
            .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;
        writer
            .seek(SeekFrom::End(0))
            .map_err(|e| BTreeError::IoError { operation: "seek to end".into(), reason: e.to_string() })?;
        Ok(())
    }

    /// Write `node_id`'s subtree depth-first, returning the file offset its
    /// own record was written at.
    ///
    /// `pending_next_field` carries the trailing `next_offset` field
    /// position of the last leaf written so far across the *entire* write,
    /// not just this call's own children, since a leaf's true successor can
    /// sit under a different, later-visited internal parent. Every leaf
    /// patches whatever is pending on entry, then leaves its own field
    /// position pending for whichever leaf comes next.
    fn write_node<W: Write + Seek>(
        &self,
        writer: &mut W,
        node_id: NodeId,
        pending_next_field: &mut Option<u64>,
    ) -> BTreeResult<u64> {
        let own_offset = writer
            .stream_position()
            .map_err(|e| BTreeError::IoError { operation: "stream position".into(), reason: e.to_string() })?;

        match &self.arena().get(node_id).body {
            LiveNodeBody::Leaf(leaf) => {
                let record: NodeRecord<K, V> = NodeRecord::Leaf {
                    keys: leaf.keys.clone(),
                    values: leaf.values.clone(),
                    next_offset: PENDING_OFFSET,
                };
                bincode::serialize_into(&mut *writer, &record)
                    .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;

                if let Some(field_offset) = pending_next_field.take() {
                    self.patch_next_offset(writer, field_offset, own_offset)?;
                }

                let current_pos = writer
                    .stream_position()
                    .map_err(|e| BTreeError::IoError { operation: "stream position".into(), reason: e.to_string() })?;
                // next_offset is the trailing 8 bytes of a Leaf record.
                *pending_next_field = Some(current_pos - 8);

                Ok(own_offset)
            }
            LiveNodeBody::Internal(node) => {
                let placeholder: NodeRecord<K, V> = NodeRecord::Internal {
                    keys: node.keys.clone(),
                    children: vec![PENDING_OFFSET; node.children.len()],
                };
                let record_size = bincode::serialized_size(&placeholder)
                    .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;
                bincode::serialize_into(&mut *writer, &placeholder)
                    .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;
                let after_record = own_offset + record_size;

                let children = node.children.clone();
                let mut child_offsets = Vec::with_capacity(children.len());
                for &child in &children {
                    let child_offset = self.write_node(writer, child, pending_next_field)?;
                    child_offsets.push(child_offset);
                }

                writer
                    .seek(SeekFrom::Start(own_offset))
                    .map_err(|e| BTreeError::IoError { operation: "seek to node record".into(), reason: e.to_string() })?;
                let filled: NodeRecord<K, V> = NodeRecord::Internal {
                    keys: node.keys.clone(),
                    children: child_offsets,
                };
                bincode::serialize_into(&mut *writer, &filled)
                    .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;
                writer
                    .seek(SeekFrom::Start(after_record))
                    .map_err(|e| BTreeError::IoError { operation: "seek past node record".into(), reason: e.to_string() })?;

                Ok(own_offset)
            }
        }
    }

    fn patch_next_offset<W: Write + Seek>(
        &self,
        writer: &mut W,
        field_offset: u64,
        value: u64,
    ) -> BTreeResult<()> {
        let resume = writer
            .stream_position()
            .map_err(|e| BTreeError::IoError { operation: "stream position".into(), reason: e.to_string() })?;
        writer
            .seek(SeekFrom::Start(field_offset))
            .map_err(|e| BTreeError::IoError { operation: "seek to next_offset".into(), reason: e.to_string() })?;
        bincode::serialize_into(&mut *writer, &value)
            .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;
        writer
            .seek(SeekFrom::Start(resume))
            .map_err(|e| BTreeError::IoError { operation: "resume after patch".into(), reason: e.to_string() })?;
        Ok(())
    }

    /// Load a tree from the snapshot file at `path`.
    ///
    /// `order` must match the branching factor the snapshot was written
    /// with (the parameter check happens before any node data is read).
    ///
    /// ## Errors
    /// [`BTreeError::IoError`] on open/read/seek failure, plus every error
    /// [`Self::deserialise_from`] can return.
    pub fn deserialise(path: impl AsRef<Path>, order: super::types::Order) -> BTreeResult<Self> {
        let file = File::open(path).map_err(|e| BTreeError::IoError {
            operation: "open snapshot file".into(),
            reason: e.to_string(),
        })?;
        let mut reader = BufReader::new(file);
        Self::deserialise_from(&mut reader, order)
    }

    /// Load a tree from a snapshot previously written by
    /// [`Self::serialise_to`].
    ///
    /// ## Errors
    /// [`BTreeError::IncompatibleParameters`] if the snapshot's branching
    /// factor differs from `order`, [`BTreeError::CorruptedSnapshot`] if a
    /// record is structurally invalid, [`BTreeError::IoError`] on a
    /// read/seek failure.
    pub fn deserialise_from<R: Read + Seek>(
        reader: &mut R,
        order: super::types::Order,
    ) -> BTreeResult<Self> {
        let meta: MetaData = bincode::deserialize_from(&mut *reader)
            .map_err(|e| BTreeError::DeserializationError { reason: e.to_string() })?;

        if meta.max_keys as usize != order.max_keys() || meta.min_keys as usize != order.min_keys() {
            return Err(BTreeError::IncompatibleParameters {
                file_max_keys: meta.max_keys as usize,
                file_min_keys: meta.min_keys as usize,
                expected_max_keys: order.max_keys(),
                expected_min_keys: order.min_keys(),
            });
        }

        let mut tree = BPlusTree::from_parts(order);

        let meta_size = bincode::serialized_size(&meta)
            .map_err(|e| BTreeError::SerializationError { reason: e.to_string() })?;
        if meta.root_offset == meta_size {
            // Empty tree: root_offset was never redirected away from the
            // first byte past the header.
            let end = reader
                .seek(SeekFrom::End(0))
                .map_err(|e| BTreeError::IoError { operation: "seek to end".into(), reason: e.to_string() })?;
            if end <= meta_size {
                return Ok(tree);
            }
        }

        let mut offsets: HashMap<u64, NodeId> = HashMap::new();
        let mut pending_next: Vec<(NodeId, u64)> = Vec::new();
        let root = tree.read_node(reader, meta.root_offset, None, &mut offsets, &mut pending_next)?;
        tree.set_root(Some(root));

        for (leaf_id, next_offset) in pending_next {
            if next_offset == PENDING_OFFSET {
                continue;
            }
            let target = *offsets.get(&next_offset).ok_or_else(|| BTreeError::CorruptedSnapshot {
                reason: format!("leaf next_offset {} does not name a known node", next_offset),
            })?;
            tree.arena_mut().get_mut(leaf_id).body.as_leaf_mut().next = Some(target);
        }

        Ok(tree)
    }

    /// Read one node record and recursively materialise its subtree into
    /// `self`'s arena, reusing the cached `NodeId` for an offset already
    /// visited rather than re-parsing its record.
    fn read_node<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        offset: u64,
        parent: Option<NodeId>,
        offsets: &mut HashMap<u64, NodeId>,
        pending_next: &mut Vec<(NodeId, u64)>,
    ) -> BTreeResult<NodeId> {
        if let Some(&id) = offsets.get(&offset) {
            return Ok(id);
        }

        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| BTreeError::IoError { operation: "seek to node record".into(), reason: e.to_string() })?;
        let record: NodeRecord<K, V> = bincode::deserialize_from(&mut *reader)
            .map_err(|e| BTreeError::DeserializationError { reason: e.to_string() })?;

        match record {
            NodeRecord::Leaf { keys, values, next_offset } => {
                if keys.len() != values.len() {
                    return Err(BTreeError::CorruptedSnapshot {
                        reason: "leaf record has mismatched keys/values lengths".into(),
                    });
                }
                let mut leaf = super::node::LeafNode::new();
                leaf.keys = keys;
                leaf.values = values;
                let id = self.arena_mut().allocate(parent, LiveNodeBody::Leaf(leaf));
                offsets.insert(offset, id);
                pending_next.push((id, next_offset));
                Ok(id)
            }
            NodeRecord::Internal { keys, children: child_offsets } => {
                if child_offsets.len() != keys.len() + 1 {
                    return Err(BTreeError::CorruptedSnapshot {
                        reason: "internal record has |children| != |keys| + 1".into(),
                    });
                }
                let node = super::node::InternalNode { keys, children: Vec::new() };
                let id = self.arena_mut().allocate(parent, LiveNodeBody::Internal(node));
                offsets.insert(offset, id);

                let mut children = Vec::with_capacity(child_offsets.len());
                for child_offset in child_offsets {
                    children.push(self.read_node(reader, child_offset, Some(id), offsets, pending_next)?);
                }
                self.arena_mut().get_mut(id).body.as_internal_mut().children = children;
                Ok(id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::types::Order;
    use std::io::Cursor;

    fn round_trip(tree: &BPlusTree<i32, i32>) -> BPlusTree<i32, i32> {
        let mut buffer = Cursor::new(Vec::new());
        tree.serialise_to(&mut buffer).unwrap();
        buffer.set_position(0);
        BPlusTree::deserialise_from(&mut buffer, tree.order()).unwrap()
    }

    fn all_pairs(tree: &BPlusTree<i32, i32>) -> Vec<(i32, i32)> {
        tree.range_scan(&i32::MIN, &i32::MAX).collect()
    }

    #[test]
    fn empty_tree_round_trips() {
        let tree = BPlusTree::<i32, i32>::new(4).unwrap();
        let restored = round_trip(&tree);
        assert_eq!(all_pairs(&restored), vec![]);
        assert_eq!(restored.height(), 0);
    }

    #[test]
    fn single_leaf_round_trips() {
        let mut tree = BPlusTree::<i32, i32>::new(4).unwrap();
        tree.insert(1, 10);
        tree.insert(2, 20);
        let restored = round_trip(&tree);
        assert_eq!(all_pairs(&restored), vec![(1, 10), (2, 20)]);
        assert_eq!(restored.height(), 1);
    }

    #[test]
    fn multi_level_tree_round_trips_with_working_leaf_chain() {
        let mut tree = BPlusTree::<i32, i32>::new(3).unwrap();
        for i in 0..30 {
            tree.insert(i, i * 2);
        }
        let restored = round_trip(&tree);
        assert_eq!(restored.height(), tree.height());

        let expected: Vec<(i32, i32)> = (0..30).map(|i| (i, i * 2)).collect();
        assert_eq!(all_pairs(&restored), expected);

        // Point lookups and a mid-range scan both exercise the restored
        // structure, not just the leaf chain.
        assert_eq!(restored.search(&15), Some(30));
        let mid: Vec<(i32, i32)> = restored.range_scan(&10, &14).collect();
        assert_eq!(mid, vec![(10, 20), (11, 22), (12, 24), (13, 26), (14, 28)]);
    }

    #[test]
    fn tree_with_duplicate_keys_round_trips() {
        let mut tree = BPlusTree::<i32, i32>::new(3).unwrap();
        tree.insert(1, 100);
        tree.insert(1, 200);
        tree.insert(2, 20);
        let restored = round_trip(&tree);
        assert_eq!(all_pairs(&restored), vec![(1, 200), (1, 100), (2, 20)]);
    }

    #[test]
    fn mismatched_order_is_rejected() {
        let mut tree = BPlusTree::<i32, i32>::new(4).unwrap();
        tree.insert(1, 1);
        let mut buffer = Cursor::new(Vec::new());
        tree.serialise_to(&mut buffer).unwrap();
        buffer.set_position(0);

        let wrong_order = Order::new(5).unwrap();
        let err = BPlusTree::<i32, i32>::deserialise_from(&mut buffer, wrong_order).unwrap_err();
        assert!(matches!(err, BTreeError::IncompatibleParameters { .. }));
    }

    #[test]
    fn round_trip_via_a_real_file() {
        let mut tree = BPlusTree::<i32, i32>::new(4).unwrap();
        for i in 0..50 {
            tree.insert(i, i);
        }

        let file = tempfile::NamedTempFile::new().unwrap();
        tree.serialise(file.path()).unwrap();

        let restored = BPlusTree::<i32, i32>::deserialise(file.path(), tree.order()).unwrap();
        assert_eq!(all_pairs(&restored), all_pairs(&tree));
    }

    #[test]
    fn opening_a_missing_snapshot_file_is_an_io_error() {
        let order = Order::new(4).unwrap();
        let err = BPlusTree::<i32, i32>::deserialise("/nonexistent/path/snapshot.bin", order)
            .unwrap_err();
        assert!(matches!(err, BTreeError::IoError { .. }));
    }
}
