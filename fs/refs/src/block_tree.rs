// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use log::debug;
use sable_fs::{ArgumentError, Error, InputError, Result};

use crate::descriptor::BlockDescriptor;

/// A binary interval tree mapping byte offsets to block descriptors.
///
/// Every node covers a half-open interval whose size is a power-of-two
/// multiple of the leaf value size; leaves hold at most one descriptor.
/// Nodes live in an arena and reference each other by index, and descent is
/// iterative. A second insertion into an occupied leaf hands back the
/// existing descriptor instead of replacing it, which is what makes the
/// metadata descent cycle-proof.
#[derive(Debug, Clone)]
pub(crate) struct BlockTree {
    nodes: Vec<TreeNode>,
    leaf_value_size: u64,
}

#[derive(Debug, Clone)]
struct TreeNode {
    start_offset: u64,
    end_offset: u64,
    /// Arena indices of the lower and upper half interval.
    sub_nodes: [Option<usize>; 2],
    /// The leaf value. Branch nodes never carry one.
    descriptor: Option<BlockDescriptor>,
}

/// The outcome of [`BlockTree::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Insertion {
    Inserted,
    /// The interval already carries a descriptor; the stored one is
    /// returned and the tree is unchanged.
    Existing(BlockDescriptor),
}

impl BlockTree {
    /// Creates a tree covering `size` bytes with leaf intervals of
    /// `leaf_value_size` bytes. The covered range is rounded up to the next
    /// power of two of leaves.
    pub(crate) fn new(size: u64, leaf_value_size: u64) -> Result<Self> {
        if size == 0 || leaf_value_size == 0 {
            return Err(Error::new(ArgumentError::InvalidValue));
        }
        let number_of_leaves = size.div_ceil(leaf_value_size).next_power_of_two();
        let span = number_of_leaves
            .checked_mul(leaf_value_size)
            .ok_or(InputError::Overflow)?;
        debug!(
            "Block tree over {span} bytes, {number_of_leaves} leaves of {leaf_value_size} bytes"
        );
        Ok(Self {
            nodes: vec![TreeNode {
                start_offset: 0,
                end_offset: span,
                sub_nodes: [None, None],
                descriptor: None,
            }],
            leaf_value_size,
        })
    }

    /// Inserts `descriptor` for the leaf interval containing `offset`. If
    /// the interval already holds a descriptor the existing one is returned
    /// untouched.
    pub(crate) fn insert(&mut self, offset: u64, descriptor: BlockDescriptor) -> Result<Insertion> {
        let index = self.descend_to_leaf(offset)?;
        if let Some(existing) = &self.nodes[index].descriptor {
            debug!(
                "Offset {offset:#x} already mapped to block {}, keeping it",
                existing.block_number
            );
            return Ok(Insertion::Existing(existing.clone()));
        }
        self.nodes[index].descriptor = Some(descriptor);
        Ok(Insertion::Inserted)
    }

    /// Looks up the descriptor covering `offset` together with the start
    /// offset of its leaf interval.
    pub(crate) fn lookup(&self, offset: u64) -> Option<(&BlockDescriptor, u64)> {
        if offset >= self.nodes[0].end_offset {
            return None;
        }
        let mut index = 0;
        loop {
            let node = &self.nodes[index];
            if node.end_offset - node.start_offset == self.leaf_value_size {
                return node.descriptor.as_ref().map(|descriptor| (descriptor, node.start_offset));
            }
            let half = (node.end_offset - node.start_offset) / 2;
            let upper = offset >= node.start_offset + half;
            index = node.sub_nodes[upper as usize]?;
        }
    }

    /// Walks from the root to the leaf interval containing `offset`,
    /// materializing missing nodes along the way.
    fn descend_to_leaf(&mut self, offset: u64) -> Result<usize> {
        if offset >= self.nodes[0].end_offset {
            return Err(Error::new(ArgumentError::OutOfRange));
        }
        let mut index = 0;
        loop {
            let (start_offset, end_offset) = {
                let node = &self.nodes[index];
                (node.start_offset, node.end_offset)
            };
            if end_offset - start_offset == self.leaf_value_size {
                return Ok(index);
            }

            let half = (end_offset - start_offset) / 2;
            let upper = offset >= start_offset + half;
            match self.nodes[index].sub_nodes[upper as usize] {
                Some(sub_node) => index = sub_node,
                None => {
                    let sub_node = self.nodes.len();
                    let start = if upper { start_offset + half } else { start_offset };
                    self.nodes.push(TreeNode {
                        start_offset: start,
                        end_offset: start + half,
                        sub_nodes: [None, None],
                        descriptor: None,
                    });
                    self.nodes[index].sub_nodes[upper as usize] = Some(sub_node);
                    index = sub_node;
                }
            }
        }
    }
}
