// Copyright © 2025 Valve Corporation
// SPDX-License-Identifier: MIT

//! Dataflow analysis
//!
//! This module contains a solver for forward dataflow problems.  A dataflow
//! problem is characterized by a "transfer" function, which updates information
//! based on a single block, and a "join" function, which updates information
//! along a control flow edge.  See the wikipedia article for more information on
//! this terminology.
//! https://en.wikipedia.org/wiki/Data-flow_analysis#Basic_principles

use crate::bitset::BitSet;
use crate::cfg::CFG;
use std::collections::VecDeque;

/// A FIFO where each item is unique
///
/// An item which is already queued is not queued a second time.  Once popped,
/// it may be pushed again.
#[derive(Default)]
struct FIFOSet {
    vec_deque: VecDeque<usize>,
    queued: BitSet,
}

impl FIFOSet {
    fn push_back(&mut self, x: usize) {
        if self.queued.insert(x) {
            self.vec_deque.push_back(x);
        }
    }

    fn pop_front(&mut self) -> Option<usize> {
        let out = self.vec_deque.pop_front();
        if let Some(x) = out {
            let exists = self.queued.remove(x);
            debug_assert!(exists);
        }
        out
    }
}

pub struct ForwardDataflow<'a, Block, BlockIn, BlockOut, Transfer, Join>
where
    Transfer: FnMut(usize, &mut Block, &mut BlockOut, &BlockIn) -> bool,
    Join: FnMut(&mut BlockIn, &BlockOut),
{
    pub cfg: &'a mut CFG<Block>,
    pub block_in: &'a mut [BlockIn],
    pub block_out: &'a mut [BlockOut],

    /// Generate the block output from the block's input
    ///
    /// The block itself may be updated with per-block results.  Returns true
    /// if block_out has changed, false otherwise.
    pub transfer: Transfer,

    /// Update the block input based on a predecessor's output
    pub join: Join,
}

impl<'a, Block, BlockIn, BlockOut, Transfer, Join>
    ForwardDataflow<'a, Block, BlockIn, BlockOut, Transfer, Join>
where
    Transfer: FnMut(usize, &mut Block, &mut BlockOut, &BlockIn) -> bool,
    Join: FnMut(&mut BlockIn, &BlockOut),
{
    /// Solve the dataflow problem and generate output for each block
    ///
    /// Every block is queued once in program order.  Each time a block is
    /// popped, the outputs of all of its predecessors are joined into its
    /// input and then it is transferred.  If its output changed, all of its
    /// successors are queued again.  Returns the number of transfers run.
    pub fn solve(self) -> usize {
        let num_blocks = self.cfg.len();
        assert_eq!(num_blocks, self.block_in.len());
        assert_eq!(num_blocks, self.block_out.len());

        let ForwardDataflow {
            cfg,
            block_in,
            block_out,
            mut transfer,
            mut join,
        } = self;

        let mut worklist = FIFOSet::default();
        for block_idx in 0..num_blocks {
            worklist.push_back(block_idx);
        }

        let mut num_transfers = 0;
        while let Some(block_idx) = worklist.pop_front() {
            for &pred_idx in cfg.pred_indices(block_idx) {
                join(&mut block_in[block_idx], &block_out[pred_idx]);
            }

            num_transfers += 1;
            let changed = transfer(
                block_idx,
                &mut cfg[block_idx],
                &mut block_out[block_idx],
                &block_in[block_idx],
            );

            if changed {
                for &succ_idx in cfg.succ_indices(block_idx) {
                    worklist.push_back(succ_idx);
                }
            }
        }
        num_transfers
    }
}
