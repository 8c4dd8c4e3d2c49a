// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Scoreboard slot and dependency assignment
//!
//! Messages to asynchronous units (memory, varyings, textures, ...) complete
//! out of order.  Each clause with a message is assigned one of eight
//! scoreboard slots which is signaled on completion, and each clause records
//! the set of slots it must wait on before issuing.  Dependencies are found by
//! a forward dataflow analysis tracking, per slot, which registers are still
//! to be read or written by in-flight messages.
//!
//! Slot 0 doubles as the slot for serialized messages and slot 7 is reserved
//! for barriers.  Slots 0 to 5 form the general pool a barrier waits on.

use crate::api::{DebugFlags, GetDebugFlags, DEBUG};
use crate::ir::*;
use crate::reg_mask::{read_mask, write_mask};
use compiler::bitset::RegMask;
use compiler::dataflow::ForwardDataflow;
use tracing::{debug, info, trace};

/// Number of slots usable by messages other than barriers
pub const NUM_GENERAL_SLOTS: usize = 6;

/// Slot used for all serialized messages
pub const SLOT_SERIAL: u8 = 0;

/// Slot reserved for BARRIER
pub const SLOT_BARRIER: u8 = 7;

/// Every slot of the general pool
pub const GENERAL_SLOTS_MASK: u8 = (1 << NUM_GENERAL_SLOTS) - 1;

/// How the scoreboard must treat a message-passing instruction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HazardClass {
    Normal,
    /// Must wait on every earlier serialized message
    MustSerialize,
    /// Must be issued on slot 0
    IsAtestOrZsEmit,
    /// Must be issued on slot 7 and waits on the whole general pool
    IsBarrier,
}

/// Classifies a message-passing instruction.
pub fn classify(instr: &Instr, flags: DebugFlags) -> HazardClass {
    // For debug, serialize everything to disable scoreboard opts
    if flags.nosb() {
        return HazardClass::MustSerialize;
    }

    // Although nominally on the attribute unit, image loads have the same
    // coherency requirements as general memory loads.
    if instr.op == Opcode::LdAttrTex {
        return HazardClass::MustSerialize;
    }

    match instr.op.message() {
        // LD_VAR must be serialized per-quad and memory accesses need to be
        // synchronized with each other.
        MessageKind::Varying
        | MessageKind::Load
        | MessageKind::Store
        | MessageKind::Atomic => HazardClass::MustSerialize,
        MessageKind::Atest | MessageKind::ZStencil => {
            HazardClass::IsAtestOrZsEmit
        }
        MessageKind::Barrier => HazardClass::IsBarrier,
        MessageKind::None
        | MessageKind::Attribute
        | MessageKind::Tex
        | MessageKind::VarTex
        | MessageKind::Blend
        | MessageKind::Tile
        | MessageKind::Job => HazardClass::Normal,
    }
}

/// Chooses a scoreboard slot for a clause wrapping the given message.
pub fn choose_slot(message: &Instr, flags: DebugFlags) -> u8 {
    match message.op {
        // ATEST and ZS_EMIT must be issued with slot #0
        Opcode::Atest | Opcode::ZsEmit => 0,
        // BARRIER must be issued with slot #7
        Opcode::Barrier => SLOT_BARRIER,
        _ => match classify(message, flags) {
            HazardClass::MustSerialize => SLOT_SERIAL,
            // Everything else shares slot 0 as well.  Spreading messages
            // over the general pool would cut stalls but changes the
            // generated code.
            HazardClass::Normal
            | HazardClass::IsAtestOrZsEmit
            | HazardClass::IsBarrier => 0,
        },
    }
}

impl ScoreboardState {
    /// Read-after-write and write-after-write: waits on every slot with a
    /// pending write to one of `regs`.  Returns the slots waited on.
    fn depend_on_writers(&mut self, regs: RegMask) -> u8 {
        let mut deps = 0_u8;
        for slot in 0..NUM_SLOTS {
            if !self.write[slot].intersects(regs) {
                continue;
            }

            self.write[slot].clear();
            self.read[slot].clear();
            deps |= 1 << slot;
        }
        deps
    }

    /// Write-after-read: returns true if any slot has a pending staging read
    /// of one of `regs`, which then no longer needs tracking.
    fn set_staging_barrier(&mut self, regs: RegMask) -> bool {
        let mut barrier = false;
        for slot in 0..NUM_SLOTS {
            if !self.read[slot].intersects(regs) {
                continue;
            }

            self.read[slot].clear();
            barrier = true;
        }
        barrier
    }

    /// Records the registers accessed by the clause's message on its slot.
    fn push_clause(&mut self, clause: &Clause) {
        let Some(msg) = clause.message() else {
            return;
        };
        let slot = usize::from(clause.scoreboard_id);

        self.read[slot] |= read_mask(msg, true);

        if msg.op.sr_write() {
            self.write[slot] |= write_mask(msg);
        }
    }
}

/// Statistics from a run of the scoreboard pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssignStats {
    pub blocks: usize,
    pub block_visits: usize,
}

struct ScoreboardPass {
    flags: DebugFlags,
}

impl ScoreboardPass {
    fn new(flags: DebugFlags) -> ScoreboardPass {
        ScoreboardPass { flags }
    }

    fn assign_slots(&self, f: &mut Function) {
        for b in f.blocks.iter_mut() {
            for clause in b.clauses.iter_mut() {
                // Dependencies accumulate over every visit of the block
                clause.dependencies = 0;
                clause.staging_barrier = false;

                if let Some(msg) = clause.message() {
                    clause.scoreboard_id = choose_slot(msg, self.flags);
                }
            }
        }
    }

    /// Sets the dependencies for a given clause, updating the model
    fn set_dependencies(&self, clause: &mut Clause, st: &mut ScoreboardState) {
        let mut deps = 0_u8;
        let mut staging_barrier = false;

        for instr in clause.instrs() {
            let read = read_mask(instr, false);
            let written = write_mask(instr);

            deps |= st.depend_on_writers(read | written);
            staging_barrier |= st.set_staging_barrier(written);
        }

        if let Some(msg) = clause.message() {
            if classify(msg, self.flags) == HazardClass::MustSerialize {
                deps |= 1 << SLOT_SERIAL;
            }

            // Barriers must wait on all slots to flush existing work
            if msg.op == Opcode::Barrier {
                deps = GENERAL_SLOTS_MASK;
            }
        }

        clause.dependencies |= deps;
        clause.staging_barrier |= staging_barrier;
    }

    fn update_block(
        &self,
        b: &mut BasicBlock,
        sb_out: &mut ScoreboardState,
        sb_in: &ScoreboardState,
    ) -> bool {
        let mut state = *sb_in;

        for clause in b.clauses.iter_mut() {
            self.set_dependencies(clause, &mut state);
            state.push_clause(clause);
        }

        if *sb_out == state {
            false
        } else {
            trace!(block = b.label, out = %state, "scoreboard changed");
            *sb_out = state;
            true
        }
    }

    fn run(&self, f: &mut Function) -> AssignStats {
        self.assign_slots(f);

        let num_blocks = f.blocks.len();
        let mut sb_in = vec![ScoreboardState::default(); num_blocks];
        let mut sb_out = vec![ScoreboardState::default(); num_blocks];

        let block_visits = ForwardDataflow {
            cfg: &mut f.blocks,
            block_in: &mut sb_in[..],
            block_out: &mut sb_out[..],
            transfer: |_block_idx, b, sb_out, sb_in| {
                self.update_block(b, sb_out, sb_in)
            },
            join: |sb_in, pred_sb_out| {
                sb_in.merge(pred_sb_out);
            },
        }
        .solve();

        for ((b, sb_in), sb_out) in
            f.blocks.iter_mut().zip(sb_in).zip(sb_out)
        {
            b.scoreboard_in = sb_in;
            b.scoreboard_out = sb_out;
        }

        if self.flags.msgs() {
            for b in f.blocks.iter() {
                for (ci, clause) in b.clauses.iter().enumerate() {
                    info!(
                        block = b.label,
                        clause = ci,
                        slot = clause.scoreboard_id,
                        wait = clause.dependencies,
                        staging_barrier = clause.staging_barrier,
                        "scoreboard"
                    );
                }
            }
        }

        AssignStats {
            blocks: num_blocks,
            block_visits,
        }
    }
}

impl Function {
    /// Assigns scoreboard slots and dependencies using the process-wide
    /// debug flags.
    pub fn assign_scoreboard(&mut self) -> AssignStats {
        self.assign_scoreboard_with(*DEBUG)
    }

    pub fn assign_scoreboard_with(&mut self, flags: DebugFlags) -> AssignStats {
        let stats = ScoreboardPass::new(flags).run(self);
        debug!(
            blocks = stats.blocks,
            visits = stats.block_visits,
            "assigned scoreboard"
        );
        stats
    }
}

impl Shader {
    pub fn assign_scoreboard(&mut self) {
        for f in &mut self.functions {
            f.assign_scoreboard();
        }

        if DEBUG.shaders() {
            eprintln!("Bifrost IR after scoreboarding:\n{self}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn op(op: Opcode) -> Instr {
        Instr::new(op, [], [])
    }

    #[rstest]
    #[case(Opcode::LdVar, HazardClass::MustSerialize)]
    #[case(Opcode::LdVarFlat, HazardClass::MustSerialize)]
    #[case(Opcode::Load, HazardClass::MustSerialize)]
    #[case(Opcode::Store, HazardClass::MustSerialize)]
    #[case(Opcode::AXchg, HazardClass::MustSerialize)]
    #[case(Opcode::AtomC1, HazardClass::MustSerialize)]
    #[case(Opcode::LdAttrTex, HazardClass::MustSerialize)]
    #[case(Opcode::LdAttr, HazardClass::Normal)]
    #[case(Opcode::Texc, HazardClass::Normal)]
    #[case(Opcode::VarTex, HazardClass::Normal)]
    #[case(Opcode::Blend, HazardClass::Normal)]
    #[case(Opcode::StTile, HazardClass::Normal)]
    #[case(Opcode::FAdd, HazardClass::Normal)]
    #[case(Opcode::Atest, HazardClass::IsAtestOrZsEmit)]
    #[case(Opcode::ZsEmit, HazardClass::IsAtestOrZsEmit)]
    #[case(Opcode::Barrier, HazardClass::IsBarrier)]
    fn test_classify(#[case] opcode: Opcode, #[case] expected: HazardClass) {
        assert_eq!(classify(&op(opcode), DebugFlags::empty()), expected);
    }

    #[test]
    fn test_classify_nosb() {
        for opcode in Opcode::ALL {
            assert_eq!(
                classify(&op(opcode), DebugFlags::NOSB),
                HazardClass::MustSerialize
            );
        }
    }

    #[rstest]
    #[case(Opcode::Atest, 0)]
    #[case(Opcode::ZsEmit, 0)]
    #[case(Opcode::Barrier, 7)]
    #[case(Opcode::Load, 0)]
    #[case(Opcode::Texc, 0)]
    #[case(Opcode::Blend, 0)]
    fn test_choose_slot(
        #[case] opcode: Opcode,
        #[case] slot: u8,
        #[values(DebugFlags::empty(), DebugFlags::NOSB)] flags: DebugFlags,
    ) {
        assert_eq!(choose_slot(&op(opcode), flags), slot);
    }

    #[test]
    fn test_slots_in_range() {
        for opcode in Opcode::ALL.iter().filter(|o| o.is_message()) {
            let slot = choose_slot(&op(*opcode), DebugFlags::empty());
            assert!(usize::from(slot) < NUM_SLOTS);
            if *opcode != Opcode::Barrier {
                assert!(usize::from(slot) < NUM_GENERAL_SLOTS);
            }
        }
    }

    #[test]
    fn test_depend_on_writers() {
        let r = |base, count| RegMask::from_range(base, count).unwrap();
        let mut st = ScoreboardState::default();
        st.write[0] = r(4, 1);
        st.read[0] = r(8, 2);
        st.write[3] = r(10, 4);

        assert_eq!(st.depend_on_writers(r(20, 1)), 0);
        assert_eq!(st.depend_on_writers(r(4, 1) | r(12, 1)), 0b1001);
        assert!(st.is_empty());
    }

    #[test]
    fn test_set_staging_barrier() {
        let r = |base, count| RegMask::from_range(base, count).unwrap();
        let mut st = ScoreboardState::default();
        st.read[2] = r(0, 4);
        st.write[2] = r(8, 1);

        assert!(!st.set_staging_barrier(r(5, 1)));
        assert!(st.set_staging_barrier(r(3, 1)));
        assert!(st.read[2].is_empty());
        assert_eq!(st.write[2], r(8, 1));
    }
}
