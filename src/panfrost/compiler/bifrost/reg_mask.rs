// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::ir::*;
use compiler::bitset::RegMask;

fn reg_ref_mask(reg: &RegRef) -> RegMask {
    RegMask::from_range(reg.base().into(), reg.comps().into())
        .unwrap_or_else(|err| panic!("Invalid register {reg}: {err}"))
}

/// Returns the set of registers read by `instr`.
///
/// With `staging_only`, only the staging register read by a message is
/// returned, which is the first source of an `sr_read` opcode.
pub fn read_mask(instr: &Instr, staging_only: bool) -> RegMask {
    let mut mask = RegMask::EMPTY;

    if staging_only && !instr.op.sr_read() {
        return mask;
    }

    for src in &instr.srcs {
        if let Index::Reg(reg) = src {
            mask |= reg_ref_mask(reg);
        }

        if staging_only {
            break;
        }
    }

    mask
}

/// Returns the set of registers written by `instr`.
pub fn write_mask(instr: &Instr) -> RegMask {
    let mut mask = RegMask::EMPTY;

    for dst in &instr.dsts {
        match dst {
            Index::Null => (),
            Index::Reg(reg) => mask |= reg_ref_mask(reg),
            _ => panic!("Destination {dst} of {} is not a register", instr.op),
        }
    }

    // Instructions like AXCHG.i32 unconditionally both read and write
    // staging registers.  Even if we discard the result, the write still
    // happens and needs to be included in our calculations.
    if instr.op.sr_write() {
        if let (Some(Index::Null), Some(Index::Reg(sr))) =
            (instr.dsts.first(), instr.srcs.first())
        {
            mask |= reg_ref_mask(sr);
        }
    }

    mask
}
