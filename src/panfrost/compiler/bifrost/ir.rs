// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Post-scheduling Bifrost IR
//!
//! By the time scoreboarding runs, registers have been allocated and the
//! scheduler has grouped instructions into clauses.  This module only models
//! what the passes after scheduling need: operands, opcodes and their static
//! properties, clauses with their scoreboard annotations, and the CFG of
//! blocks.

use compiler::bitset::RegMask;
use compiler::cfg::CFG;
use std::fmt;

/// Number of hardware scoreboard slots
pub const NUM_SLOTS: usize = 8;

/// A contiguous run of general-purpose registers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegRef {
    base: u8,
    comps: u8,
}

impl RegRef {
    pub fn new(base: u8, comps: u8) -> RegRef {
        assert!(comps > 0, "Register references cover at least one register");
        RegRef { base, comps }
    }

    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn comps(&self) -> u8 {
        self.comps
    }
}

impl fmt::Display for RegRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comps == 1 {
            write!(f, "r{}", self.base)
        } else {
            let last = usize::from(self.base) + usize::from(self.comps) - 1;
            write!(f, "r{}..r{}", self.base, last)
        }
    }
}

/// An instruction operand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Index {
    /// Discarded destination or absent source
    Null,
    Reg(RegRef),
    /// Fast-access uniform
    Fau(u32),
    Imm(u32),
}

impl Index {
    pub fn reg(base: u8, comps: u8) -> Index {
        Index::Reg(RegRef::new(base, comps))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Null => write!(f, "_"),
            Index::Reg(reg) => write!(f, "{reg}"),
            Index::Fau(idx) => write!(f, "u{idx}"),
            Index::Imm(imm) => write!(f, "#{imm:#x}"),
        }
    }
}

/// The asynchronous unit an instruction sends a message to, if any
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    None,
    Varying,
    Attribute,
    Tex,
    VarTex,
    Load,
    Store,
    Atomic,
    Barrier,
    Blend,
    Tile,
    ZStencil,
    Atest,
    Job,
}

/// Static properties of an opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpProps {
    pub name: &'static str,
    pub message: MessageKind,
    /// The first source is a staging register read by the message
    pub sr_read: bool,
    /// The staging register is written by the message, unconditionally
    pub sr_write: bool,
}

const fn alu(name: &'static str) -> OpProps {
    OpProps {
        name,
        message: MessageKind::None,
        sr_read: false,
        sr_write: false,
    }
}

const fn msg(
    name: &'static str,
    message: MessageKind,
    sr_read: bool,
    sr_write: bool,
) -> OpProps {
    OpProps {
        name,
        message,
        sr_read,
        sr_write,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    Mov,
    FAdd,
    FFma,
    FCmp,
    IAdd,
    ISub,
    ICmp,
    Csel,
    LShiftOr,
    F32ToS32,
    S32ToF32,
    Jump,
    BranchZ,
    Discard,
    LdVar,
    LdVarImm,
    LdVarFlat,
    LdAttr,
    LdAttrImm,
    LdAttrTex,
    LeaAttr,
    Texs2D,
    Texc,
    VarTex,
    Load,
    Store,
    AtomC,
    AtomC1,
    AtomReturn,
    AXchg,
    ACmpXchg,
    Barrier,
    Blend,
    LdTile,
    StTile,
    StCvt,
    ZsEmit,
    Atest,
    Kaboom,
}

impl Opcode {
    pub const ALL: [Opcode; 40] = [
        Opcode::Nop,
        Opcode::Mov,
        Opcode::FAdd,
        Opcode::FFma,
        Opcode::FCmp,
        Opcode::IAdd,
        Opcode::ISub,
        Opcode::ICmp,
        Opcode::Csel,
        Opcode::LShiftOr,
        Opcode::F32ToS32,
        Opcode::S32ToF32,
        Opcode::Jump,
        Opcode::BranchZ,
        Opcode::Discard,
        Opcode::LdVar,
        Opcode::LdVarImm,
        Opcode::LdVarFlat,
        Opcode::LdAttr,
        Opcode::LdAttrImm,
        Opcode::LdAttrTex,
        Opcode::LeaAttr,
        Opcode::Texs2D,
        Opcode::Texc,
        Opcode::VarTex,
        Opcode::Load,
        Opcode::Store,
        Opcode::AtomC,
        Opcode::AtomC1,
        Opcode::AtomReturn,
        Opcode::AXchg,
        Opcode::ACmpXchg,
        Opcode::Barrier,
        Opcode::Blend,
        Opcode::LdTile,
        Opcode::StTile,
        Opcode::StCvt,
        Opcode::ZsEmit,
        Opcode::Atest,
        Opcode::Kaboom,
    ];

    pub const fn props(&self) -> OpProps {
        use MessageKind as M;
        match self {
            Opcode::Nop => alu("NOP"),
            Opcode::Mov => alu("MOV.i32"),
            Opcode::FAdd => alu("FADD.f32"),
            Opcode::FFma => alu("FMA.f32"),
            Opcode::FCmp => alu("FCMP.f32"),
            Opcode::IAdd => alu("IADD.s32"),
            Opcode::ISub => alu("ISUB.s32"),
            Opcode::ICmp => alu("ICMP.i32"),
            Opcode::Csel => alu("CSEL.i32"),
            Opcode::LShiftOr => alu("LSHIFT_OR.i32"),
            Opcode::F32ToS32 => alu("F32_TO_S32"),
            Opcode::S32ToF32 => alu("S32_TO_F32"),
            Opcode::Jump => alu("JUMP"),
            Opcode::BranchZ => alu("BRANCHZ.i32"),
            Opcode::Discard => alu("DISCARD.f32"),
            Opcode::LdVar => msg("LD_VAR", M::Varying, false, true),
            Opcode::LdVarImm => msg("LD_VAR_IMM", M::Varying, false, true),
            Opcode::LdVarFlat => msg("LD_VAR_FLAT", M::Varying, false, true),
            Opcode::LdAttr => msg("LD_ATTR", M::Attribute, false, true),
            Opcode::LdAttrImm => {
                msg("LD_ATTR_IMM", M::Attribute, false, true)
            }
            Opcode::LdAttrTex => {
                msg("LD_ATTR_TEX", M::Attribute, false, true)
            }
            Opcode::LeaAttr => msg("LEA_ATTR", M::Attribute, false, true),
            Opcode::Texs2D => msg("TEXS_2D.f32", M::Tex, false, false),
            Opcode::Texc => msg("TEXC", M::Tex, true, true),
            Opcode::VarTex => msg("VAR_TEX.f32", M::VarTex, false, true),
            Opcode::Load => msg("LOAD", M::Load, false, true),
            Opcode::Store => msg("STORE", M::Store, true, false),
            Opcode::AtomC => msg("ATOM_C.i32", M::Atomic, true, true),
            Opcode::AtomC1 => msg("ATOM_C1.i32", M::Atomic, false, true),
            Opcode::AtomReturn => {
                msg("ATOM_RETURN.i32", M::Atomic, true, true)
            }
            Opcode::AXchg => msg("AXCHG.i32", M::Atomic, true, true),
            Opcode::ACmpXchg => msg("ACMPXCHG.i32", M::Atomic, true, true),
            Opcode::Barrier => msg("BARRIER", M::Barrier, false, false),
            Opcode::Blend => msg("BLEND", M::Blend, true, false),
            Opcode::LdTile => msg("LD_TILE", M::Tile, false, true),
            Opcode::StTile => msg("ST_TILE", M::Tile, true, false),
            Opcode::StCvt => msg("ST_CVT", M::Tile, true, false),
            Opcode::ZsEmit => msg("ZS_EMIT", M::ZStencil, true, true),
            Opcode::Atest => msg("ATEST", M::Atest, false, false),
            Opcode::Kaboom => msg("KABOOM", M::Job, true, false),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.props().name
    }

    pub const fn message(&self) -> MessageKind {
        self.props().message
    }

    pub const fn sr_read(&self) -> bool {
        self.props().sr_read
    }

    pub const fn sr_write(&self) -> bool {
        self.props().sr_write
    }

    pub const fn is_message(&self) -> bool {
        !matches!(self.message(), MessageKind::None)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instr {
    pub op: Opcode,
    pub dsts: Vec<Index>,
    pub srcs: Vec<Index>,
}

impl Instr {
    pub fn new(
        op: Opcode,
        dsts: impl Into<Vec<Index>>,
        srcs: impl Into<Vec<Index>>,
    ) -> Instr {
        Instr {
            op,
            dsts: dsts.into(),
            srcs: srcs.into(),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, dst) in self.dsts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dst}")?;
        }
        if !self.dsts.is_empty() {
            write!(f, " = ")?;
        }
        write!(f, "{}", self.op)?;
        let mut sep = " ";
        for src in &self.srcs {
            write!(f, "{sep}{src}")?;
            sep = ", ";
        }
        Ok(())
    }
}

/// A bundle of instructions issued together
///
/// At most one instruction in a clause sends a message; the scheduler
/// guarantees this and [`Clause::new`] checks it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clause {
    instrs: Vec<Instr>,
    message: Option<usize>,

    /// Scoreboard slot signaled when the message completes
    pub scoreboard_id: u8,
    /// Set of slots waited on before the clause issues
    pub dependencies: u8,
    /// Wait for in-flight staging register reads before issuing
    pub staging_barrier: bool,
}

impl Clause {
    pub fn new(instrs: Vec<Instr>) -> Clause {
        let mut message = None;
        for (ip, instr) in instrs.iter().enumerate() {
            if instr.op.is_message() {
                assert!(
                    message.is_none(),
                    "Clause has more than one message instruction"
                );
                message = Some(ip);
            }
        }

        Clause {
            instrs,
            message,
            scoreboard_id: 0,
            dependencies: 0,
            staging_barrier: false,
        }
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Returns the message-passing instruction, if any.
    pub fn message(&self) -> Option<&Instr> {
        self.message.map(|ip| &self.instrs[ip])
    }

    /// Returns true if this clause waits on scoreboard slot `slot`.
    pub fn depends_on(&self, slot: u8) -> bool {
        usize::from(slot) < NUM_SLOTS && self.dependencies & (1 << slot) != 0
    }

    /// The dependency wait immediate encoded in the clause header
    pub fn wait_mask(&self) -> u8 {
        self.dependencies
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clause id({})", self.scoreboard_id)?;
        if self.dependencies != 0 {
            write!(f, " wait(")?;
            for slot in 0..NUM_SLOTS {
                if self.dependencies & (1 << slot) != 0 {
                    write!(f, " {slot}")?;
                }
            }
            write!(f, " )")?;
        }
        if self.staging_barrier {
            write!(f, " osrb")?;
        }
        writeln!(f, " {{")?;
        for instr in &self.instrs {
            writeln!(f, "    {instr}")?;
        }
        write!(f, "}}")
    }
}

/// Registers with pending scoreboarded accesses, per slot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScoreboardState {
    /// Staging registers still to be read by in-flight messages
    pub read: [RegMask; NUM_SLOTS],
    /// Registers still to be written by in-flight messages
    pub write: [RegMask; NUM_SLOTS],
}

impl ScoreboardState {
    /// Joins `other` into self, returning true if self changed.
    pub fn merge(&mut self, other: &ScoreboardState) -> bool {
        let mut changed = false;
        for slot in 0..NUM_SLOTS {
            changed |= self.read[slot].union_with(other.read[slot]);
            changed |= self.write[slot].union_with(other.write[slot]);
        }
        changed
    }

    /// Returns true if every pending access in self is also in `other`.
    pub fn is_subset_of(&self, other: &ScoreboardState) -> bool {
        (0..NUM_SLOTS).all(|slot| {
            self.read[slot].is_subset_of(other.read[slot])
                && self.write[slot].is_subset_of(other.write[slot])
        })
    }

    pub fn is_empty(&self) -> bool {
        self.read.iter().chain(self.write.iter()).all(RegMask::is_empty)
    }
}

impl fmt::Display for ScoreboardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for slot in 0..NUM_SLOTS {
            let (read, write) = (self.read[slot], self.write[slot]);
            if read.is_empty() && write.is_empty() {
                continue;
            }
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{slot}:r{read}w{write}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub label: u32,
    pub clauses: Vec<Clause>,
    pub scoreboard_in: ScoreboardState,
    pub scoreboard_out: ScoreboardState,
}

impl BasicBlock {
    pub fn new(label: u32, clauses: Vec<Clause>) -> BasicBlock {
        BasicBlock {
            label,
            clauses,
            scoreboard_in: Default::default(),
            scoreboard_out: Default::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    pub blocks: CFG<BasicBlock>,
}

impl Function {
    pub fn new(blocks: CFG<BasicBlock>) -> Function {
        Function { blocks }
    }

    pub fn iter_clauses(&self) -> impl '_ + Iterator<Item = &Clause> {
        self.blocks.iter().flat_map(|b| b.clauses.iter())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = |idx: usize| self.blocks[idx].label;
        for (i, b) in self.blocks.iter().enumerate() {
            write!(f, "block{} {{", b.label)?;
            if !b.scoreboard_in.is_empty() {
                write!(f, " sb_in[{}]", b.scoreboard_in)?;
            }
            writeln!(f)?;
            for clause in &b.clauses {
                for line in clause.to_string().lines() {
                    writeln!(f, "  {line}")?;
                }
            }
            write!(f, "}}")?;
            let mut sep = " ->";
            for &s in self.blocks.succ_indices(i) {
                write!(f, "{sep} block{}", label(s))?;
                sep = ",";
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub struct Shader {
    pub functions: Vec<Function>,
}

impl fmt::Display for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for func in &self.functions {
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_message() {
        let clause = Clause::new(vec![
            Instr::new(Opcode::IAdd, [Index::reg(0, 1)], [Index::reg(1, 1)]),
            Instr::new(Opcode::LdVar, [Index::reg(4, 4)], [Index::Fau(0)]),
        ]);
        assert_eq!(clause.message().map(|i| i.op), Some(Opcode::LdVar));

        let clause = Clause::new(vec![Instr::new(Opcode::Nop, [], [])]);
        assert!(clause.message().is_none());
    }

    #[test]
    #[should_panic(expected = "more than one message")]
    fn test_clause_two_messages() {
        let _ = Clause::new(vec![
            Instr::new(Opcode::Load, [Index::reg(0, 1)], [Index::reg(2, 2)]),
            Instr::new(Opcode::Store, [], [Index::reg(4, 1), Index::reg(2, 2)]),
        ]);
    }

    #[test]
    fn test_props_table() {
        for op in Opcode::ALL {
            let props = op.props();
            if !op.is_message() {
                assert!(!props.sr_read && !props.sr_write, "{op}");
            }
        }
        assert!(Opcode::AXchg.sr_read() && Opcode::AXchg.sr_write());
        assert_eq!(Opcode::Barrier.message(), MessageKind::Barrier);
    }

    #[test]
    fn test_display() {
        let mut clause = Clause::new(vec![Instr::new(
            Opcode::AXchg,
            [Index::Null],
            [Index::reg(4, 1), Index::reg(0, 2), Index::Imm(16)],
        )]);
        clause.dependencies = 0b1000_0001;
        clause.staging_barrier = true;
        assert_eq!(
            clause.to_string(),
            "clause id(0) wait( 0 7 ) osrb {\n    \
             _ = AXCHG.i32 r4, r0..r1, #0x10\n}"
        );
        assert!(clause.depends_on(7));
        assert!(!clause.depends_on(1));
        assert!(!clause.depends_on(8));
    }
}
