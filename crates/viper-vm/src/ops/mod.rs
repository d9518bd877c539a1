//! Opcode handlers shared by both dispatch strategies.

use viper_il::{Instr, Opcode};

use crate::trap::Trap;
use crate::value::Value;
use crate::vm::Vm;

mod control;
mod convert;
mod float;
mod int;
mod memory;

/// What the dispatch loop does after a handler returns.
#[derive(Debug, PartialEq)]
pub(crate) enum Flow {
    /// Continue at the top frame's current `ip` (possibly a new block or a new frame).
    Next,
    /// Pop the top frame with this value.
    Return(Value),
}

pub(crate) type Handler = fn(&mut Vm, &Instr) -> Result<Flow, Trap>;

/// Decodes an opcode tag into its handler.
pub(crate) fn handler_for(op: Opcode) -> Handler {
    match op {
        Opcode::Add => int::add,
        Opcode::Sub => int::sub,
        Opcode::Mul => int::mul,
        Opcode::IAddOvf => int::add_ovf,
        Opcode::ISubOvf => int::sub_ovf,
        Opcode::IMulOvf => int::mul_ovf,
        Opcode::INegOvf => int::neg_ovf,
        Opcode::SDiv => int::sdiv,
        Opcode::SRem => int::srem,
        Opcode::UDiv => int::udiv,
        Opcode::URem => int::urem,
        Opcode::And => int::and,
        Opcode::Or => int::or,
        Opcode::Xor => int::xor,
        Opcode::Shl => int::shl,
        Opcode::LShr => int::lshr,
        Opcode::AShr => int::ashr,
        Opcode::ICmpEq => int::cmp_eq,
        Opcode::ICmpNe => int::cmp_ne,
        Opcode::SCmpLT => int::cmp_lt,
        Opcode::SCmpLE => int::cmp_le,
        Opcode::SCmpGT => int::cmp_gt,
        Opcode::SCmpGE => int::cmp_ge,
        Opcode::FAdd => float::add,
        Opcode::FSub => float::sub,
        Opcode::FMul => float::mul,
        Opcode::FDiv => float::div,
        Opcode::FCmpEQ => float::cmp_eq,
        Opcode::FCmpNE => float::cmp_ne,
        Opcode::FCmpLT => float::cmp_lt,
        Opcode::FCmpLE => float::cmp_le,
        Opcode::FCmpGT => float::cmp_gt,
        Opcode::FCmpGE => float::cmp_ge,
        Opcode::Sitofp => convert::sitofp,
        Opcode::Fptosi => convert::fptosi,
        Opcode::CastFpToSiRteChk => convert::fp_to_si_rte,
        Opcode::CastSiNarrowChk => convert::si_narrow,
        Opcode::Zext1 => convert::zext1,
        Opcode::Trunc1 => convert::trunc1,
        Opcode::Alloca => memory::alloca,
        Opcode::Gep => memory::gep,
        Opcode::Load => memory::load,
        Opcode::Store => memory::store,
        Opcode::Call => control::call,
        Opcode::Br => control::br,
        Opcode::CBr => control::cbr,
        Opcode::Ret => control::ret,
        Opcode::Trap => control::trap,
    }
}
