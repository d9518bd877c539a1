use viper_il::Instr;

use super::Flow;
use crate::trap::{Trap, TrapKind};
use crate::value::Value;
use crate::vm::Vm;

fn operands(vm: &Vm, instr: &Instr) -> Result<(f64, f64), Trap> {
    let lhs = vm.arg(instr, 0)?;
    let rhs = vm.arg(instr, 1)?;
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`{}` applied to {} and {}", instr.op, lhs.ty(), rhs.ty()),
        )),
    }
}

fn arith(vm: &mut Vm, instr: &Instr, op: fn(f64, f64) -> f64) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    vm.set_result(instr, Value::F64(op(a, b)))
}

fn compare(vm: &mut Vm, instr: &Instr, pred: fn(f64, f64) -> bool) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    vm.set_result(instr, Value::I1(pred(a, b)))
}

pub(super) fn add(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    arith(vm, instr, |a, b| a + b)
}

pub(super) fn sub(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    arith(vm, instr, |a, b| a - b)
}

pub(super) fn mul(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    arith(vm, instr, |a, b| a * b)
}

/// IEEE division; a zero divisor yields an infinity or NaN rather than a trap.
pub(super) fn div(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    arith(vm, instr, |a, b| a / b)
}

pub(super) fn cmp_eq(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    compare(vm, instr, |a, b| a == b)
}

pub(super) fn cmp_ne(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    compare(vm, instr, |a, b| a != b)
}

pub(super) fn cmp_lt(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    compare(vm, instr, |a, b| a < b)
}

pub(super) fn cmp_le(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    compare(vm, instr, |a, b| a <= b)
}

pub(super) fn cmp_gt(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    compare(vm, instr, |a, b| a > b)
}

pub(super) fn cmp_ge(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    compare(vm, instr, |a, b| a >= b)
}
