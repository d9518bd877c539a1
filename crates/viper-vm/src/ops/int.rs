use viper_il::{Instr, Type};

use super::Flow;
use crate::trap::{Trap, TrapKind};
use crate::value::Value;
use crate::vm::Vm;

/// Evaluates both operands as integers of the instruction's type.
fn operands(vm: &Vm, instr: &Instr) -> Result<(i64, i64), Trap> {
    let lhs = vm.arg(instr, 0)?;
    let rhs = vm.arg(instr, 1)?;
    match (lhs.as_i64(), rhs.as_i64()) {
        (Some(a), Some(b)) if lhs.ty() == instr.ty && rhs.ty() == instr.ty => Ok((a, b)),
        _ => Err(mismatch(vm, instr, &lhs, &rhs)),
    }
}

fn mismatch(vm: &Vm, instr: &Instr, lhs: &Value, rhs: &Value) -> Trap {
    vm.fault(
        TrapKind::InvalidOperation,
        format!(
            "`{} {}` applied to {} and {}",
            instr.op,
            instr.ty,
            lhs.ty(),
            rhs.ty()
        ),
    )
}

fn wrapped(vm: &mut Vm, instr: &Instr, v: i64) -> Result<Flow, Trap> {
    match Value::int_wrapping(instr.ty, v) {
        Some(value) => vm.set_result(instr, value),
        None => Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`{}` requires an integer type, got {}", instr.op, instr.ty),
        )),
    }
}

/// Stores `v` if representable in the instruction's width, else traps `Overflow`.
fn checked(vm: &mut Vm, instr: &Instr, v: Option<i64>) -> Result<Flow, Trap> {
    match v.and_then(|v| Value::int_checked(instr.ty, v)) {
        Some(value) => vm.set_result(instr, value),
        None => Err(vm.fault(
            TrapKind::Overflow,
            format!("integer overflow in {} ({})", instr.op, instr.ty),
        )),
    }
}

fn bits(ty: Type) -> u32 {
    (ty.size_of() * 8) as u32
}

/// Reinterprets the low `ty` bits of `v` as unsigned.
fn unsigned(ty: Type, v: i64) -> u64 {
    match ty {
        Type::I16 => u64::from(v as u16),
        Type::I32 => u64::from(v as u32),
        _ => v as u64,
    }
}

pub(super) fn add(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    wrapped(vm, instr, a.wrapping_add(b))
}

pub(super) fn sub(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    wrapped(vm, instr, a.wrapping_sub(b))
}

pub(super) fn mul(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    wrapped(vm, instr, a.wrapping_mul(b))
}

pub(super) fn add_ovf(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    checked(vm, instr, a.checked_add(b))
}

pub(super) fn sub_ovf(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    checked(vm, instr, a.checked_sub(b))
}

pub(super) fn mul_ovf(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    checked(vm, instr, a.checked_mul(b))
}

pub(super) fn neg_ovf(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let value = vm.arg(instr, 0)?;
    match value.as_i64() {
        Some(a) if value.ty() == instr.ty => checked(vm, instr, a.checked_neg()),
        _ => Err(mismatch(vm, instr, &value, &value)),
    }
}

fn divisor(vm: &Vm, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        Err(vm.fault(TrapKind::DivideByZero, "division by zero"))
    } else {
        Ok(b)
    }
}

pub(super) fn sdiv(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    let b = divisor(vm, b)?;
    // MIN / -1 is the only overflowing case.
    checked(vm, instr, a.checked_div(b))
}

pub(super) fn srem(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    let b = divisor(vm, b)?;
    wrapped(vm, instr, a.wrapping_rem(b))
}

pub(super) fn udiv(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    let b = unsigned(instr.ty, divisor(vm, b)?);
    wrapped(vm, instr, (unsigned(instr.ty, a) / b) as i64)
}

pub(super) fn urem(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    let b = unsigned(instr.ty, divisor(vm, b)?);
    wrapped(vm, instr, (unsigned(instr.ty, a) % b) as i64)
}

/// Bitwise ops also accept `i1` operands.
fn bitwise(
    vm: &mut Vm,
    instr: &Instr,
    int_op: fn(i64, i64) -> i64,
    bool_op: fn(bool, bool) -> bool,
) -> Result<Flow, Trap> {
    if instr.ty == Type::I1 {
        let lhs = vm.arg(instr, 0)?;
        let rhs = vm.arg(instr, 1)?;
        return match (lhs.as_bool(), rhs.as_bool()) {
            (Some(a), Some(b)) => vm.set_result(instr, Value::I1(bool_op(a, b))),
            _ => Err(mismatch(vm, instr, &lhs, &rhs)),
        };
    }
    let (a, b) = operands(vm, instr)?;
    wrapped(vm, instr, int_op(a, b))
}

pub(super) fn and(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    bitwise(vm, instr, |a, b| a & b, |a, b| a & b)
}

pub(super) fn or(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    bitwise(vm, instr, |a, b| a | b, |a, b| a | b)
}

pub(super) fn xor(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    bitwise(vm, instr, |a, b| a ^ b, |a, b| a ^ b)
}

/// Shift amounts are taken modulo the operand width.
fn shift_amount(instr: &Instr, b: i64) -> u32 {
    (b as u32) & (bits(instr.ty) - 1)
}

pub(super) fn shl(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    wrapped(vm, instr, a.wrapping_shl(shift_amount(instr, b)))
}

pub(super) fn lshr(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    let shifted = unsigned(instr.ty, a) >> shift_amount(instr, b);
    wrapped(vm, instr, shifted as i64)
}

pub(super) fn ashr(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let (a, b) = operands(vm, instr)?;
    wrapped(vm, instr, a >> shift_amount(instr, b))
}

/// Compares two integers (or two `i1`s) of the same type, producing an `i1`.
fn compare(vm: &mut Vm, instr: &Instr, pred: fn(i64, i64) -> bool) -> Result<Flow, Trap> {
    let lhs = vm.arg(instr, 0)?;
    let rhs = vm.arg(instr, 1)?;
    let widen = |v: &Value| v.as_i64().or_else(|| v.as_bool().map(i64::from));
    match (widen(&lhs), widen(&rhs)) {
        (Some(a), Some(b)) if lhs.ty() == rhs.ty() => vm.set_result(instr, Value::I1(pred(a, b))),
        _ => Err(mismatch(vm, instr, &lhs, &rhs)),
    }
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
