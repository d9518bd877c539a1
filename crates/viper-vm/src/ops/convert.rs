use viper_il::Instr;

use super::Flow;
use crate::trap::{Trap, TrapKind};
use crate::value::Value;
use crate::vm::Vm;

/// 2^63, the first double past `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn int_arg(vm: &Vm, instr: &Instr) -> Result<i64, Trap> {
    let value = vm.arg(instr, 0)?;
    value.as_i64().ok_or_else(|| {
        vm.fault(
            TrapKind::InvalidOperation,
            format!("`{}` expects an integer operand, got {}", instr.op, value.ty()),
        )
    })
}

fn float_arg(vm: &Vm, instr: &Instr) -> Result<f64, Trap> {
    let value = vm.arg(instr, 0)?;
    value.as_f64().ok_or_else(|| {
        vm.fault(
            TrapKind::InvalidOperation,
            format!("`{}` expects an f64 operand, got {}", instr.op, value.ty()),
        )
    })
}

/// Converts an already-rounded double to the instruction's integer type.
fn store_integral(vm: &mut Vm, instr: &Instr, source: f64, rounded: f64) -> Result<Flow, Trap> {
    if !instr.ty.is_integer() {
        return Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`{}` must produce an integer type, not {}", instr.op, instr.ty),
        ));
    }
    if !source.is_finite() {
        return Err(vm.fault(
            TrapKind::InvalidCast,
            format!("cannot convert {source} to {}", instr.ty),
        ));
    }
    let value = (-I64_LIMIT..I64_LIMIT)
        .contains(&rounded)
        .then(|| Value::int_checked(instr.ty, rounded as i64))
        .flatten();
    match value {
        Some(value) => vm.set_result(instr, value),
        None => Err(vm.fault(
            TrapKind::Overflow,
            format!("{source} is out of range for {}", instr.ty),
        )),
    }
}

pub(super) fn sitofp(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let v = int_arg(vm, instr)?;
    vm.set_result(instr, Value::F64(v as f64))
}

/// Truncating float-to-int conversion, checked.
pub(super) fn fptosi(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let f = float_arg(vm, instr)?;
    store_integral(vm, instr, f, f.trunc())
}

/// Round-half-to-even float-to-int conversion, checked.
pub(super) fn fp_to_si_rte(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let f = float_arg(vm, instr)?;
    store_integral(vm, instr, f, f.round_ties_even())
}

pub(super) fn si_narrow(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let v = int_arg(vm, instr)?;
    match Value::int_checked(instr.ty, v) {
        Some(value) => vm.set_result(instr, value),
        None => Err(vm.fault(
            TrapKind::Overflow,
            format!("{v} is out of range for {}", instr.ty),
        )),
    }
}

pub(super) fn zext1(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let value = vm.arg(instr, 0)?;
    let widened = value
        .as_bool()
        .and_then(|b| Value::int_checked(instr.ty, i64::from(b)));
    match widened {
        Some(v) => vm.set_result(instr, v),
        None => Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`zext1` cannot extend {} to {}", value.ty(), instr.ty),
        )),
    }
}

pub(super) fn trunc1(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let v = int_arg(vm, instr)?;
    vm.set_result(instr, Value::I1(v & 1 == 1))
}
