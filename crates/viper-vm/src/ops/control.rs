use std::sync::Arc;

use viper_il::{Instr, Type};

use super::Flow;
use crate::trap::{Trap, TrapKind};
use crate::value::Value;
use crate::vm::Vm;

/// Calls a module function (pushing a frame) or an extern (through the bridge).
pub(super) fn call(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let Some(callee) = instr.callee.as_deref() else {
        return Err(vm.fault(TrapKind::InvalidOperation, "`call` without a callee"));
    };
    let args = vm.args(&instr.operands)?;
    let module = Arc::clone(&vm.module);

    if let Some(id) = module.function_id(callee) {
        vm.enter_function(id, args, instr.result)?;
        return Ok(Flow::Next);
    }

    if let Some(id) = module.extern_id(callee) {
        let decl = &module.externs[id.0 as usize];
        let value = vm
            .bridge
            .call(&vm.ctx, id.0 as usize, decl, args, vm.site())?;
        if decl.ret == Type::Void {
            return Ok(Flow::Next);
        }
        return vm.set_result(instr, value);
    }

    Err(vm.fault(
        TrapKind::DomainError,
        format!("unknown call target `{callee}`"),
    ))
}

pub(super) fn br(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let Some(&target) = instr.labels.first() else {
        return Err(vm.fault(TrapKind::InvalidOperation, "`br` without a target"));
    };
    let args = match instr.br_args.first() {
        Some(ops) => vm.args(ops)?,
        None => Vec::new(),
    };
    vm.jump(target, args)
}

pub(super) fn cbr(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let cond = vm.arg(instr, 0)?;
    let Some(taken) = cond.as_bool() else {
        return Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`cbr` condition must be i1, got {}", cond.ty()),
        ));
    };
    let edge = if taken { 0 } else { 1 };
    let Some(&target) = instr.labels.get(edge) else {
        return Err(vm.fault(TrapKind::InvalidOperation, "`cbr` needs two targets"));
    };
    let args = match instr.br_args.get(edge) {
        Some(ops) => vm.args(ops)?,
        None => Vec::new(),
    };
    vm.jump(target, args)
}

pub(super) fn ret(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let value = match instr.operands.first() {
        Some(op) => vm.operand(op)?,
        None => Value::Void,
    };
    let expected = vm.module.functions[vm.frame().func.0 as usize].ret;
    if value.ty() != expected {
        return Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`ret` of {} from a function returning {expected}", value.ty()),
        ));
    }
    Ok(Flow::Return(value))
}

/// Explicit trap. An optional `str` operand becomes the message.
pub(super) fn trap(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let message = match instr.operands.first() {
        Some(op) => match vm.operand(op)? {
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        },
        None => String::new(),
    };
    Err(vm.fault(TrapKind::DomainError, message))
}
