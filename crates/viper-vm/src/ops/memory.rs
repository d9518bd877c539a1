use viper_il::Instr;

use super::Flow;
use crate::frame::StackError;
use crate::trap::{Trap, TrapKind};
use crate::value::{Ptr, Value};
use crate::vm::Vm;

fn ptr_arg(vm: &Vm, instr: &Instr, index: usize) -> Result<Ptr, Trap> {
    match vm.arg(instr, index)? {
        Value::Ptr(p) if p.is_null() => Err(vm.fault(
            TrapKind::NullPointer,
            format!("null pointer in `{}`", instr.op),
        )),
        Value::Ptr(p) => Ok(p),
        other => Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`{}` expects a ptr operand, got {}", instr.op, other.ty()),
        )),
    }
}

fn stack_fault(vm: &Vm, err: StackError) -> Trap {
    vm.fault(err.kind(), err.message())
}

fn dangling(vm: &Vm, p: Ptr) -> Trap {
    vm.fault(
        TrapKind::InvalidOperation,
        format!("dangling stack pointer (frame {} has returned)", p.frame),
    )
}

/// Bump-allocates from the current frame's scratch region.
pub(super) fn alloca(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let size = vm.arg(instr, 0)?;
    let Some(bytes) = size.as_i64() else {
        return Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`alloca` size must be an integer, got {}", size.ty()),
        ));
    };
    let frame = vm.frame_mut();
    let id = frame.id;
    match frame.stack.alloca(bytes) {
        Ok(offset) => vm.set_result(instr, Value::Ptr(Ptr { frame: id, offset })),
        Err(err) => Err(stack_fault(vm, err)),
    }
}

pub(super) fn gep(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let base = ptr_arg(vm, instr, 0)?;
    let delta = vm.arg(instr, 1)?;
    let Some(delta) = delta.as_i64() else {
        return Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`gep` offset must be an integer, got {}", delta.ty()),
        ));
    };
    let offset = i64::try_from(base.offset)
        .ok()
        .and_then(|o| o.checked_add(delta))
        .and_then(|o| usize::try_from(o).ok());
    match offset {
        Some(offset) => vm.set_result(
            instr,
            Value::Ptr(Ptr {
                frame: base.frame,
                offset,
            }),
        ),
        None => Err(vm.fault(
            TrapKind::Bounds,
            format!("pointer offset {delta} leaves the stack region"),
        )),
    }
}

pub(super) fn load(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let p = ptr_arg(vm, instr, 0)?;
    let ty = instr.ty;
    let loaded = match vm.frame_by_id(p.frame) {
        Some(frame) => frame.stack.load(p.offset, ty),
        None => return Err(dangling(vm, p)),
    };
    match loaded {
        Ok(value) => vm.set_result(instr, value),
        Err(err) => Err(stack_fault(vm, err)),
    }
}

pub(super) fn store(vm: &mut Vm, instr: &Instr) -> Result<Flow, Trap> {
    let p = ptr_arg(vm, instr, 0)?;
    let value = vm.arg(instr, 1)?;
    if value.ty() != instr.ty {
        return Err(vm.fault(
            TrapKind::InvalidOperation,
            format!("`store {}` given a {} value", instr.ty, value.ty()),
        ));
    }
    let stored = match vm.frame_by_id(p.frame) {
        Some(frame) => frame.stack.store(p.offset, &value),
        None => return Err(dangling(vm, p)),
    };
    stored.map_err(|err| stack_fault(vm, err))?;
    Ok(Flow::Next)
}
