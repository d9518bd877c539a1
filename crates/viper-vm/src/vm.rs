use std::sync::Arc;

use tracing::{debug, trace};
use viper_il::{BasicBlock, BlockId, Function, FunctionId, Instr, Module, Operand, Param, SlotId};

use crate::bridge::{NativeRegistry, RuntimeBridge};
use crate::config::{DispatchKind, RunConfig};
use crate::debug::{BreakEvent, BreakReason, PAUSE_STATUS};
use crate::dispatch::ThreadedCache;
use crate::frame::Frame;
use crate::ops::{self, Flow};
use crate::trap::{RuntimeContext, Trap, TrapKind, TrapSite};
use crate::value::Value;

/// Executes IL functions from a shared, read-only [`Module`].
///
/// A `Vm` owns its frame stack exclusively; several VMs may execute the same module concurrently
/// on different threads.
pub struct Vm {
    pub(crate) module: Arc<Module>,
    pub(crate) ctx: Arc<RuntimeContext>,
    pub(crate) bridge: RuntimeBridge,
    config: RunConfig,
    dispatch: DispatchKind,
    pub(crate) frames: Vec<Frame>,
    slot_counts: Vec<usize>,
    next_frame_id: u64,
    steps: u64,
    paused: Option<BreakEvent>,
    threaded: ThreadedCache,
}

impl Vm {
    /// Creates a VM for `module`, resolving its externs against `natives`.
    pub fn new(
        module: Arc<Module>,
        natives: &NativeRegistry,
        config: RunConfig,
        ctx: Arc<RuntimeContext>,
    ) -> Self {
        let dispatch = config.dispatch.effective();
        if dispatch != config.dispatch {
            debug!(requested = %config.dispatch, "threaded dispatch unavailable; using switch");
        }
        let bridge = RuntimeBridge::resolve(&module, natives);
        let slot_counts = module.functions.iter().map(|f| f.slot_count()).collect();
        let threaded = ThreadedCache::new(&module);
        debug!(
            module = %module.name,
            functions = module.functions.len(),
            externs = module.externs.len(),
            %dispatch,
            stack_bytes = config.frame_stack_bytes(),
            "vm created"
        );
        Self {
            module,
            ctx,
            bridge,
            config,
            dispatch,
            frames: Vec::new(),
            slot_counts,
            next_frame_id: 1,
            steps: 0,
            paused: None,
            threaded,
        }
    }

    /// The strategy in use after capability fallback.
    pub fn dispatch_kind(&self) -> DispatchKind {
        self.dispatch
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Instructions executed by the most recent run.
    pub fn instr_count(&self) -> u64 {
        self.steps
    }

    /// Where the most recent run stopped, if it hit a breakpoint.
    pub fn paused(&self) -> Option<&BreakEvent> {
        self.paused.as_ref()
    }

    /// Runs `entry` to completion and returns its result.
    ///
    /// A run stopped by a breakpoint returns [`PAUSE_STATUS`] as an `i64`; [`Vm::paused`] says
    /// where.
    pub fn run(&mut self, entry: &str, args: Vec<Value>) -> Result<Value, Trap> {
        self.frames.clear();
        self.steps = 0;
        self.paused = None;

        let module = Arc::clone(&self.module);
        let Some(func_id) = module.function_id(entry) else {
            return Err(self.ctx.trap_at(
                TrapKind::DomainError,
                format!("unknown entry function `{entry}`"),
                TrapSite {
                    function: Some(entry.to_string()),
                    ..TrapSite::UNKNOWN
                },
            ));
        };

        debug!(entry, dispatch = %self.dispatch, "run start");
        let result = self
            .enter_function(func_id, args, None)
            .and_then(|()| self.run_loop(&module));
        self.frames.clear();
        match &result {
            Ok(value) => debug!(entry, steps = self.steps, %value, "run finished"),
            Err(trap) => debug!(entry, steps = self.steps, kind = %trap.kind, "run trapped"),
        }
        result
    }

    /// Runs `main` and returns its integer exit code. A `void` main yields 0.
    pub fn run_main(&mut self) -> Result<i64, Trap> {
        match self.run("main", Vec::new())? {
            Value::Void => Ok(0),
            Value::I1(b) => Ok(i64::from(b)),
            other => other.as_i64().ok_or_else(|| {
                self.ctx.trap_at(
                    TrapKind::DomainError,
                    format!("main returned {}, expected an integer", other.ty()),
                    TrapSite {
                        function: Some("main".to_string()),
                        ..TrapSite::UNKNOWN
                    },
                )
            }),
        }
    }

    fn run_loop(&mut self, module: &Module) -> Result<Value, Trap> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Err(self.ctx.trap(TrapKind::InvalidOperation, "empty call stack"));
            };
            let (func_id, block_id, ip) = (frame.func, frame.block, frame.ip);
            let function = &module.functions[func_id.0 as usize];
            let Some((block, instr)) = function
                .blocks
                .get(block_id.0)
                .and_then(|b| Some((b, b.instructions.get(ip)?)))
            else {
                return Err(self.fault(
                    TrapKind::InvalidOperation,
                    format!("control fell off the end of a block in `{}`", function.name),
                ));
            };

            // Advance first so calls resume after the call instruction.
            frame.ip += 1;
            if let Some(max) = self.config.max_steps
                && self.steps >= max
            {
                return Err(self.fault(TrapKind::RuntimeError, "step limit exceeded"));
            }
            if !self.config.debug.is_empty()
                && let Some(reason) = self.break_reason(block, ip, instr)
            {
                return Ok(self.pause(function, block, ip, reason));
            }
            self.steps += 1;
            trace!(func = %function.name, block = block_id.0, ip, op = %instr.op, "dispatch");

            let flow = match self.dispatch {
                DispatchKind::Switch => ops::handler_for(instr.op)(self, instr)?,
                DispatchKind::Threaded => {
                    let handler = self.threaded.handler(module, func_id, block_id, ip);
                    handler(self, instr)?
                }
            };

            if let Flow::Return(value) = flow
                && let Some(result) = self.leave_function(value)
            {
                return Ok(result);
            }
        }
    }

    /// Checks the step budget, then a label break on block entry, then a line break.
    fn break_reason(&self, block: &BasicBlock, ip: usize, instr: &Instr) -> Option<BreakReason> {
        let debug = &self.config.debug;
        if debug.step_budget().is_some_and(|budget| self.steps >= budget) {
            Some(BreakReason::Step)
        } else if ip == 0 && debug.breaks_at_label(&block.label) {
            Some(BreakReason::Label)
        } else if debug.breaks_at_line(instr.loc) {
            Some(BreakReason::Line(instr.loc.line))
        } else {
            None
        }
    }

    fn pause(
        &mut self,
        function: &Function,
        block: &BasicBlock,
        ip: usize,
        reason: BreakReason,
    ) -> Value {
        let event = BreakEvent {
            function: function.name.clone(),
            block: block.label.clone(),
            ip,
            reason,
        };
        debug!(%event, steps = self.steps, "run paused");
        self.ctx.notify(&event.to_string());
        self.paused = Some(event);
        Value::I64(PAUSE_STATUS)
    }

    /// Attribution for the instruction currently executing in the top frame.
    pub(crate) fn site(&self) -> TrapSite {
        let Some(frame) = self.frames.last() else {
            return TrapSite::UNKNOWN;
        };
        let Some(function) = self.module.function(frame.func) else {
            return TrapSite::UNKNOWN;
        };
        let ip = frame.ip.saturating_sub(1);
        let Some(block) = function.block(frame.block) else {
            return TrapSite {
                function: Some(function.name.clone()),
                ..TrapSite::UNKNOWN
            };
        };
        let loc = block
            .instructions
            .get(ip)
            .map(|i| i.loc)
            .unwrap_or_default();
        TrapSite::new(function.name.as_str(), block.label.as_str(), ip, loc)
    }

    /// Raises a trap attributed to the current instruction.
    pub(crate) fn fault(&self, kind: TrapKind, message: impl Into<String>) -> Trap {
        self.ctx.trap_at(kind, message, self.site())
    }

    pub(crate) fn frame(&self) -> &Frame {
        // Handlers only run while a frame is active.
        &self.frames[self.frames.len() - 1]
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    pub(crate) fn operand(&self, op: &Operand) -> Result<Value, Trap> {
        match op {
            Operand::Const(c) => Ok(Value::from_const(c)),
            Operand::Temp(slot) => self.frame().read_slot(*slot).cloned().ok_or_else(|| {
                self.fault(
                    TrapKind::InvalidOperation,
                    format!("use of undefined temporary %t{}", slot.0),
                )
            }),
        }
    }

    /// Evaluates operand `index` of `instr`.
    pub(crate) fn arg(&self, instr: &Instr, index: usize) -> Result<Value, Trap> {
        let op = instr.operands.get(index).ok_or_else(|| {
            self.fault(
                TrapKind::InvalidOperation,
                format!("`{}` is missing operand {index}", instr.op),
            )
        })?;
        self.operand(op)
    }

    pub(crate) fn args(&self, operands: &[Operand]) -> Result<Vec<Value>, Trap> {
        operands.iter().map(|op| self.operand(op)).collect()
    }

    pub(crate) fn write(&mut self, slot: SlotId, value: Value) -> Result<(), Trap> {
        if self.frame_mut().write_slot(slot, value) {
            Ok(())
        } else {
            Err(self.fault(
                TrapKind::InvalidOperation,
                format!("temporary %t{} out of range", slot.0),
            ))
        }
    }

    /// Stores `value` into the instruction's result slot, if it has one.
    pub(crate) fn set_result(&mut self, instr: &Instr, value: Value) -> Result<Flow, Trap> {
        if let Some(dst) = instr.result {
            self.write(dst, value)?;
        }
        Ok(Flow::Next)
    }

    pub(crate) fn frame_by_id(&mut self, id: u64) -> Option<&mut Frame> {
        self.frames.iter_mut().rev().find(|f| f.id == id)
    }

    /// Pushes a frame for `func_id` with its parameters bound to `args`.
    pub(crate) fn enter_function(
        &mut self,
        func_id: FunctionId,
        args: Vec<Value>,
        return_dst: Option<SlotId>,
    ) -> Result<(), Trap> {
        let module = Arc::clone(&self.module);
        let function = &module.functions[func_id.0 as usize];
        if self.frames.len() >= self.config.max_call_depth {
            return Err(self.fault(TrapKind::RuntimeError, "call depth limit exceeded"));
        }
        if function.blocks.is_empty() {
            return Err(self.fault(
                TrapKind::InvalidOperation,
                format!("function `{}` has no blocks", function.name),
            ));
        }
        self.check_bindings(&function.name, &function.params, &args)?;

        let id = self.next_frame_id;
        self.next_frame_id += 1;
        let mut frame = Frame::new(
            id,
            func_id,
            self.slot_counts[func_id.0 as usize],
            self.config.frame_stack_bytes(),
            return_dst,
        );
        for (param, arg) in function.params.iter().zip(args) {
            frame.write_slot(param.slot, arg);
        }
        trace!(func = %function.name, frame = id, depth = self.frames.len() + 1, "enter");
        self.frames.push(frame);
        Ok(())
    }

    /// Pops the top frame, delivering `value` to the caller. Returns the final value when the
    /// outermost frame returns.
    fn leave_function(&mut self, value: Value) -> Option<Value> {
        let frame = self.frames.pop()?;
        trace!(frame = frame.id, "leave");
        let Some(caller) = self.frames.last_mut() else {
            return Some(value);
        };
        if let Some(dst) = frame.return_dst
            && value != Value::Void
        {
            caller.write_slot(dst, value);
        }
        None
    }

    /// Moves control to `target`, binding its parameters to `args`.
    pub(crate) fn jump(&mut self, target: BlockId, args: Vec<Value>) -> Result<Flow, Trap> {
        let module = Arc::clone(&self.module);
        let function = &module.functions[self.frame().func.0 as usize];
        let Some(block) = function.block(target) else {
            return Err(self.fault(
                TrapKind::InvalidOperation,
                format!("branch to missing block {} in `{}`", target.0, function.name),
            ));
        };
        self.check_bindings(&block.label, &block.params, &args)?;
        let frame = self.frame_mut();
        for (param, arg) in block.params.iter().zip(args) {
            frame.write_slot(param.slot, arg);
        }
        frame.jump(target);
        Ok(Flow::Next)
    }

    fn check_bindings(&self, what: &str, params: &[Param], args: &[Value]) -> Result<(), Trap> {
        if params.len() != args.len() {
            return Err(self.fault(
                TrapKind::DomainError,
                format!(
                    "`{what}` expects {} arguments, got {}",
                    params.len(),
                    args.len()
                ),
            ));
        }
        for (i, (param, arg)) in params.iter().zip(args).enumerate() {
            if param.ty != arg.ty() {
                return Err(self.fault(
                    TrapKind::DomainError,
                    format!(
                        "`{what}` argument {i}: expected {}, got {}",
                        param.ty,
                        arg.ty()
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("module", &self.module.name)
            .field("dispatch", &self.dispatch)
            .field("depth", &self.frames.len())
            .field("steps", &self.steps)
            .field("paused", &self.paused)
            .field("block_tables", &self.threaded.tables_built())
            .finish_non_exhaustive()
    }
}
