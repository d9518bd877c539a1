#![allow(dead_code)]

use std::sync::Arc;

use viper::il::{BasicBlock, ExternDecl, Function, Instr, Module, Param, Type};
use viper::rt::CapturedOutput;
use viper::vm::{BufferSink, DispatchKind, RunConfig, RuntimeContext, Trap, Value};
use viper::{Runner, Runtime};

pub const BOTH: [DispatchKind; 2] = [DispatchKind::Switch, DispatchKind::Threaded];

/// A runner whose diagnostics and console output are captured.
pub struct Harness {
    pub runner: Runner,
    pub diagnostics: Arc<BufferSink>,
    pub output: Arc<CapturedOutput>,
}

impl Harness {
    pub fn new(config: RunConfig) -> Self {
        let diagnostics = Arc::new(BufferSink::new());
        let output = Arc::new(CapturedOutput::new());
        let ctx = Arc::new(RuntimeContext::new(diagnostics.clone()));
        let runtime = Runtime::new(ctx).with_output(output.clone());
        let runner = Runner::with_runtime(config, runtime).expect("runtime registers");
        Self {
            runner,
            diagnostics,
            output,
        }
    }

    pub fn with_dispatch(dispatch: DispatchKind) -> Self {
        Self::new(RunConfig::default().with_dispatch(dispatch))
    }

    pub fn run(&self, module: &Arc<Module>, entry: &str) -> Result<Value, Trap> {
        self.runner.run(Arc::clone(module), entry, Vec::new())
    }

    /// The diagnostic line written for the most recent trap.
    pub fn last_diagnostic(&self) -> String {
        self.diagnostics.last().expect("a trap was rendered")
    }
}

pub fn block(label: &str, instrs: impl IntoIterator<Item = Instr>) -> BasicBlock {
    BasicBlock::from_instrs(label, instrs).expect("well-formed block")
}

pub fn func(name: &str, params: Vec<Param>, ret: Type, blocks: Vec<BasicBlock>) -> Function {
    let mut f = Function::new(name, params, ret);
    f.blocks = blocks;
    f
}

pub fn module(functions: Vec<Function>, externs: Vec<ExternDecl>) -> Arc<Module> {
    let mut m = Module::new("test");
    for decl in externs {
        m.add_extern(decl).expect("unique extern");
    }
    for f in functions {
        m.add_function(f).expect("unique function");
    }
    Arc::new(m)
}

/// Runs `entry` under both dispatch strategies and asserts they agree.
pub fn run_both(module: &Arc<Module>, entry: &str) -> Result<Value, Trap> {
    let [switch, threaded] = BOTH.map(|d| Harness::with_dispatch(d).run(module, entry));
    assert_eq!(switch, threaded, "dispatch strategies disagree on `{entry}`");
    switch
}
