mod common;

use std::sync::Arc;

use common::{BOTH, Harness, block, func, module};
use viper::il::{ExternDecl, Instr, Operand, SourceLoc, Type};
use viper::vm::{BufferSink, RunConfig, TrapSite};
use viper::{RuntimeContext, TrapKind};

#[test]
fn bare_trap_renders_exact_line() {
    let m = module(
        vec![func(
            "main",
            vec![],
            Type::I64,
            vec![block("entry", [Instr::trap().at(SourceLoc::line(1))])],
        )],
        vec![],
    );
    for dispatch in BOTH {
        let h = Harness::with_dispatch(dispatch);
        let trap = h.runner.run_main(m.clone()).unwrap_err();
        assert_eq!(trap.kind, TrapKind::DomainError);
        assert_eq!(
            h.diagnostics.lines(),
            ["Trap @main:entry#0 line 1: DomainError (code=0)"]
        );
    }
}

#[test]
fn native_trap_is_attributed_to_its_call_site() {
    let explicit = module(
        vec![func(
            "main",
            vec![],
            Type::Void,
            vec![block(
                "entry",
                [
                    Instr::call(None, Type::Void, "rt_trap", vec![Operand::str("boom")])
                        .at(SourceLoc::line(4)),
                    Instr::ret(None),
                ],
            )],
        )],
        vec![ExternDecl::new("rt_trap", vec![Type::Str], Type::Void)],
    );
    let h = Harness::new(RunConfig::default());
    h.run(&explicit, "main").unwrap_err();
    assert_eq!(
        h.last_diagnostic(),
        "Trap @main:entry#0 line 4: DomainError (code=0): boom"
    );
}

#[test]
fn unattributed_trap_never_reuses_an_earlier_site() {
    let sink = Arc::new(BufferSink::new());
    let ctx = RuntimeContext::new(sink.clone());

    ctx.trap_at(
        TrapKind::Overflow,
        "first",
        TrapSite::new("first_fn", "first_block", 3, SourceLoc::line(12)),
    );
    let second = ctx.trap(TrapKind::IoError, "second");

    assert_eq!(second.site, TrapSite::UNKNOWN);
    let lines = sink.lines();
    assert_eq!(
        lines[0],
        "Trap @first_fn:first_block#3 line 12: Overflow (code=0): first"
    );
    assert_eq!(
        lines[1],
        "Trap @<unknown>:<unknown>#? line -1: IOError (code=0): second"
    );
    assert!(!lines[1].contains("first_fn"));
    assert!(!lines[1].contains("first_block"));
}

#[test]
fn native_trap_after_a_vm_trap_is_not_attributed_to_it() {
    let m = module(
        vec![func(
            "main",
            vec![],
            Type::Void,
            vec![block("entry", [Instr::trap().at(SourceLoc::line(2))])],
        )],
        vec![],
    );
    let h = Harness::new(RunConfig::default());
    h.run(&m, "main").unwrap_err();

    let later = h.runner.context().trap_with_code(TrapKind::DiskFull, 28, "");
    assert_eq!(later.site, TrapSite::UNKNOWN);
    assert_eq!(
        h.last_diagnostic(),
        "Trap @<unknown>:<unknown>#? line -1: DiskFull (code=28)"
    );
}

#[test]
fn exit_status_is_nonzero_and_kind_specific() {
    let ctx = RuntimeContext::new(Arc::new(BufferSink::new()));
    let statuses: Vec<i32> = [
        TrapKind::DivideByZero,
        TrapKind::Overflow,
        TrapKind::DomainError,
        TrapKind::ResourceExhausted,
    ]
    .into_iter()
    .map(|kind| ctx.trap(kind, "").exit_status())
    .collect();
    assert!(statuses.iter().all(|s| *s > 0));
    assert_eq!(statuses[0], 1);
    assert_eq!(statuses[2], TrapKind::DomainError.exit_status());
    let mut unique = statuses.clone();
    unique.dedup();
    assert_eq!(unique.len(), statuses.len());
}

#[test]
fn unknown_entry_is_reported() {
    let m = module(vec![], vec![]);
    let h = Harness::new(RunConfig::default());
    let trap = h.run(&m, "nope").unwrap_err();
    assert_eq!(trap.kind, TrapKind::DomainError);
    assert_eq!(trap.site.function.as_deref(), Some("nope"));
}
