mod common;

use std::sync::Arc;

use common::{BOTH, Harness, block, func, module};
use viper::il::{BlockId, Instr, Module, Opcode, Operand, SlotId, SourceLoc, Type};
use viper::vm::{BreakReason, DebugCtrl, DispatchKind, PAUSE_STATUS, RunConfig};

fn two_blocks() -> Arc<Module> {
    module(
        vec![func(
            "main",
            vec![],
            Type::I64,
            vec![
                block(
                    "entry",
                    [
                        Instr::binary(
                            Opcode::Add,
                            Type::I64,
                            SlotId(0),
                            Operand::i64(1),
                            Operand::i64(2),
                        )
                        .at(SourceLoc::line(1)),
                        Instr::br(BlockId(1), vec![]),
                    ],
                ),
                block(
                    "next",
                    [
                        Instr::binary(
                            Opcode::Add,
                            Type::I64,
                            SlotId(1),
                            Operand::temp(0),
                            Operand::i64(10),
                        )
                        .at(SourceLoc::line(2)),
                        Instr::ret(Some(Operand::temp(1))).at(SourceLoc::line(3)),
                    ],
                ),
            ],
        )],
        vec![],
    )
}

fn harness(dispatch: DispatchKind, debug: DebugCtrl) -> Harness {
    Harness::new(
        RunConfig::default()
            .with_dispatch(dispatch)
            .with_debug(debug),
    )
}

#[test]
fn label_break_pauses_on_block_entry() {
    let m = two_blocks();
    for dispatch in BOTH {
        let h = harness(dispatch, DebugCtrl::new().break_at_label("next"));
        let mut vm = h.runner.vm(m.clone());
        assert_eq!(vm.run_main().unwrap(), PAUSE_STATUS);
        assert_eq!(vm.instr_count(), 2);
        let event = vm.paused().unwrap();
        assert_eq!(event.reason, BreakReason::Label);
        assert_eq!(event.ip, 0);
        assert_eq!(
            h.diagnostics.lines(),
            ["[BREAK] fn=@main blk=next reason=label"]
        );
    }
}

#[test]
fn entry_label_break_fires_before_any_instruction() {
    let m = two_blocks();
    for dispatch in BOTH {
        let h = harness(dispatch, DebugCtrl::new().break_at_label("entry"));
        let mut vm = h.runner.vm(m.clone());
        assert_eq!(vm.run_main().unwrap(), PAUSE_STATUS);
        assert_eq!(vm.instr_count(), 0);
        assert_eq!(
            h.diagnostics.lines(),
            ["[BREAK] fn=@main blk=entry reason=label"]
        );
    }
}

#[test]
fn step_budget_takes_precedence_over_a_label_break() {
    let m = two_blocks();
    for dispatch in BOTH {
        let debug = DebugCtrl::new().break_at_label("next").with_step_budget(2);
        let h = harness(dispatch, debug);
        let mut vm = h.runner.vm(m.clone());
        assert_eq!(vm.run_main().unwrap(), PAUSE_STATUS);
        assert_eq!(vm.paused().unwrap().reason, BreakReason::Step);
        assert_eq!(
            h.diagnostics.lines(),
            ["[BREAK] fn=@main blk=next reason=step"]
        );
    }
}

#[test]
fn line_break_reports_the_instruction_index() {
    let m = two_blocks();
    for dispatch in BOTH {
        let h = harness(dispatch, DebugCtrl::new().break_at_line(3));
        let mut vm = h.runner.vm(m.clone());
        assert_eq!(vm.run_main().unwrap(), PAUSE_STATUS);
        assert_eq!(vm.instr_count(), 3);
        assert_eq!(
            h.diagnostics.lines(),
            ["[BREAK] fn=@main blk=next reason=line line=3 ip=#1"]
        );
    }
}

#[test]
fn unmatched_breakpoints_leave_the_run_alone() {
    let m = two_blocks();
    for dispatch in BOTH {
        let debug = DebugCtrl::new()
            .break_at_label("nowhere")
            .break_at_line(40)
            .with_step_budget(100);
        let h = harness(dispatch, debug);
        let mut vm = h.runner.vm(m.clone());
        assert_eq!(vm.run_main().unwrap(), 13);
        assert!(vm.paused().is_none());
        assert!(h.diagnostics.lines().is_empty());
    }
}
