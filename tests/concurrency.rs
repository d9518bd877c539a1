mod common;

use std::sync::Arc;
use std::thread;

use common::{Harness, block, func, module};
use viper::il::{ExternDecl, Instr, Opcode, Operand, Param, SlotId, Type};
use viper::vm::{DispatchKind, RunConfig, Value};

/// `work(n)` squares `|n|`, taking the absolute value through a host call.
fn shared_module() -> Arc<viper::Module> {
    module(
        vec![func(
            "work",
            vec![Param::new(0, Type::I64)],
            Type::I64,
            vec![block(
                "entry",
                [
                    Instr::call(Some(SlotId(1)), Type::I64, "rt_abs_i64", vec![Operand::temp(0)]),
                    Instr::binary(
                        Opcode::IMulOvf,
                        Type::I64,
                        SlotId(2),
                        Operand::temp(1),
                        Operand::temp(1),
                    ),
                    Instr::ret(Some(Operand::temp(2))),
                ],
            )],
        )],
        vec![ExternDecl::new("rt_abs_i64", vec![Type::I64], Type::I64)],
    )
}

#[test]
fn vms_on_different_threads_share_one_module() {
    let m = shared_module();
    let h = Arc::new(Harness::new(
        RunConfig::default().with_dispatch(DispatchKind::Threaded),
    ));

    let handles: Vec<_> = (0..8i64)
        .map(|i| {
            let m = Arc::clone(&m);
            let h = Arc::clone(&h);
            thread::spawn(move || {
                let mut vm = h.runner.vm(m);
                (0..50)
                    .map(|_| vm.run("work", vec![Value::I64(-i)]).unwrap())
                    .last()
                    .unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let i = i as i64;
        assert_eq!(handle.join().unwrap(), Value::I64(i * i));
    }
    assert!(h.diagnostics.lines().is_empty());
}

#[test]
fn native_traps_on_concurrent_vms_cite_their_own_call_sites() {
    let m = shared_module();
    let h = Arc::new(Harness::new(RunConfig::default()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let m = Arc::clone(&m);
            let h = Arc::clone(&h);
            thread::spawn(move || {
                h.runner
                    .run(m, "work", vec![Value::I64(i64::MIN)])
                    .unwrap_err()
            })
        })
        .collect();

    for handle in handles {
        let trap = handle.join().unwrap();
        assert_eq!(trap.kind, viper::TrapKind::Overflow);
        assert_eq!(trap.site.function.as_deref(), Some("work"));
        assert_eq!(trap.site.ip, Some(0));
    }
}
