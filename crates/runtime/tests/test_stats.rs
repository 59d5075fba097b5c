//! Engine counters and the report built from them
//!
//! The counters are process-wide, so every test in this binary is serialized.

use costack::report::{ReportConfig, ReportDestination, ReportFormat, emit_report_with};
use costack::stats::snapshot;
use costack::{Coroutine, Yielder};
use serial_test::serial;

const SMALL_STACK: usize = 64 * 1024;

fn nested_graph(depth: u32) -> Coroutine<u32> {
    Coroutine::builder()
        .stack_size(SMALL_STACK)
        .build(move |_: &Yielder<u32>, ()| {
            if depth == 0 {
                return 1;
            }
            let mut child = nested_graph(depth - 1);
            assert!(!child.call(()).unwrap());
            child.take_return_value().unwrap() + 1
        })
}

#[test]
#[serial]
fn test_one_root_chain_per_outermost_call() {
    let before = snapshot();

    let mut top = nested_graph(3);
    assert!(!top.call(()).unwrap());
    assert_eq!(top.return_value(), Some(&4));

    let after = snapshot();
    assert_eq!(after.root_chains - before.root_chains, 1);
    assert_eq!(after.coroutines_created - before.coroutines_created, 4);
    assert_eq!(after.coroutines_finished - before.coroutines_finished, 4);
    // four coroutines, each entered once and left once
    assert_eq!(after.context_switches - before.context_switches, 8);
}

#[test]
#[serial]
fn test_each_root_resume_starts_a_chain() {
    let before = snapshot();

    let mut co = Coroutine::builder()
        .stack_size(SMALL_STACK)
        .build(|y: &Yielder<i32>, x: i32| {
            y.yield_with(x + 1).unwrap();
            y.yield_with(x + 2).unwrap();
            x + 3
        });
    assert!(co.call(10).unwrap());
    assert!(co.resume().unwrap());
    assert!(!co.resume().unwrap());

    let after = snapshot();
    assert_eq!(after.root_chains - before.root_chains, 3);
    assert_eq!(after.context_switches - before.context_switches, 6);
}

#[test]
#[serial]
fn test_root_callbacks_counted() {
    let before = snapshot();

    let mut co = Coroutine::builder()
        .stack_size(SMALL_STACK)
        .build(|y: &Yielder<()>, ()| {
            for _ in 0..3 {
                y.run_on_main_stack(|| ()).unwrap();
            }
        });
    co.call(()).unwrap();

    let after = snapshot();
    assert_eq!(after.root_callbacks - before.root_callbacks, 3);
    assert_eq!(after.root_chains - before.root_chains, 1);
    // enter + leave, plus two switches per callback
    assert_eq!(after.context_switches - before.context_switches, 8);
}

#[test]
#[serial]
fn test_stack_accounting_balances() {
    let before = snapshot();

    let mut suspended = Coroutine::builder()
        .stack_size(SMALL_STACK)
        .build(|y: &Yielder<()>, ()| y.yield_now().unwrap());
    let mut finished = Coroutine::builder()
        .stack_size(SMALL_STACK)
        .build(|_: &Yielder<()>, ()| ());
    suspended.call(()).unwrap();
    finished.call(()).unwrap();

    let during = snapshot();
    assert_eq!(during.arenas_acquired - before.arenas_acquired, 2);
    assert!(during.mapped_bytes >= before.mapped_bytes + 2 * SMALL_STACK);
    assert!(during.peak_mapped_bytes >= during.mapped_bytes);

    drop(suspended);
    drop(finished);

    let after = snapshot();
    assert_eq!(after.arenas_released - before.arenas_released, 2);
    assert_eq!(after.coroutines_abandoned - before.coroutines_abandoned, 1);
    assert_eq!(after.mapped_bytes, before.mapped_bytes);
    assert_eq!(after.live_arenas(), before.live_arenas());
}

#[test]
#[serial]
fn test_report_reflects_counters() {
    let mut co = Coroutine::builder()
        .stack_size(SMALL_STACK)
        .build(|_: &Yielder<()>, ()| ());
    co.call(()).unwrap();
    let created = snapshot().coroutines_created;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("costack-report.txt");
    emit_report_with(&ReportConfig {
        format: ReportFormat::Human,
        destination: ReportDestination::File(path.to_string_lossy().into_owned()),
    });

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains(&format!("Coroutines created:   {}", created)));
}

#[cfg(feature = "report-json")]
#[test]
#[serial]
fn test_json_report_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("costack-report.json");
    let config = ReportConfig::parse(&format!("json:{}", path.display())).unwrap();

    emit_report_with(&config);

    let text = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(parsed["context_switches"].as_u64().is_some());
    assert_eq!(
        parsed["root_chains"].as_u64(),
        Some(snapshot().root_chains)
    );
}
