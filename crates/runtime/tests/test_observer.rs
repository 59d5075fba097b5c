//! Switch observer notifications
//!
//! Observers are per thread, and each test runs on its own thread, so no
//! serialization is needed.

use costack::{Coroutine, Lane, SwitchObserver, Yielder, set_switch_observer};
use std::cell::RefCell;
use std::rc::Rc;

const SMALL_STACK: usize = 64 * 1024;

#[derive(Default)]
struct Recorder {
    switches: RefCell<Vec<(Lane, Lane)>>,
}

impl Recorder {
    fn ids(&self) -> Vec<(u64, u64)> {
        self.switches
            .borrow()
            .iter()
            .map(|(from, to)| (from.id(), to.id()))
            .collect()
    }
}

impl SwitchObserver for Recorder {
    fn on_context_switch(&self, from: &Lane, to: &Lane) {
        self.switches.borrow_mut().push((from.clone(), to.clone()));
    }
}

fn install() -> Rc<Recorder> {
    let recorder = Rc::new(Recorder::default());
    let observer: Rc<dyn SwitchObserver> = recorder.clone();
    set_switch_observer(Some(observer));
    recorder
}

#[test]
fn test_observer_sees_every_switch() {
    let recorder = install();

    let mut co = Coroutine::builder()
        .name("worker")
        .stack_size(SMALL_STACK)
        .build(|y: &Yielder<()>, ()| {
            y.yield_now().unwrap();
        });
    let id = co.id();

    assert!(co.call(()).unwrap());
    assert!(!co.resume().unwrap());
    set_switch_observer(None);

    assert_eq!(
        recorder.ids(),
        vec![
            (Lane::ROOT_ID, id),
            (id, Lane::ROOT_ID),
            (Lane::ROOT_ID, id),
            (id, Lane::ROOT_ID),
        ]
    );

    let switches = recorder.switches.borrow();
    let (root, worker) = &switches[0];
    assert!(root.is_root());
    assert_eq!(worker.name(), Some("worker"));
    assert_eq!(worker.stack(), co.stack_bounds());
    assert_eq!(worker.to_string(), format!("worker#{}", id));
}

#[test]
fn test_observer_follows_nesting_and_callbacks() {
    let recorder = install();
    let inner_id = Rc::new(std::cell::Cell::new(0));

    let seen_inner = inner_id.clone();
    let mut outer = Coroutine::builder()
        .stack_size(SMALL_STACK)
        .build(move |_: &Yielder<()>, ()| {
            let mut inner = Coroutine::builder()
                .stack_size(SMALL_STACK)
                .build(|iy: &Yielder<()>, ()| {
                    iy.run_on_main_stack(|| ()).unwrap();
                });
            seen_inner.set(inner.id());
            assert!(!inner.call(()).unwrap());
        });
    let outer_id = outer.id();

    assert!(!outer.call(()).unwrap());
    set_switch_observer(None);

    let root = Lane::ROOT_ID;
    let inner = inner_id.get();
    assert_eq!(
        recorder.ids(),
        vec![
            (root, outer_id),
            (outer_id, inner),
            (inner, root),
            (root, inner),
            (inner, outer_id),
            (outer_id, root),
        ]
    );
}

#[test]
fn test_no_notifications_after_removal() {
    let recorder = install();
    let previous = set_switch_observer(None);
    assert!(previous.is_some());

    let mut co = Coroutine::builder()
        .stack_size(SMALL_STACK)
        .build(|_: &Yielder<()>, ()| ());
    co.call(()).unwrap();

    assert!(recorder.ids().is_empty());
}
