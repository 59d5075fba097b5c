//! Switch observers
//!
//! Tools that track which stack is live (sanitizers, sampling profilers,
//! debuggers) need to hear about every switch before it happens. An observer
//! is installed per thread and receives the [`Lane`] being left and the one
//! being entered; the root stack is [`Lane::root`].
//!
//! ```ignore
//! struct Tracer;
//! impl SwitchObserver for Tracer {
//!     fn on_context_switch(&self, from: &Lane, to: &Lane) {
//!         eprintln!("{from} -> {to}");
//!     }
//! }
//! set_switch_observer(Some(Rc::new(Tracer)));
//! ```

use crate::link::{Link, lane_of};
use costack_core::Lane;
use std::cell::RefCell;
use std::rc::Rc;

pub trait SwitchObserver {
    /// Called on the stack being left, immediately before the switch
    fn on_context_switch(&self, from: &Lane, to: &Lane);
}

thread_local! {
    static OBSERVER: RefCell<Option<Rc<dyn SwitchObserver>>> = const { RefCell::new(None) };
}

/// Install (or with `None`, remove) this thread's observer
///
/// Returns the previously installed observer.
pub fn set_switch_observer(
    observer: Option<Rc<dyn SwitchObserver>>,
) -> Option<Rc<dyn SwitchObserver>> {
    OBSERVER.with(|o| std::mem::replace(&mut *o.borrow_mut(), observer))
}

pub(crate) fn notify(from: *const Link, to: *const Link) {
    // Clone out so the observer may replace itself without a borrow conflict
    let Some(observer) = OBSERVER.with(|o| o.borrow().clone()) else {
        return;
    };
    // SAFETY: both links are live; the switch they describe is about to happen.
    let (from, to) = unsafe { (lane_of(from), lane_of(to)) };
    observer.on_context_switch(&from, &to);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter(Cell<usize>);

    impl SwitchObserver for Counter {
        fn on_context_switch(&self, _from: &Lane, _to: &Lane) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_set_returns_previous() {
        let first: Rc<dyn SwitchObserver> = Rc::new(Counter(Cell::new(0)));
        assert!(set_switch_observer(Some(first.clone())).is_none());

        let previous = set_switch_observer(None).expect("previous observer");
        assert!(Rc::ptr_eq(&previous, &first));
        assert!(set_switch_observer(None).is_none());
    }

    #[test]
    fn test_notify_reports_root_lanes() {
        let counter = Rc::new(Counter(Cell::new(0)));
        let observer: Rc<dyn SwitchObserver> = counter.clone();
        set_switch_observer(Some(observer));
        notify(std::ptr::null(), std::ptr::null());
        notify(std::ptr::null(), std::ptr::null());
        set_switch_observer(None);
        notify(std::ptr::null(), std::ptr::null());

        assert_eq!(counter.0.get(), 2);
    }
}
