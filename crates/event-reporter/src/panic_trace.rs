// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack traces taken where a panic is raised.
//!
//! By the time `catch_unwind` returns, the panicking frames are gone. A
//! panic hook, chained in front of whatever hook was installed before it,
//! records the stack while they still exist. The hook only does work on
//! threads currently inside [`catch_with_trace`].

use crate::stacktrace::Stacktrace;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, UnwindSafe};
use std::sync::Once;

/// Frames between the panic site and the hook.
const PANIC_FRAMES: [&str; 11] = [
    "event_reporter::stacktrace::",
    "event_reporter::panic_trace::record_trace",
    "event_reporter::panic_trace::install_hook",
    "alloc::boxed::Box",
    "std::panicking::",
    "core::panicking::",
    "std::panic::",
    "core::panic::",
    "std::rt::",
    "std::sys",
    "rust_begin_unwind",
];

struct Armed {
    include_paths: Vec<String>,
    trace: Option<Stacktrace>,
}

thread_local! {
    static ARMED: RefCell<Option<Armed>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            record_trace();
            previous(info);
        }));
    });
}

fn record_trace() {
    // the thread local is gone during thread teardown
    let _ = ARMED.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            if let Some(armed) = slot.as_mut().filter(|armed| armed.trace.is_none()) {
                armed.trace = Some(Stacktrace::capture(&PANIC_FRAMES, &armed.include_paths));
            }
        }
    });
}

/// Runs `f` under `catch_unwind`. On panic, returns the payload and the
/// stack recorded at the panic site, when the hook saw it.
///
/// The trace is missing when another hook replaced this one after it was
/// installed.
pub(crate) fn catch_with_trace<F, R>(
    f: F,
    include_paths: Vec<String>,
) -> Result<R, (Box<dyn Any + Send>, Option<Stacktrace>)>
where
    F: FnOnce() -> R + UnwindSafe,
{
    install_hook();
    let outer = ARMED.with(|slot| {
        slot.replace(Some(Armed {
            include_paths,
            trace: None,
        }))
    });
    let result = panic::catch_unwind(f);
    let armed = ARMED.with(|slot| slot.replace(outer));
    result.map_err(|payload| (payload, armed.and_then(|armed| armed.trace)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn fail_deep_inside() {
        panic!("deep failure");
    }

    #[test]
    fn test_trace_includes_panic_site() {
        let (_, trace) = catch_with_trace(fail_deep_inside, Vec::new()).expect_err("panics");
        let trace = trace.expect("hook recorded a trace");
        assert!(trace
            .frames
            .iter()
            .any(|frame| frame.function == "fail_deep_inside"));
    }

    #[test]
    fn test_value_passes_through() {
        assert!(matches!(catch_with_trace(|| 5, Vec::new()), Ok(5)));
    }

    #[test]
    fn test_nested_calls_restore_outer_slot() {
        let outer = catch_with_trace(
            || {
                let inner = catch_with_trace(fail_deep_inside, Vec::new());
                assert!(inner.is_err());
                fail_deep_inside();
            },
            Vec::new(),
        );
        let (_, trace) = outer.expect_err("panics");
        assert!(trace.is_some());
    }
}
