//! Lifecycle callbacks and the interrupt signal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle events reported to registered callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackEvent {
    Init,
    StepActive,
    /// After every converged time point.
    MajorIters,
    /// After every Newton iteration.
    MinorIters,
    StepSolved,
    /// The run ended, completed or failed.
    Solved,
}

/// Callback verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackStatus {
    #[default]
    Continue,
    /// Stop the run; the current step is left unconverged.
    ExitRequest,
}

/// Snapshot passed to callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallbackInfo {
    pub event: CallbackEvent,
    pub step: usize,
    pub time: f64,
    pub iteration: usize,
}

type Callback = Box<dyn FnMut(&CallbackInfo) -> CallbackStatus + Send>;

/// Registered callbacks, each listening to a set of events.
#[derive(Default)]
pub struct Hooks {
    callbacks: Vec<(Vec<CallbackEvent>, Callback)>,
    interrupt: InterruptHandle,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("callbacks", &self.callbacks.len())
            .field("interrupt", &self.interrupt)
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, events: &[CallbackEvent], f: F)
    where
        F: FnMut(&CallbackInfo) -> CallbackStatus + Send + 'static,
    {
        self.callbacks.push((events.to_vec(), Box::new(f)));
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Fire `info.event`. Any callback requesting exit, or a raised
    /// interrupt, yields [`CallbackStatus::ExitRequest`].
    pub fn fire(&mut self, info: CallbackInfo) -> CallbackStatus {
        let mut status = CallbackStatus::Continue;
        for (events, cb) in self.callbacks.iter_mut() {
            if events.contains(&info.event) && cb(&info) == CallbackStatus::ExitRequest {
                status = CallbackStatus::ExitRequest;
            }
        }
        if self.interrupt.is_raised() {
            status = CallbackStatus::ExitRequest;
        }
        status
    }
}

/// Thread-safe stop flag; raise it from any thread to end the run at the
/// next iteration boundary.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn info(event: CallbackEvent) -> CallbackInfo {
        CallbackInfo { event, step: 0, time: 0.0, iteration: 0 }
    }

    #[test]
    fn test_only_subscribed_events_fire() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let mut hooks = Hooks::new();
        hooks.register(&[CallbackEvent::StepSolved], move |i| {
            s.lock().unwrap().push(i.event);
            CallbackStatus::Continue
        });
        hooks.fire(info(CallbackEvent::Init));
        hooks.fire(info(CallbackEvent::StepSolved));
        assert_eq!(*seen.lock().unwrap(), vec![CallbackEvent::StepSolved]);
    }

    #[test]
    fn test_interrupt_overrides() {
        let mut hooks = Hooks::new();
        let handle = hooks.interrupt_handle();
        assert_eq!(hooks.fire(info(CallbackEvent::MinorIters)), CallbackStatus::Continue);
        handle.raise();
        assert_eq!(hooks.fire(info(CallbackEvent::MinorIters)), CallbackStatus::ExitRequest);
    }
}
