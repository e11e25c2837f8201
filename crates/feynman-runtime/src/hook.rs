//! Process-wide call-return hook.
//!
//! Instrumented code reports returns through [`Frame`] (usually via the
//! [`traced!`](crate::traced) macro). At most one [`CallHook`] is installed at
//! a time; with none installed a report costs one atomic load.
//!
//! Reports made while a hook is already running on the same thread are
//! dropped, so handlers can call instrumented code without recursing.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use feynman_core::{CallRecord, CallSite, RECEIVER_BINDING};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

/// Receives every reported call return.
pub trait CallHook: Send + Sync {
    fn on_return(&self, record: &CallRecord);
}

static HOOK: RwLock<Option<Arc<dyn CallHook>>> = parking_lot::const_rwlock(None);
static INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Install `hook`, replacing any previous one.
pub fn install(hook: Arc<dyn CallHook>) {
    *HOOK.write() = Some(hook);
    INSTALLED.store(true, Ordering::Release);
}

/// Remove the installed hook, if any.
pub fn uninstall() -> Option<Arc<dyn CallHook>> {
    let mut slot = HOOK.write();
    INSTALLED.store(false, Ordering::Release);
    slot.take()
}

/// Remove the installed hook only if it is `owner`.
pub(crate) fn uninstall_if<T: CallHook>(owner: &T) -> bool {
    let mut slot = HOOK.write();
    let owned = slot
        .as_ref()
        .is_some_and(|h| std::ptr::addr_eq(Arc::as_ptr(h), std::ptr::from_ref(owner)));
    if owned {
        INSTALLED.store(false, Ordering::Release);
        *slot = None;
    }
    owned
}

/// Whether a report from this thread would reach a hook.
#[inline]
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Acquire) && !IN_HOOK.with(Cell::get)
}

/// Hand a record to the installed hook.
pub fn dispatch(record: CallRecord) {
    if IN_HOOK.with(Cell::get) {
        return;
    }
    // Clone out so the lock is not held while the hook runs.
    let Some(hook) = HOOK.read().clone() else {
        return;
    };
    let _guard = Reentry::enter();
    hook.on_return(&record);
}

struct Reentry;

impl Reentry {
    fn enter() -> Self {
        IN_HOOK.with(|f| f.set(true));
        Reentry
    }
}

impl Drop for Reentry {
    fn drop(&mut self) {
        IN_HOOK.with(|f| f.set(false));
    }
}

/// Builder for the activation record of one returning call.
#[derive(Debug)]
#[must_use = "a frame is only reported by `finish`"]
pub struct Frame {
    site: &'static CallSite,
    receiver_type: Option<&'static str>,
    locals: Vec<(&'static str, Value)>,
}

impl Frame {
    pub fn new(site: &'static CallSite) -> Self {
        Self {
            site,
            receiver_type: None,
            locals: Vec::with_capacity(site.params.len()),
        }
    }

    /// Bind the receiver under `self` and remember its type.
    pub fn receiver<T: Serialize + ?Sized>(mut self, receiver: &T) -> Self {
        self.receiver_type = Some(std::any::type_name::<T>());
        self.locals.push((RECEIVER_BINDING, capture(RECEIVER_BINDING, receiver)));
        self
    }

    pub fn local<T: Serialize + ?Sized>(mut self, name: &'static str, value: &T) -> Self {
        self.locals.push((name, capture(name, value)));
        self
    }

    /// Report the return.
    pub fn finish<T: Serialize + ?Sized>(self, return_value: &T) {
        let return_value = capture("return", return_value);
        dispatch(CallRecord {
            site: self.site,
            receiver_type: self.receiver_type,
            locals: self.locals,
            return_value,
        });
    }
}

fn capture<T: Serialize + ?Sized>(name: &str, value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::debug!(binding = name, error = %e, "binding not serializable, recorded as null");
        Value::Null
    })
}
