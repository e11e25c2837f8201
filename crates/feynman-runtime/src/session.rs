//! The session: handler registry, call dispatch and lifecycle.
//!
//! A [`Session`] is created inactive, gets its handlers registered, and is
//! then activated. Activation starts the viewer endpoint on its own thread
//! and installs the session as the process-wide call hook. Dropping the
//! returned [`ActiveSession`] (or calling [`ActiveSession::finish`]) stops
//! interception, flushes staged updates, waits for the queue to drain (up to
//! the grace period) and shuts the endpoint down.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use feynman_core::{
    CallKind, CallRecord, HandlerRegistry, Pattern, Resolution, ResolverTables, trace_stub,
};
use feynman_server::{BroadcastServer, EventReceiver, channel, launch_viewer, ws_url};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::emit::Emitter;
use crate::error::SessionError;
use crate::hook::{self, CallHook};
use crate::lifecycle::{SessionCommand, SessionState, transition};

/// A registered handler. Errors and panics are logged; the remaining
/// handlers still run.
pub type Handler = Arc<dyn Fn(&Invocation<'_>) -> anyhow::Result<()> + Send + Sync>;

const BOOTSTRAP_CSS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/ui/bootstrap.css");
const BOOTSTRAP_JS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/ui/bootstrap.js");

/// How often the server thread checks for due updates, as a fraction of
/// the flush interval.
const FLUSH_TICKS_PER_INTERVAL: u32 = 2;

/// What one call return led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Session not active, or the call came from the pipeline itself.
    Ignored,
    /// No handler matched and no trace target covers the identifier (or its
    /// stub was already shown).
    Unmatched,
    /// This many handlers were invoked.
    Handled(usize),
    /// No handler matched; this stub was logged for the developer.
    Stub(String),
}

/// One resolved call, as seen by a handler.
pub struct Invocation<'a> {
    identifier: &'a str,
    kind: &'a CallKind,
    params: &'a [String],
    args: &'a [Value],
    return_value: &'a Value,
    emitter: &'a Emitter,
}

static NULL: Value = Value::Null;

impl<'a> Invocation<'a> {
    /// `module.Type.function` or `module.function`.
    pub fn identifier(&self) -> &'a str {
        self.identifier
    }

    pub fn kind(&self) -> &'a CallKind {
        self.kind
    }

    pub fn return_value(&self) -> &'a Value {
        self.return_value
    }

    /// Arguments in declaration order; the receiver first for methods.
    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    pub fn params(&self) -> &'a [String] {
        self.params
    }

    /// Argument bound to parameter `name`, or `null`.
    pub fn arg(&self, name: &str) -> &'a Value {
        self.params
            .iter()
            .position(|p| p == name)
            .and_then(|i| self.args.get(i))
            .unwrap_or(&NULL)
    }

    pub fn emit(&self) -> &'a Emitter {
        self.emitter
    }
}

pub struct Session {
    config: SessionConfig,
    state: Mutex<SessionState>,
    enabled: AtomicBool,
    /// Held shared for each dispatch; `close` takes it exclusively so the
    /// final flush sees what running handlers staged.
    in_flight: RwLock<()>,
    registry: RwLock<HandlerRegistry<Handler>>,
    tables: Mutex<ResolverTables>,
    emitter: Emitter,
    events: Mutex<Option<EventReceiver>>,
    server: Mutex<Option<ServerThread>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &*self.state.lock())
            .field("handlers", &self.registry.read().len())
            .field("addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        let (tx, rx) = channel(config.channel_capacity);
        let emitter = Emitter::new(tx, config.flush_interval());
        Arc::new(Self {
            config,
            state: Mutex::new(SessionState::Inactive),
            enabled: AtomicBool::new(false),
            in_flight: RwLock::new(()),
            registry: RwLock::new(HandlerRegistry::new()),
            tables: Mutex::new(ResolverTables::new()),
            emitter,
            events: Mutex::new(Some(rx)),
            server: Mutex::new(None),
        })
    }

    // -- registration -------------------------------------------------------

    /// Handle calls whose identifier is exactly `identifier`.
    pub fn on<F>(&self, identifier: &str, handler: F)
    where
        F: Fn(&Invocation<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Pattern::literal(identifier), Arc::new(handler));
    }

    /// Handle calls whose identifier starts with a match of `pattern`.
    ///
    /// The first regex registration switches the whole registry to pattern
    /// matching; literal registrations then only match exactly.
    pub fn on_pattern<F>(&self, pattern: &str, handler: F) -> Result<(), SessionError>
    where
        F: Fn(&Invocation<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Pattern::regex(pattern)?, Arc::new(handler));
        Ok(())
    }

    pub fn register(&self, pattern: Pattern, handler: Handler) {
        tracing::debug!(pattern = pattern.as_str(), "handler registered");
        self.registry.write().register(pattern, handler);
    }

    /// Log a handler stub for calls under `prefix` that nothing handles.
    pub fn trace(&self, prefix: &str) {
        self.registry.write().trace(prefix);
    }

    // -- accessors ----------------------------------------------------------

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Address the viewer endpoint is bound to, while it runs.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(|s| s.addr)
    }

    /// Take the consuming end of the event channel, for sessions that do
    /// not serve a viewer themselves. `None` if already taken.
    pub fn take_receiver(&self) -> Option<EventReceiver> {
        self.events.lock().take()
    }

    // -- dispatch -----------------------------------------------------------

    /// Resolve one call return and run the matching handlers.
    pub fn handle_return(&self, record: &CallRecord) -> Dispatch {
        // Recursive so a handler dispatching by hand cannot deadlock behind
        // a waiting `close`.
        let _in_flight = self.in_flight.read_recursive();
        if !self.is_enabled() {
            return Dispatch::Ignored;
        }
        let Some(resolution) = self.tables.lock().resolve(record) else {
            return Dispatch::Ignored;
        };
        for announcement in &resolution.announcements {
            tracing::debug!(
                item_type = ?announcement.item_type,
                item = %announcement.item_name,
                "announcing"
            );
            self.emitter.info(announcement);
        }

        let handlers = self.registry.read().lookup(&resolution.identifier);
        if handlers.is_empty() {
            return self.unhandled(&resolution);
        }

        let (args, missing) = resolution.arguments(record);
        if !missing.is_empty() {
            tracing::warn!(
                identifier = %resolution.identifier,
                missing = ?missing,
                "parameters without a captured binding are passed as null"
            );
        }
        let invocation = Invocation {
            identifier: &resolution.identifier,
            kind: &resolution.kind,
            params: &resolution.params,
            args: &args,
            return_value: &record.return_value,
            emitter: &self.emitter,
        };
        for handler in &handlers {
            run_handler(handler, &invocation);
        }
        Dispatch::Handled(handlers.len())
    }

    fn unhandled(&self, resolution: &Resolution) -> Dispatch {
        let prefix = match self.registry.read().trace_target_for(&resolution.identifier) {
            Some(prefix) => prefix.to_owned(),
            None => return Dispatch::Unmatched,
        };
        if !self.tables.lock().mark_trace_shown(&resolution.identifier) {
            return Dispatch::Unmatched;
        }
        let stub = trace_stub(&resolution.identifier, &resolution.params);
        tracing::info!(
            target: "feynman::trace",
            identifier = %resolution.identifier,
            prefix = %prefix,
            "no handler for traced call; start from:\n{stub}"
        );
        Dispatch::Stub(stub)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Start the viewer endpoint and begin intercepting calls.
    pub fn activate(self: &Arc<Self>) -> Result<ActiveSession, SessionError> {
        let mut state = self.state.lock();
        let next = transition(*state, SessionCommand::Activate)?;

        if self.config.serve {
            let events = self.take_receiver().ok_or(SessionError::ReceiverTaken)?;
            let server = ServerThread::start(&self.config, events, self.emitter.clone())?;
            let addr = server.addr;
            *self.server.lock() = Some(server);
            self.open_viewer(addr);
        }

        hook::install(Arc::clone(self) as Arc<dyn CallHook>);
        self.enabled.store(true, Ordering::Release);
        *state = next;
        drop(state);

        if self.config.bootstrap {
            self.emitter.css(BOOTSTRAP_CSS);
            self.emitter.run(BOOTSTRAP_JS);
        }
        tracing::info!(addr = ?self.local_addr(), "session active");
        Ok(ActiveSession {
            session: Arc::clone(self),
        })
    }

    fn open_viewer(&self, addr: SocketAddr) {
        if !self.config.launch_viewer {
            return;
        }
        match &self.config.viewer {
            Some(template) => {
                launch_viewer(template, addr);
            }
            None => tracing::info!(
                endpoint = %ws_url(addr),
                "no viewer configured; connect one to the endpoint"
            ),
        }
    }

    /// Stop intercepting and flush staged updates. Active → Draining.
    pub fn close(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        *state = transition(*state, SessionCommand::Close)?;
        self.enabled.store(false, Ordering::Release);
        hook::uninstall_if(self);
        if self.in_flight.try_write_for(self.config.grace_period()).is_none() {
            tracing::warn!("handlers still running after the grace period");
        }
        let flushed = self.emitter.flush_updates();
        tracing::info!(flushed, "session draining");
        Ok(())
    }

    /// Wait for queued events to go out (bounded by the grace period), stop
    /// the endpoint. Draining → Terminated.
    pub fn terminate(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let next = transition(*state, SessionCommand::Terminate)?;

        // Anything staged by a handler that outlived the wait in `close`.
        self.emitter.flush_updates();
        if let Some(server) = self.server.lock().take() {
            let deadline = Instant::now() + self.config.grace_period();
            while self.emitter.queued() > 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            let left = self.emitter.queued();
            if left > 0 {
                tracing::warn!(left, "grace period over with events still queued");
            }
            server.stop();
        }
        *state = next;
        tracing::info!("session terminated");
        Ok(())
    }

    fn shutdown(&self) {
        if let Err(e) = self.close() {
            tracing::debug!(error = %e, "session already closed");
            return;
        }
        if let Err(e) = self.terminate() {
            tracing::warn!(error = %e, "session termination failed");
            return;
        }
        if self.config.exit_on_close {
            std::process::exit(0);
        }
    }
}

impl CallHook for Session {
    fn on_return(&self, record: &CallRecord) {
        self.handle_return(record);
    }
}

fn run_handler(handler: &Handler, invocation: &Invocation<'_>) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(invocation))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(identifier = invocation.identifier, error = %format!("{e:#}"), "handler failed");
        }
        Err(payload) => {
            tracing::error!(
                identifier = invocation.identifier,
                panic = panic_message(payload.as_ref()),
                "handler panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Guard for an active session. Dropping it closes the session.
#[must_use = "dropping the guard closes the session"]
pub struct ActiveSession {
    session: Arc<Session>,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ActiveSession").field(&self.session).finish()
    }
}

impl ActiveSession {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.local_addr()
    }

    /// Close now instead of at end of scope.
    pub fn finish(self) {
        drop(self);
    }
}

impl std::ops::Deref for ActiveSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Server thread
// ---------------------------------------------------------------------------

/// The viewer endpoint, running on a dedicated current-thread runtime so it
/// works the same whether the host program is sync or async.
struct ServerThread {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ServerThread {
    fn start(
        config: &SessionConfig,
        events: EventReceiver,
        emitter: Emitter,
    ) -> Result<Self, SessionError> {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<SocketAddr, SessionError>>(1);
        let server = BroadcastServer::new(config.addr, events, cancel.clone());
        let tick = config.flush_interval() / FLUSH_TICKS_PER_INTERVAL;
        let flush_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("feynman-server".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(SessionError::Runtime(e)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let listener = match server.bind().await {
                        Ok((listener, addr)) => {
                            let _ = ready_tx.send(Ok(addr));
                            listener
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.into()));
                            return;
                        }
                    };
                    let flusher = flush_periodically(emitter, tick, flush_cancel);
                    let (served, ()) = tokio::join!(server.serve(listener), flusher);
                    if let Err(e) = served {
                        tracing::error!(error = %e, "broadcast server failed");
                    }
                });
            })
            .map_err(SessionError::Runtime)?;

        match ready_rx.recv() {
            Ok(Ok(addr)) => Ok(Self {
                addr,
                cancel,
                handle,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SessionError::ServerGone)
            }
        }
    }

    fn stop(self) {
        self.cancel.cancel();
        if self.handle.join().is_err() {
            tracing::error!("server thread panicked");
        }
    }
}

async fn flush_periodically(emitter: Emitter, tick: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(tick.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                emitter.flush_updates_if_due();
            }
            _ = cancel.cancelled() => break,
        }
    }
}
