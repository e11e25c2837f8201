//! feynman: watch a running program through a browser.
//!
//! Instrument the calls you care about with [`traced!`], register handlers
//! that turn those calls into drawings, and activate a [`Session`]. Every
//! instrumented return is resolved to a `module.Type.function` identifier,
//! dispatched to matching handlers, and whatever they emit is streamed over
//! WebSocket to one viewer.
//!
//! ```no_run
//! use feynman::prelude::*;
//!
//! #[derive(serde::Serialize)]
//! struct Store {
//!     name: String,
//!     size: usize,
//! }
//!
//! impl Store {
//!     fn write(&mut self, key: &str, value: &str) {
//!         self.size += 1;
//!         feynman::traced!("db", self.write(key, value));
//!     }
//! }
//!
//! let session = Session::new(SessionConfig::from_env()?);
//! session.on("db.Store.write", |call| {
//!     let size = &call.arg("self")["size"];
//!     call.emit().update("db-size", "text", format!("size: {size}"));
//!     Ok(())
//! });
//! let _active = session.activate()?;
//! let mut store = Store { name: "book1".into(), size: 0 };
//! store.write("k", "v");
//! # Ok::<(), feynman::SessionError>(())
//! ```

pub mod config;
pub mod content;
pub mod emit;
pub mod error;
pub mod hook;
pub mod lifecycle;
pub mod logging;
pub mod session;

pub use config::SessionConfig;
pub use emit::Emitter;
pub use error::SessionError;
pub use feynman_core::{
    CallKind, CallRecord, CallSite, ContentKind, Draw, ElementId, Event, EventKind, Group, Image,
    Length, Line, Oval, Pattern, Payload, RECEIVER_BINDING, Rectangle, Shape, Text,
};
pub use hook::{CallHook, Frame};
pub use lifecycle::{SessionCommand, SessionState};
pub use logging::init_logging;
pub use session::{ActiveSession, Dispatch, Handler, Invocation, Session};

/// Everything a handler module usually needs.
pub mod prelude {
    pub use crate::{
        ActiveSession, Emitter, Group, Image, Invocation, Line, Oval, Pattern, Rectangle, Session,
        SessionConfig, Shape, Text,
    };
}

/// Record the return of an instrumented call.
///
/// Two forms, placed where the bindings are still alive (usually right
/// before returning):
///
/// - method: `traced!("db", self.write(key, value) -> &result)`
/// - function: `traced!("db", log(message))`
///
/// The `-> expr` part is the return value (by reference) and defaults to
/// `()`. Bindings are captured with serde; the receiver must be `&self` or
/// `&mut self` of a `Serialize` type. When no session is active this costs
/// one atomic load.
#[macro_export]
macro_rules! traced {
    ($module:expr, $recv:ident . $function:ident ( $($arg:ident),* $(,)? ) $(-> $ret:expr)?) => {{
        static SITE: $crate::CallSite = $crate::CallSite::new(
            $module,
            stringify!($function),
            &[$crate::RECEIVER_BINDING $(, stringify!($arg))*],
        );
        if $crate::hook::is_installed() {
            $crate::Frame::new(&SITE)
                .receiver(&*$recv)
                $(.local(stringify!($arg), &$arg))*
                .finish($crate::__traced_return!($($ret)?));
        }
    }};
    ($module:expr, $function:ident ( $($arg:ident),* $(,)? ) $(-> $ret:expr)?) => {{
        static SITE: $crate::CallSite = $crate::CallSite::new(
            $module,
            stringify!($function),
            &[$(stringify!($arg)),*],
        );
        if $crate::hook::is_installed() {
            $crate::Frame::new(&SITE)
                $(.local(stringify!($arg), &$arg))*
                .finish($crate::__traced_return!($($ret)?));
        }
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __traced_return {
    () => {
        &()
    };
    ($ret:expr) => {
        $ret
    };
}
