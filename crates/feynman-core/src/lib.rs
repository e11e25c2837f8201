//! feynman-core: pure building blocks of the visualization pipeline.
//! Event model, handler registry, call resolution tables and the update
//! coalescer. No IO, no async runtime; callers own locking and delivery.

pub mod coalesce;
pub mod error;
pub mod event;
pub mod registry;
pub mod resolver;

pub use coalesce::{Coalescer, DEFAULT_FLUSH_INTERVAL, StagedUpdate, UpdateKey};
pub use error::RegistryError;
pub use event::{
    ContentKind, Draw, ElementId, Event, EventKind, Group, IdGenerator, Image, ItemType, Length,
    Line, Oval, Payload, Rectangle, Shape, Text, now_secs,
};
pub use registry::{HandlerRegistry, Pattern};
pub use resolver::{
    Announcement, CallKind, CallRecord, CallSite, RECEIVER_BINDING, Resolution, ResolverTables,
    SignatureId, is_core_module, short_type_name, trace_stub,
};
