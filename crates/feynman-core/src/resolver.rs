//! Call resolution: intercepted return → qualified identifier + arguments.
//!
//! [`ResolverTables`] holds the per-session memo state (signature cache,
//! announced names, shown trace stubs). It is plain data; the session keeps
//! it behind one lock and never holds that lock while handlers run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::event::ItemType;

/// Binding name under which the receiver of a method call is recorded.
pub const RECEIVER_BINDING: &str = "self";

/// Crate names whose calls are never dispatched (self-tracing guard).
const CORE_CRATES: &[&str] = &["feynman", "feynman_core", "feynman_server", "feynman_runtime"];

/// Static description of an instrumented function: where it lives and its
/// parameter names in declaration order. Declared once per call site as a
/// `static`; its address is the signature identity.
#[derive(Debug)]
pub struct CallSite {
    pub module: &'static str,
    pub function: &'static str,
    pub params: &'static [&'static str],
}

impl CallSite {
    pub const fn new(
        module: &'static str,
        function: &'static str,
        params: &'static [&'static str],
    ) -> Self {
        Self {
            module,
            function,
            params,
        }
    }

    pub fn signature(&'static self) -> SignatureId {
        SignatureId(std::ptr::from_ref(self) as usize)
    }
}

/// Identity of a [`CallSite`] (its static address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureId(usize);

/// One intercepted call return: the activation record at return time.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub site: &'static CallSite,
    /// Full type name of the receiver, when the call had one.
    pub receiver_type: Option<&'static str>,
    /// Local bindings at return, in the order they were captured.
    pub locals: Vec<(&'static str, Value)>,
    pub return_value: Value,
}

impl CallRecord {
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}

/// Method vs. function, decided by capability rather than by failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Method { type_name: String },
    Function,
}

impl CallKind {
    /// A receiver binding that exposes a resolvable type name makes a method.
    pub fn classify(record: &CallRecord) -> CallKind {
        let type_name = record
            .receiver_type
            .filter(|_| record.local(RECEIVER_BINDING).is_some())
            .map(short_type_name)
            .filter(|name| !name.is_empty());
        match type_name {
            Some(name) => CallKind::Method {
                type_name: name.to_owned(),
            },
            None => CallKind::Function,
        }
    }

    pub fn qualify(&self, module: &str, function: &str) -> String {
        match self {
            CallKind::Method { type_name } => format!("{module}.{type_name}.{function}"),
            CallKind::Function => format!("{module}.{function}"),
        }
    }
}

/// `app::db::Store<u8>` → `Store`.
pub fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).trim()
}

/// True for modules belonging to the pipeline itself.
pub fn is_core_module(module: &str) -> bool {
    let root = module.split("::").next().unwrap_or(module);
    CORE_CRATES.contains(&root)
}

/// Advisory "this exists" notice, sent once per name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub item_type: ItemType,
    pub item_name: String,
}

/// Result of resolving one call.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub identifier: String,
    pub kind: CallKind,
    pub params: Arc<[String]>,
    /// Names not announced before this call.
    pub announcements: Vec<Announcement>,
}

impl Resolution {
    /// Positional arguments in parameter order, plus the names that had no
    /// binding (passed as `null`).
    pub fn arguments(&self, record: &CallRecord) -> (Vec<Value>, Vec<String>) {
        let mut missing = Vec::new();
        let args = self
            .params
            .iter()
            .map(|name| match record.local(name) {
                Some(v) => v.clone(),
                None => {
                    missing.push(name.clone());
                    Value::Null
                }
            })
            .collect();
        (args, missing)
    }
}

/// Session-scoped memo tables used while resolving calls.
#[derive(Debug, Default)]
pub struct ResolverTables {
    signatures: HashMap<SignatureId, Arc<[String]>>,
    announced: HashSet<String>,
    shown_traces: HashSet<String>,
}

impl ResolverTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a call. `None` for calls from the pipeline's own crates.
    pub fn resolve(&mut self, record: &CallRecord) -> Option<Resolution> {
        let site = record.site;
        if is_core_module(site.module) {
            return None;
        }

        let params = self.parameters(site);
        let kind = CallKind::classify(record);
        let identifier = kind.qualify(site.module, site.function);

        let mut announcements = Vec::new();
        self.announce(&mut announcements, ItemType::Module, site.module.to_owned());
        let item_type = match &kind {
            CallKind::Method { type_name } => {
                self.announce(
                    &mut announcements,
                    ItemType::Class,
                    format!("{}.{type_name}", site.module),
                );
                ItemType::Method
            }
            CallKind::Function => ItemType::Function,
        };
        let signature = if params.is_empty() {
            identifier.clone()
        } else {
            format!("{identifier} {}", params.join(" "))
        };
        self.announce(&mut announcements, item_type, signature);

        Some(Resolution {
            identifier,
            kind,
            params,
            announcements,
        })
    }

    /// Ordered parameter names for a call site, cached by signature identity.
    pub fn parameters(&mut self, site: &'static CallSite) -> Arc<[String]> {
        self.signatures
            .entry(site.signature())
            .or_insert_with(|| site.params.iter().map(|p| (*p).to_owned()).collect())
            .clone()
    }

    fn announce(&mut self, out: &mut Vec<Announcement>, item_type: ItemType, item_name: String) {
        if self.announced.insert(item_name.clone()) {
            out.push(Announcement {
                item_type,
                item_name,
            });
        }
    }

    /// Mark a trace stub as shown. Returns `true` the first time only.
    pub fn mark_trace_shown(&mut self, identifier: &str) -> bool {
        self.shown_traces.insert(identifier.to_owned())
    }

    #[must_use]
    pub fn cached_signatures(&self) -> usize {
        self.signatures.len()
    }
}

/// Developer-facing handler skeleton for an unhandled traced identifier.
pub fn trace_stub(identifier: &str, params: &[String]) -> String {
    let mut out = format!("session.on({identifier:?}, |call| {{\n");
    for name in params {
        let binding = if name == RECEIVER_BINDING { "this" } else { name };
        out.push_str(&format!("    let {binding} = call.arg({name:?});\n"));
    }
    out.push_str("    Ok(())\n});");
    out
}
