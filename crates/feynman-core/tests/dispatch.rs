//! Resolver + registry + coalescer wired together the way a session uses them.

use std::time::{Duration, Instant};

use feynman_core::{
    CallKind, CallRecord, CallSite, Coalescer, HandlerRegistry, ItemType, Pattern, Payload,
    ResolverTables, trace_stub,
};
use serde_json::{Value, json};

static WRITE: CallSite = CallSite::new("m", "write", &["self", "key", "value"]);
static PING: CallSite = CallSite::new("net", "ping", &["host"]);

fn store_write(size: u64) -> CallRecord {
    CallRecord {
        site: &WRITE,
        receiver_type: Some("app::m::Store"),
        locals: vec![
            ("self", json!({"size": size})),
            ("key", json!("k")),
            ("value", json!("v")),
        ],
        return_value: Value::Null,
    }
}

type Handler = fn(&[Value], &mut Coalescer);

fn stage_size(args: &[Value], updates: &mut Coalescer) {
    updates.stage("instanceId", "size", args[0]["size"].clone());
}

#[test]
fn writes_resolve_dispatch_and_coalesce() {
    let mut tables = ResolverTables::new();
    let mut registry: HandlerRegistry<Handler> = HandlerRegistry::new();
    registry.register(Pattern::literal("m.Store.write"), stage_size);

    let t0 = Instant::now();
    let mut updates = Coalescer::starting_at(Duration::from_millis(50), t0);
    let mut announced = Vec::new();

    for size in 1..=3 {
        let record = store_write(size);
        let resolution = tables.resolve(&record).unwrap();
        assert_eq!(resolution.kind, CallKind::Method { type_name: "Store".into() });
        announced.extend(resolution.announcements.iter().map(|a| a.item_type));
        let (args, missing) = resolution.arguments(&record);
        assert!(missing.is_empty());
        for handler in registry.lookup(&resolution.identifier) {
            handler(&args, &mut updates);
        }
    }

    assert_eq!(announced, vec![ItemType::Module, ItemType::Class, ItemType::Method]);
    assert_eq!(tables.cached_signatures(), 1);

    let events: Vec<_> = updates
        .take_all(t0)
        .into_iter()
        .map(|u| u.into_event())
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, "instanceId");
    assert_eq!(
        events[0].payload,
        Payload::Update {
            name: "size".into(),
            value: json!(3)
        }
    );
}

#[test]
fn unhandled_traced_call_yields_a_stub_once() {
    let mut tables = ResolverTables::new();
    let mut registry: HandlerRegistry<Handler> = HandlerRegistry::new();
    registry.trace("net.");

    let record = CallRecord {
        site: &PING,
        receiver_type: None,
        locals: vec![("host", json!("example.org"))],
        return_value: json!(12),
    };

    let mut stubs = Vec::new();
    for _ in 0..3 {
        let resolution = tables.resolve(&record).unwrap();
        assert_eq!(resolution.identifier, "net.ping");
        assert!(registry.lookup(&resolution.identifier).is_empty());
        if registry.trace_target_for(&resolution.identifier).is_some()
            && tables.mark_trace_shown(&resolution.identifier)
        {
            stubs.push(trace_stub(&resolution.identifier, &resolution.params));
        }
    }
    assert_eq!(
        stubs,
        vec!["session.on(\"net.ping\", |call| {\n    let host = call.arg(\"host\");\n    Ok(())\n});"]
    );
}
