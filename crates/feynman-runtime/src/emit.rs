//! Drawing API handed to handlers.
//!
//! Every emission becomes one event on the session's channel, in call order.
//! `update` is the exception: it is staged in the coalescer and only the last
//! value per `(id, field)` goes out when a flush happens.

use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};

use feynman_core::{
    Announcement, Coalescer, ContentKind, Draw, ElementId, Event, Group, IdGenerator, Image, Line,
    Oval, Payload, Rectangle, StagedUpdate, Text,
};
use feynman_server::EventSender;
use parking_lot::Mutex;
use serde::Serialize;

use crate::content;

/// Cheap-to-clone handle for emitting drawing events.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<Inner>,
}

struct Inner {
    events: EventSender,
    ids: IdGenerator,
    updates: Mutex<Coalescer>,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("queued", &self.inner.events.queued())
            .field("staged", &self.inner.updates.lock().len())
            .finish()
    }
}

impl Emitter {
    pub fn new(events: EventSender, flush_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                events,
                ids: IdGenerator::new(),
                updates: Mutex::new(Coalescer::new(flush_interval)),
            }),
        }
    }

    pub fn text(&self, text: impl Into<Draw<Text>>) -> ElementId {
        self.draw(text.into())
    }

    pub fn rectangle(&self, rectangle: impl Into<Draw<Rectangle>>) -> ElementId {
        self.draw(rectangle.into())
    }

    pub fn oval(&self, oval: impl Into<Draw<Oval>>) -> ElementId {
        self.draw(oval.into())
    }

    pub fn image(&self, image: impl Into<Draw<Image>>) -> ElementId {
        self.draw(image.into())
    }

    pub fn line(&self, line: impl Into<Draw<Line>>) -> ElementId {
        self.draw(line.into())
    }

    /// Create a group, move `children` into it and make it draggable.
    ///
    /// The group's id is its name unless an explicit id is given.
    pub fn group(&self, group: impl Into<Draw<Group>>, children: &[ElementId]) -> ElementId {
        let Draw { shape, id, group: parent } = group.into();
        let id = ElementId::new(id.unwrap_or_else(|| shape.name.clone()));
        self.send(Event::new(id.as_str(), Payload::Group(shape)).with_group(parent));

        let selector = |id: &str| js_string(&format!("#{id}"));
        for child in children {
            self.script(format!(
                "$({}).append($({}))",
                selector(id.as_str()),
                selector(child.as_str())
            ));
        }
        self.script(format!("makeDraggable($({}))", selector(id.as_str())));
        id
    }

    /// Inject markup. `source` ending in `.html` is read from a file next
    /// to the calling source file.
    #[track_caller]
    pub fn html(&self, source: &str) -> ElementId {
        self.content(ContentKind::Html, source, Location::caller())
    }

    /// Inject a stylesheet, literal or `.css` file.
    #[track_caller]
    pub fn css(&self, source: &str) -> ElementId {
        self.content(ContentKind::Css, source, Location::caller())
    }

    /// Run a script in the viewer, literal or `.js` file.
    #[track_caller]
    pub fn run(&self, source: &str) -> ElementId {
        self.content(ContentKind::Script, source, Location::caller())
    }

    pub fn marker(&self, text: impl Into<String>) -> ElementId {
        let id = ElementId::new(self.inner.ids.next_id());
        self.send(Event::new(id.as_str(), Payload::Marker { text: text.into() }));
        id
    }

    /// Stage a new value for one field of an existing element.
    ///
    /// Sends at most one batch per flush interval; the periodic flush and
    /// session close pick up whatever is still staged.
    pub fn update(&self, id: impl AsRef<str>, name: impl Into<String>, value: impl Serialize) {
        let id = id.as_ref();
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(id, error = %e, "update value not serializable, skipped");
                return;
            }
        };
        let mut updates = self.inner.updates.lock();
        updates.stage(id, name, value);
        if let Some(batch) = updates.take_if_due(Instant::now()) {
            // Sent under the lock so batches keep their order.
            self.send_batch(batch);
        }
    }

    /// Send everything staged, regardless of the interval. Returns the
    /// number of update events sent.
    pub fn flush_updates(&self) -> usize {
        let mut updates = self.inner.updates.lock();
        let batch = updates.take_all(Instant::now());
        self.send_batch(batch)
    }

    /// Send staged updates if the interval has elapsed.
    pub fn flush_updates_if_due(&self) -> usize {
        let mut updates = self.inner.updates.lock();
        match updates.take_if_due(Instant::now()) {
            Some(batch) => self.send_batch(batch),
            None => 0,
        }
    }

    /// Number of events waiting for the viewer.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.events.queued()
    }

    /// Enqueue a prebuilt event as is.
    pub fn send(&self, event: Event) {
        self.inner.events.send(event);
    }

    pub(crate) fn info(&self, announcement: &Announcement) {
        self.send(Event::new(
            self.inner.ids.next_id(),
            Payload::Info {
                item_type: announcement.item_type,
                item_name: announcement.item_name.clone(),
            },
        ));
    }

    pub(crate) fn content(
        &self,
        kind: ContentKind,
        source: &str,
        caller: &Location<'_>,
    ) -> ElementId {
        let text = content::resolve(kind, source, caller.file());
        let id = ElementId::new(self.inner.ids.next_id());
        self.send(Event::new(id.as_str(), kind.payload(text)));
        id
    }

    fn script(&self, text: String) {
        self.send(Event::new(self.inner.ids.next_id(), Payload::Run { text }));
    }

    fn draw<S: Into<Payload>>(&self, draw: Draw<S>) -> ElementId {
        let id = ElementId::new(draw.id.unwrap_or_else(|| self.inner.ids.next_id()));
        self.send(Event::new(id.as_str(), draw.shape.into()).with_group(draw.group));
        id
    }

    fn send_batch(&self, batch: Vec<StagedUpdate>) -> usize {
        let n = batch.len();
        for update in batch {
            self.send(update.into_event());
        }
        if n > 0 {
            tracing::trace!(updates = n, "flushed staged updates");
        }
        n
    }
}

/// JSON string literal, which is also a valid JS string literal.
fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use feynman_core::{EventKind, ItemType, Shape};
    use feynman_server::{EventReceiver, channel};
    use serde_json::json;

    fn emitter(interval: Duration) -> (Emitter, EventReceiver) {
        let (tx, rx) = channel(1024);
        (Emitter::new(tx, interval), rx)
    }

    #[test]
    fn shapes_get_synthetic_ids_unless_given_one() {
        let (emit, mut rx) = emitter(Duration::from_secs(60));
        let a = emit.text(Text::new("hello", 10, 20));
        let b = emit.rectangle(Rectangle::new(0, 0, 100, 50).id("db"));
        let c = emit.text(Text::new("inside", 5, 5).group("db"));
        assert_eq!(a.as_str(), "fy-1");
        assert_eq!(b.as_str(), "db");
        assert_eq!(c.as_str(), "fy-2");

        let events = rx.drain();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind(), EventKind::Text);
        assert_eq!(events[1].kind(), EventKind::Rectangle);
        assert_eq!(events[2].group.as_deref(), Some("db"));
    }

    #[test]
    fn group_reparents_children_then_becomes_draggable() {
        let (emit, mut rx) = emitter(Duration::from_secs(60));
        let label = emit.text(Text::new("Store", 0, 0));
        let frame = emit.rectangle(Rectangle::new(0, 0, 200, 100));
        let g = emit.group(Group::new("db", 100, 40), &[label.clone(), frame.clone()]);
        assert_eq!(g.as_str(), "db");

        let events = rx.drain();
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Text,
                EventKind::Rectangle,
                EventKind::Group,
                EventKind::Run,
                EventKind::Run,
                EventKind::Run
            ]
        );
        let group = serde_json::to_value(&events[2]).unwrap();
        assert_eq!(group["id"], "db");
        assert_eq!(group["left"], json!(100.0));

        let scripts: Vec<_> = events[3..]
            .iter()
            .map(|e| match &e.payload {
                Payload::Run { text } => text.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(scripts[0], r##"$("#db").append($("#fy-1"))"##);
        assert_eq!(scripts[1], r##"$("#db").append($("#fy-2"))"##);
        assert_eq!(scripts[2], r##"makeDraggable($("#db"))"##);
    }

    #[test]
    fn updates_coalesce_until_flushed() {
        let (emit, mut rx) = emitter(Duration::from_secs(60));
        for n in 0..100 {
            emit.update("counter", "text", n);
        }
        assert!(rx.drain().is_empty());

        assert_eq!(emit.flush_updates(), 1);
        let events = rx.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].payload,
            Payload::Update {
                name: "text".into(),
                value: json!(99)
            }
        );
        assert_eq!(emit.flush_updates(), 0);
    }

    #[test]
    fn due_update_goes_out_immediately() {
        let (emit, mut rx) = emitter(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        emit.update("size", "text", "size: 1");
        let events = rx.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "size");
    }

    #[test]
    fn marker_and_info() {
        let (emit, mut rx) = emitter(Duration::from_secs(60));
        emit.marker("checkpoint");
        emit.info(&Announcement {
            item_type: ItemType::Module,
            item_name: "db".into(),
        });
        let events = rx.drain();
        assert_eq!(events[0].payload, Payload::Marker { text: "checkpoint".into() });
        assert_eq!(
            events[1].payload,
            Payload::Info {
                item_type: ItemType::Module,
                item_name: "db".into()
            }
        );
    }

    #[test]
    fn literal_content_is_sent_verbatim() {
        let (emit, mut rx) = emitter(Duration::from_secs(60));
        emit.css(".db { color: red }");
        emit.run("console.log('hi')");
        emit.html("<b>hi</b>");
        let events = rx.drain();
        assert_eq!(events[0].payload, Payload::Css { text: ".db { color: red }".into() });
        assert_eq!(events[1].payload, Payload::Run { text: "console.log('hi')".into() });
        assert_eq!(events[2].payload, Payload::Html { html: "<b>hi</b>".into() });
    }

    #[test]
    fn unknown_content_file_sends_empty_content() {
        let (emit, mut rx) = emitter(Duration::from_secs(60));
        emit.css("no-such-stylesheet.css");
        assert_eq!(rx.drain()[0].payload, Payload::Css { text: String::new() });
    }

    #[test]
    fn sizes_accept_css_strings() {
        let (emit, mut rx) = emitter(Duration::from_secs(60));
        emit.image(Image::new("50%", 0, 32, 32, "db.png"));
        let v = serde_json::to_value(&rx.drain()[0]).unwrap();
        assert_eq!(v["left"], "50%");
        assert_eq!(v["src"], "db.png");
    }
}
