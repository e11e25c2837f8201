//! Wire events sent to the viewer.
//!
//! Every event serializes to one flat JSON object
//! `{kind, id, when, group?, ...kind-specific fields}`. Field names follow the
//! viewer's DOM/CSS vocabulary (camelCase).

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Capture timestamp: fractional seconds since the Unix epoch.
#[must_use]
pub fn now_secs() -> f64 {
    #[expect(clippy::cast_precision_loss)]
    let micros = Utc::now().timestamp_micros() as f64;
    micros / 1_000_000.0
}

/// A geometry value: plain pixels or any CSS length (`"12vw"`, `"50%"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Length {
    Px(f64),
    Css(String),
}

impl From<f64> for Length {
    fn from(v: f64) -> Self {
        Length::Px(v)
    }
}

impl From<f32> for Length {
    fn from(v: f32) -> Self {
        Length::Px(f64::from(v))
    }
}

impl From<i32> for Length {
    fn from(v: i32) -> Self {
        Length::Px(f64::from(v))
    }
}

impl From<u32> for Length {
    fn from(v: u32) -> Self {
        Length::Px(f64::from(v))
    }
}

impl From<&str> for Length {
    fn from(v: &str) -> Self {
        Length::Css(v.to_owned())
    }
}

impl From<String> for Length {
    fn from(v: String) -> Self {
        Length::Css(v)
    }
}

/// Identifier of a drawn element, as returned by every emitter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ElementId> for String {
    fn from(id: ElementId) -> Self {
        id.0
    }
}

/// Hands out synthetic element ids (`fy-1`, `fy-2`, ...).
///
/// An emission without an explicit id always gets a fresh one, so it creates
/// a new element in the viewer instead of updating an existing one.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("fy-{n}")
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Text {
    pub text: String,
    pub left: Length,
    pub top: Length,
    pub width: Length,
    pub height: Length,
    pub text_align: String,
    pub font: String,
    pub color: String,
}

impl Text {
    pub fn new(text: impl Into<String>, left: impl Into<Length>, top: impl Into<Length>) -> Self {
        Self {
            text: text.into(),
            left: left.into(),
            top: top.into(),
            width: Length::Px(100.0),
            height: Length::Px(20.0),
            text_align: "left".to_owned(),
            font: "Arial".to_owned(),
            color: "black".to_owned(),
        }
    }

    pub fn width(mut self, width: impl Into<Length>) -> Self {
        self.width = width.into();
        self
    }

    pub fn height(mut self, height: impl Into<Length>) -> Self {
        self.height = height.into();
        self
    }

    pub fn align(mut self, align: impl Into<String>) -> Self {
        self.text_align = align.into();
        self
    }

    pub fn font(mut self, font: impl Into<String>) -> Self {
        self.font = font.into();
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

/// Rectangles and ovals share their field set; only the kind differs.
macro_rules! box_shape {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            pub left: Length,
            pub top: Length,
            pub width: Length,
            pub height: Length,
            pub border: String,
            pub background: String,
        }

        impl $name {
            pub fn new(
                left: impl Into<Length>,
                top: impl Into<Length>,
                width: impl Into<Length>,
                height: impl Into<Length>,
            ) -> Self {
                Self {
                    left: left.into(),
                    top: top.into(),
                    width: width.into(),
                    height: height.into(),
                    border: "2px solid black".to_owned(),
                    background: "transparent".to_owned(),
                }
            }

            pub fn border(mut self, border: impl Into<String>) -> Self {
                self.border = border.into();
                self
            }

            pub fn background(mut self, background: impl Into<String>) -> Self {
                self.background = background.into();
                self
            }
        }
    };
}

box_shape!(Rectangle);
box_shape!(Oval);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub left: Length,
    pub top: Length,
    pub width: Length,
    pub height: Length,
    pub src: String,
}

impl Image {
    pub fn new(
        left: impl Into<Length>,
        top: impl Into<Length>,
        width: impl Into<Length>,
        height: impl Into<Length>,
        src: impl Into<String>,
    ) -> Self {
        Self {
            left: left.into(),
            top: top.into(),
            width: width.into(),
            height: height.into(),
            src: src.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub x1: Length,
    pub y1: Length,
    pub x2: Length,
    pub y2: Length,
    pub color: String,
    pub stroke: f64,
}

impl Line {
    pub fn new(
        x1: impl Into<Length>,
        y1: impl Into<Length>,
        x2: impl Into<Length>,
        y2: impl Into<Length>,
    ) -> Self {
        Self {
            x1: x1.into(),
            y1: y1.into(),
            x2: x2.into(),
            y2: y2.into(),
            color: "black".to_owned(),
            stroke: 2.0,
        }
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn stroke(mut self, stroke: f64) -> Self {
        self.stroke = stroke;
        self
    }
}

/// Container other elements get reparented into. Its element id is its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(skip)]
    pub name: String,
    pub left: Length,
    pub top: Length,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Length>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<Length>,
}

impl Group {
    pub fn new(name: impl Into<String>, left: impl Into<Length>, top: impl Into<Length>) -> Self {
        Self {
            name: name.into(),
            left: left.into(),
            top: top.into(),
            width: None,
            height: None,
        }
    }

    pub fn size(mut self, width: impl Into<Length>, height: impl Into<Length>) -> Self {
        self.width = Some(width.into());
        self.height = Some(height.into());
        self
    }
}

/// A shape plus its placement: explicit id and parent group.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw<S> {
    pub shape: S,
    pub id: Option<String>,
    pub group: Option<String>,
}

impl<S> Draw<S> {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

impl<S: Shape> From<S> for Draw<S> {
    fn from(shape: S) -> Self {
        Self {
            shape,
            id: None,
            group: None,
        }
    }
}

/// Anything drawable. Lets a bare shape pick up an id or group inline:
/// `Text::new("size: 0", 120, 70).id("db-size")`.
pub trait Shape: Into<Payload> + Sized {
    fn id(self, id: impl Into<String>) -> Draw<Self> {
        Draw::from(self).id(id)
    }

    fn group(self, group: impl Into<String>) -> Draw<Self> {
        Draw::from(self).group(group)
    }
}

impl Shape for Text {}
impl Shape for Rectangle {}
impl Shape for Oval {}
impl Shape for Image {}
impl Shape for Line {}
impl Shape for Group {}

// ---------------------------------------------------------------------------
// Payload / Event
// ---------------------------------------------------------------------------

/// What an announced name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Module,
    Class,
    Method,
    Function,
}

/// Kind-specific part of an event. The `kind` tag is flattened into the
/// enclosing [`Event`] object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Text(Text),
    Rectangle(Rectangle),
    Oval(Oval),
    Image(Image),
    Line(Line),
    Html {
        html: String,
    },
    Css {
        text: String,
    },
    Run {
        text: String,
    },
    Group(Group),
    Update {
        name: String,
        value: Value,
    },
    Info {
        #[serde(rename = "itemType")]
        item_type: ItemType,
        #[serde(rename = "itemName")]
        item_name: String,
    },
    Marker {
        text: String,
    },
}

impl From<Text> for Payload {
    fn from(v: Text) -> Self {
        Payload::Text(v)
    }
}

impl From<Rectangle> for Payload {
    fn from(v: Rectangle) -> Self {
        Payload::Rectangle(v)
    }
}

impl From<Oval> for Payload {
    fn from(v: Oval) -> Self {
        Payload::Oval(v)
    }
}

impl From<Image> for Payload {
    fn from(v: Image) -> Self {
        Payload::Image(v)
    }
}

impl From<Line> for Payload {
    fn from(v: Line) -> Self {
        Payload::Line(v)
    }
}

impl From<Group> for Payload {
    fn from(v: Group) -> Self {
        Payload::Group(v)
    }
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Text(_) => EventKind::Text,
            Payload::Rectangle(_) => EventKind::Rectangle,
            Payload::Oval(_) => EventKind::Oval,
            Payload::Image(_) => EventKind::Image,
            Payload::Line(_) => EventKind::Line,
            Payload::Html { .. } => EventKind::Html,
            Payload::Css { .. } => EventKind::Css,
            Payload::Run { .. } => EventKind::Run,
            Payload::Group(_) => EventKind::Group,
            Payload::Update { .. } => EventKind::Update,
            Payload::Info { .. } => EventKind::Info,
            Payload::Marker { .. } => EventKind::Marker,
        }
    }
}

/// Discriminant of [`Payload`], for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Text,
    Rectangle,
    Oval,
    Image,
    Line,
    Html,
    Css,
    Run,
    Group,
    Update,
    Info,
    Marker,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::Text,
        EventKind::Rectangle,
        EventKind::Oval,
        EventKind::Image,
        EventKind::Line,
        EventKind::Html,
        EventKind::Css,
        EventKind::Run,
        EventKind::Group,
        EventKind::Update,
        EventKind::Info,
        EventKind::Marker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::Rectangle => "rectangle",
            EventKind::Oval => "oval",
            EventKind::Image => "image",
            EventKind::Line => "line",
            EventKind::Html => "html",
            EventKind::Css => "css",
            EventKind::Run => "run",
            EventKind::Group => "group",
            EventKind::Update => "update",
            EventKind::Info => "info",
            EventKind::Marker => "marker",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {s:?}"))
    }
}

/// Injected presentation content: markup, stylesheet or script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Script,
}

impl ContentKind {
    /// File extension that marks the argument as a filename instead of
    /// literal content.
    pub fn extension(self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Css => "css",
            ContentKind::Script => "js",
        }
    }

    pub fn payload(self, content: String) -> Payload {
        match self {
            ContentKind::Html => Payload::Html { html: content },
            ContentKind::Css => Payload::Css { text: content },
            ContentKind::Script => Payload::Run { text: content },
        }
    }
}

/// One immutable wire event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub when: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            when: now_secs(),
            group: None,
            payload,
        }
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
