//! Canvas objects: the nodes of an artboard's scene graph.
//!
//! Every object carries the same geometry/style capability set regardless
//! of its [`ObjectKind`]; the kind only tells a renderer how to interpret it.
//! Grouping is expressed through `parent` links, which must form a tree.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a canvas object. Assigned at creation, never reused.
pub type ObjectId = Uuid;

/// 2D point in artboard coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// RGBA8 color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
}

/// The shape family of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Rectangle,
    Ellipse,
    Path,
    Text,
    Group,
}

/// Position, size, rotation and (for paths) the point list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation in degrees, clockwise.
    pub rotation: f64,
    pub path: Vec<Point>,
}

impl Geometry {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            rotation: 0.0,
            path: Vec::new(),
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.rotation.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
            && self.path.iter().all(Point::is_finite)
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// Fill/stroke styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub fill: Option<Color>,
    pub stroke: Option<Color>,
    pub stroke_width: f64,
    pub opacity: f64,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            fill: Some(Color::WHITE),
            stroke: Some(Color::BLACK),
            stroke_width: 1.0,
            opacity: 1.0,
        }
    }
}

impl Style {
    pub(crate) fn is_valid(&self) -> bool {
        self.stroke_width.is_finite()
            && self.stroke_width >= 0.0
            && (0.0..=1.0).contains(&self.opacity)
    }
}

/// A single node on an artboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub name: String,
    pub geometry: Geometry,
    pub style: Style,
    /// Text content (only meaningful for [`ObjectKind::Text`]).
    pub text: Option<String>,
    /// Enclosing group, if any.
    pub parent: Option<ObjectId>,
    pub visible: bool,
    /// Locked layers are shown but not editable in the layer panel.
    pub locked: bool,
}

impl CanvasObject {
    /// Create an object of `kind` with a fresh id and default style.
    pub fn new(kind: ObjectKind, geometry: Geometry) -> Self {
        Self::with_id(Uuid::new_v4(), kind, geometry)
    }

    /// Create with an explicit id (clients mint ids before submitting inserts).
    pub fn with_id(id: ObjectId, kind: ObjectKind, geometry: Geometry) -> Self {
        Self {
            id,
            kind,
            name: default_name(kind).to_string(),
            geometry,
            style: Style::default(),
            text: None,
            parent: None,
            visible: true,
            locked: false,
        }
    }

    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(ObjectKind::Rectangle, Geometry::new(x, y, width, height))
    }

    pub fn ellipse(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(ObjectKind::Ellipse, Geometry::new(x, y, width, height))
    }

    pub fn text(x: f64, y: f64, content: impl Into<String>) -> Self {
        let mut obj = Self::new(ObjectKind::Text, Geometry::new(x, y, 0.0, 0.0));
        obj.text = Some(content.into());
        obj
    }

    pub fn path(points: Vec<Point>) -> Self {
        let mut geometry = Geometry::default();
        geometry.path = points;
        Self::new(ObjectKind::Path, geometry)
    }

    pub fn group() -> Self {
        Self::new(ObjectKind::Group, Geometry::default())
    }

    /// Builder: place under `parent`.
    pub fn in_group(mut self, parent: ObjectId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Whether every numeric attribute is finite and in range.
    pub fn is_valid(&self) -> bool {
        !self.id.is_nil()
            && self.parent != Some(self.id)
            && self.geometry.is_valid()
            && self.style.is_valid()
    }
}

fn default_name(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Rectangle => "Rectangle",
        ObjectKind::Ellipse => "Ellipse",
        ObjectKind::Path => "Path",
        ObjectKind::Text => "Text",
        ObjectKind::Group => "Group",
    }
}

/// An updatable attribute of a [`CanvasObject`].
///
/// Field paths are a closed set so that `(target, field)` conflicts are
/// decided by plain equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    X,
    Y,
    Width,
    Height,
    Rotation,
    Path,
    Fill,
    Stroke,
    StrokeWidth,
    Opacity,
    Text,
    Name,
    Parent,
    Visible,
    Locked,
}

/// New value for a [`Field`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(f64),
    Points(Vec<Point>),
    Color(Option<Color>),
    Text(Option<String>),
    Object(Option<ObjectId>),
    Flag(bool),
}

impl Field {
    /// Whether `value` has the shape (and range) this field accepts.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (Field::X | Field::Y | Field::Rotation, FieldValue::Number(n)) => n.is_finite(),
            (Field::Width | Field::Height | Field::StrokeWidth, FieldValue::Number(n)) => {
                n.is_finite() && *n >= 0.0
            }
            (Field::Opacity, FieldValue::Number(n)) => (0.0..=1.0).contains(n),
            (Field::Path, FieldValue::Points(points)) => points.iter().all(Point::is_finite),
            (Field::Fill | Field::Stroke, FieldValue::Color(_)) => true,
            (Field::Text, FieldValue::Text(_)) => true,
            (Field::Name, FieldValue::Text(Some(_))) => true,
            (Field::Parent, FieldValue::Object(_)) => true,
            (Field::Visible | Field::Locked, FieldValue::Flag(_)) => true,
            _ => false,
        }
    }

    /// Read the current value of this field from `object`.
    pub fn read(&self, object: &CanvasObject) -> FieldValue {
        match self {
            Field::X => FieldValue::Number(object.geometry.x),
            Field::Y => FieldValue::Number(object.geometry.y),
            Field::Width => FieldValue::Number(object.geometry.width),
            Field::Height => FieldValue::Number(object.geometry.height),
            Field::Rotation => FieldValue::Number(object.geometry.rotation),
            Field::Path => FieldValue::Points(object.geometry.path.clone()),
            Field::Fill => FieldValue::Color(object.style.fill),
            Field::Stroke => FieldValue::Color(object.style.stroke),
            Field::StrokeWidth => FieldValue::Number(object.style.stroke_width),
            Field::Opacity => FieldValue::Number(object.style.opacity),
            Field::Text => FieldValue::Text(object.text.clone()),
            Field::Name => FieldValue::Text(Some(object.name.clone())),
            Field::Parent => FieldValue::Object(object.parent),
            Field::Visible => FieldValue::Flag(object.visible),
            Field::Locked => FieldValue::Flag(object.locked),
        }
    }

    /// Write `value` into `object`. Returns `false` on a shape mismatch.
    ///
    /// Parent writes are structural; callers must validate the tree first.
    pub(crate) fn write(&self, object: &mut CanvasObject, value: FieldValue) -> bool {
        if !self.accepts(&value) {
            return false;
        }
        match (self, value) {
            (Field::X, FieldValue::Number(n)) => object.geometry.x = n,
            (Field::Y, FieldValue::Number(n)) => object.geometry.y = n,
            (Field::Width, FieldValue::Number(n)) => object.geometry.width = n,
            (Field::Height, FieldValue::Number(n)) => object.geometry.height = n,
            (Field::Rotation, FieldValue::Number(n)) => object.geometry.rotation = n,
            (Field::Path, FieldValue::Points(p)) => object.geometry.path = p,
            (Field::Fill, FieldValue::Color(c)) => object.style.fill = c,
            (Field::Stroke, FieldValue::Color(c)) => object.style.stroke = c,
            (Field::StrokeWidth, FieldValue::Number(n)) => object.style.stroke_width = n,
            (Field::Opacity, FieldValue::Number(n)) => object.style.opacity = n,
            (Field::Text, FieldValue::Text(t)) => object.text = t,
            (Field::Name, FieldValue::Text(Some(t))) => object.name = t,
            (Field::Parent, FieldValue::Object(p)) => object.parent = p,
            (Field::Visible, FieldValue::Flag(v)) => object.visible = v,
            (Field::Locked, FieldValue::Flag(l)) => object.locked = l,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_defaults() {
        let rect = CanvasObject::rectangle(10.0, 20.0, 100.0, 50.0);
        assert_eq!(rect.kind, ObjectKind::Rectangle);
        assert_eq!(rect.name, "Rectangle");
        assert_eq!(rect.geometry.width, 100.0);
        assert!(rect.parent.is_none());
        assert!(rect.visible && !rect.locked);
        assert!(rect.is_valid());
    }

    #[test]
    fn test_invalid_geometry() {
        let mut rect = CanvasObject::rectangle(0.0, 0.0, 10.0, 10.0);
        rect.geometry.width = -1.0;
        assert!(!rect.is_valid());

        let mut rect = CanvasObject::rectangle(0.0, 0.0, 10.0, 10.0);
        rect.geometry.x = f64::NAN;
        assert!(!rect.is_valid());
    }

    #[test]
    fn test_self_parent_invalid() {
        let mut group = CanvasObject::group();
        group.parent = Some(group.id);
        assert!(!group.is_valid());
    }

    #[test]
    fn test_field_accepts_shapes() {
        assert!(Field::X.accepts(&FieldValue::Number(-5.0)));
        assert!(!Field::Width.accepts(&FieldValue::Number(-5.0)));
        assert!(!Field::Opacity.accepts(&FieldValue::Number(1.5)));
        assert!(!Field::X.accepts(&FieldValue::Number(f64::INFINITY)));
        assert!(Field::Fill.accepts(&FieldValue::Color(None)));
        assert!(!Field::Fill.accepts(&FieldValue::Number(1.0)));
        assert!(!Field::Name.accepts(&FieldValue::Text(None)));
        assert!(Field::Parent.accepts(&FieldValue::Object(None)));
        assert!(Field::Locked.accepts(&FieldValue::Flag(true)));
        assert!(!Field::Visible.accepts(&FieldValue::Number(0.0)));
    }

    #[test]
    fn test_field_read_write() {
        let mut obj = CanvasObject::ellipse(0.0, 0.0, 5.0, 5.0);
        assert!(Field::X.write(&mut obj, FieldValue::Number(42.0)));
        assert_eq!(Field::X.read(&obj), FieldValue::Number(42.0));

        assert!(Field::Fill.write(&mut obj, FieldValue::Color(Some(Color::RED))));
        assert_eq!(obj.style.fill, Some(Color::RED));

        assert!(!Field::Fill.write(&mut obj, FieldValue::Text(None)));
        assert_eq!(obj.style.fill, Some(Color::RED));

        assert!(Field::Visible.write(&mut obj, FieldValue::Flag(false)));
        assert!(Field::Locked.write(&mut obj, FieldValue::Flag(true)));
        assert_eq!(Field::Visible.read(&obj), FieldValue::Flag(false));
        assert_eq!(Field::Locked.read(&obj), FieldValue::Flag(true));
    }
}
