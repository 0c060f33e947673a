//! Canvas document model and operational transform.
//!
//! This crate has no I/O. It holds the artboard state ([`Artboard`]), the
//! operations clients submit ([`Operation`]) and the transform that rebases
//! a stale operation over the ones applied since ([`transform()`]).

pub mod artboard;
pub mod error;
pub mod object;
pub mod operation;
pub mod transform;

pub use artboard::{AppliedOp, Artboard, Effect, Reparented, DEFAULT_ARTBOARD_NAME};
pub use error::ApplyError;
pub use object::{CanvasObject, Color, Field, FieldValue, Geometry, ObjectId, ObjectKind, Point, Style};
pub use operation::{now_millis, ArtboardId, ClientId, OpId, OpKind, Operation, Step};
pub use transform::{transform, transform_all};
