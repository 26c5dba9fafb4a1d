//! Request/response protocol and push events
//!
//! - `request`: operation catalog and the request envelope
//! - `response`: status codes and the response envelope
//! - `event`: push notification catalog
//! - `payload`: key-value payload shared by all envelopes
//! - `wire`: frame type and the length-prefixed codec

pub mod event;
pub mod payload;
pub mod request;
pub mod response;
pub mod wire;

pub use event::{Event, EventKind};
pub use payload::Payload;
pub use request::{OperationKind, Request};
pub use response::{Response, StatusCode};
pub use wire::{Frame, WireFormat, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
