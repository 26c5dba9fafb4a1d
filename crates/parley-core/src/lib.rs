//! Parley Core
//!
//! Protocol types, domain entities and in-process event fan-out for the Parley
//! chat client. Nothing in this crate touches a socket or a database; the
//! session and the local history live in `parley-client`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod bus;
pub mod config;
pub mod entities;
pub mod errors;
pub mod factory;
pub mod protocol;
pub mod speech;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use bus::{
    ChannelSubscriber, DeliveryReport, EventBus, FnSubscriber, Subscriber, SubscriberError,
};
pub use config::{HistoryConfig, ParleyConfig, ServerConfig, SessionConfig};
pub use entities::{
    AudioFile, AudioFormat, Channel, Conversation, Group, Invitation, JoinRequest, MemberSet,
    Message, PayloadRecord, ResolutionStatus, User,
};
pub use errors::{ParleyError, ParleyResult, ProtocolError, Result, TransportError};
pub use factory::{LoginGrant, RequestFactory, ResponseReader};
pub use protocol::{
    Event, EventKind, Frame, OperationKind, Payload, Request, Response, StatusCode, WireFormat,
};
pub use speech::{SpeechToText, Transcription};
pub use types::{CorrelationId, FixedTimeSource, SystemTimeSource, TimeSource, Timestamp};
