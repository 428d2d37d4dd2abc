//! Object list replication for netobj.
//!
//! This is the main codec crate that ties together bitstream, wire, and schema
//! to keep lists of typed objects in sync between a transmitter and any number
//! of receivers.
//!
//! # Features
//!
//! - Named object lists with monotonic, never reused handles
//! - Per-client views: every client gets its own diff against what it holds
//! - Create, update, and destroy blocks, repeated until acknowledged
//! - Receiver mirrors with created/updated/destroyed events
//! - Server and client endpoints over a pluggable [`Transport`]
//!
//! # Design Principles
//!
//! - **Per-client state** - No client's acknowledgements affect another's diffs.
//! - **All or nothing** - A frame that fails to decode changes no mirror.
//! - **Bounded** - Lists, objects, blocks, and unacknowledged frames are limited.
//! - **Deterministic** - Objects are encoded in handle order.

mod client;
mod config;
mod endpoint;
mod error;
mod limits;
mod object;
mod receiver;
mod transmitter;
mod transport;
mod types;

pub use config::{SnapshotPolicy, TransmitConfig};
pub use endpoint::{
    ClientEndpoint, DisconnectReason, EndpointError, EndpointResult, ServerEndpoint,
};
pub use error::{CodecError, CodecResult, LimitKind};
pub use limits::CodecLimits;
pub use object::{NetworkObject, ObjectList};
pub use receiver::{AppliedFrame, MirrorList, MirrorObject, ReceiveEvent, Received, Receiver};
pub use transmitter::{EncodedFrame, EncodedPass, FrameStats, Transmitter};
pub use transport::{LoopbackNetwork, LoopbackTransport, Transport, SERVER};
pub use types::{ClientId, ListId, ObjectHandle, Sequence};
pub use wire::Limits as WireLimits;
