//! P4Runtime control-channel vocabulary.
//!
//! This crate defines what the controller says to a switch, not how the
//! bytes travel:
//!
//! - [`schema`]: the P4Info model and [`SchemaResolver`], which turns
//!   symbolic [`EntryRequest`]s into validated [`TableEntry`]s and back
//! - [`value`]: canonical byte-string encoding of field values
//! - [`session`]: the [`DeviceSession`] capability implemented by transports
//! - [`MemorySession`] and [`RecordingSession`]: an in-process device and a
//!   request-dumping decorator

pub mod entry;
pub mod error;
pub mod memory;
pub mod recording;
pub mod schema;
pub mod session;
pub mod value;

pub use entry::{
    ActionCall, ActionParam, DecodedEntry, DecodedMatch, DecodedParam, EntryKey, EntryRequest,
    FieldMatch, MatchField, MatchSpec, MatchValue, ParamValue, TableEntry,
};
pub use error::{ChannelError, ChannelResult, StatusCode};
pub use memory::MemorySession;
pub use recording::RecordingSession;
pub use schema::{
    ActionInfo, CounterInfo, MatchKind, P4Info, P4InfoResolver, SchemaError, SchemaResolver,
    TableInfo,
};
pub use session::{CounterData, CounterEntry, DeviceSession};
pub use value::FieldValue;
