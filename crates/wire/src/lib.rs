//! Frame chunking/reassembly codec and wire types for the plugin streaming protocol.
//!
//! This crate has no transport of its own: it turns a [`LogicalQuery`] into a
//! sequence of [`Frame`]s ([`chunk`]) and turns a sequence of `Frame`s back into a
//! `LogicalQuery` ([`Synthesizer`]). Sending and receiving those frames is the
//! caller's job.

mod chunk;
mod error;
mod options;
mod synth;
mod types;

pub use chunk::{chunk, chunk_with_size};
pub use error::{ConfigError, SdkError};
pub use options::WireOptions;
pub use synth::Synthesizer;
pub use types::{Direction, Frame, LogicalQuery, State, EFFECTIVE_MAX_SIZE_BYTES, GRPC_MAX_SIZE_BYTES};
