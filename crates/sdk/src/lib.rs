//! Plugin-side SDK: endpoint registry, session engine, and stream multiplexer for the
//! core/plugin bidirectional streaming RPC protocol.
//!
//! The wire-level codec (framing, chunking, reassembly) lives in `duplex-wire`; this
//! crate builds the authoring surface on top of it: declare endpoints via
//! [`EndpointRegistryBuilder`], implement [`Plugin`] for the configuration/introspection
//! hooks, and drive the stream with a [`SessionMultiplexer`].

mod engine;
mod multiplexer;
mod plugin;
mod registry;
mod service;
mod session;
mod target;

pub use duplex_wire::{ConfigError, SdkError, WireOptions};
pub use engine::{Engine, MockTable};
pub use multiplexer::{FrameSink, SessionMultiplexer, OUTBOUND_QUEUE_CAPACITY};
pub use plugin::Plugin;
pub use registry::{Endpoint, EndpointRegistry, EndpointRegistryBuilder};
pub use service::{ConfigStatus, PluginRequest, PluginResponse, PluginService, QuerySchema};
pub use session::SESSION_QUEUE_CAPACITY;
pub use target::{parse_target, Target};
