//! Wire types for the plugin streaming protocol.

use serde::{Deserialize, Serialize};

/// Maximum size of a single transport frame, mirroring the host's gRPC message limit.
pub const GRPC_MAX_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// Usable budget for a frame's cumulative string content, leaving headroom for
/// framing overhead added by the transport below this crate.
pub const EFFECTIVE_MAX_SIZE_BYTES: usize = GRPC_MAX_SIZE_BYTES - 1024;

/// A single wire message of the bidirectional streaming RPC.
///
/// `publisher_name`, `plugin_name` and `query_name` are meaningful only on the
/// first frame of a logical message; continuation frames carry empty strings
/// for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
	/// Session id this frame belongs to.
	pub id: i32,
	/// Direction/progress marker for this frame.
	pub state: State,
	/// Publisher of the target plugin, set on the first frame only.
	pub publisher_name: String,
	/// Name of the target plugin, set on the first frame only.
	pub plugin_name: String,
	/// Name of the target query/endpoint, set on the first frame only.
	pub query_name: String,
	/// Ordered chunk of JSON-encoded key entries carried by this frame.
	pub key: Vec<String>,
	/// Ordered chunk of JSON-encoded output entries carried by this frame.
	pub output: Vec<String>,
	/// Ordered chunk of free-form concern strings carried by this frame.
	pub concern: Vec<String>,
	/// True if this frame's last populated entry is a prefix continued in the next frame.
	pub split: bool,
}

/// Progress/direction marker carried on every [`Frame`].
///
/// `SUBMIT_*` is the request direction (core calling into the plugin);
/// `REPLY_*` is the response direction. `*_IN_PROGRESS` means more frames
/// follow for this logical message; `*_COMPLETE` means this is the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum State {
	/// Error/uninitialized marker. Never valid as an input to chunking.
	#[default]
	Unspecified,
	/// Request direction, more frames follow.
	SubmitInProgress,
	/// Request direction, last frame.
	SubmitComplete,
	/// Response direction, more frames follow.
	ReplyInProgress,
	/// Response direction, last frame.
	ReplyComplete,
}

impl State {
	/// The logical direction this state belongs to, if any.
	pub fn direction(self) -> Option<Direction> {
		match self {
			State::Unspecified => None,
			State::SubmitInProgress | State::SubmitComplete => Some(Direction::Request),
			State::ReplyInProgress | State::ReplyComplete => Some(Direction::Response),
		}
	}

	/// Whether this state marks the final frame of a logical message.
	pub fn is_complete(self) -> bool {
		matches!(self, State::SubmitComplete | State::ReplyComplete)
	}

	/// Whether this state marks a request-direction frame.
	pub fn is_submit(self) -> bool {
		matches!(self, State::SubmitInProgress | State::SubmitComplete)
	}

	/// The in-progress/complete pair of states for a given direction.
	pub fn pair_for(direction: Direction) -> (State, State) {
		match direction {
			Direction::Request => (State::SubmitInProgress, State::SubmitComplete),
			Direction::Response => (State::ReplyInProgress, State::ReplyComplete),
		}
	}
}

/// Logical direction of a message: request (core → plugin) or response (plugin → core).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	/// Core initiating a query into the plugin (or the plugin into core, for nested queries).
	Request,
	/// A reply to a previously issued request.
	Response,
}

/// A fully reassembled logical message: one request or response exchanged on a session.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalQuery {
	/// Session id this message belongs to.
	pub id: i32,
	/// Request or response.
	pub direction: Direction,
	/// Publisher of the target plugin.
	pub publisher: String,
	/// Name of the target plugin.
	pub plugin: String,
	/// Name of the target query/endpoint.
	pub query: String,
	/// Decoded key values, in order.
	pub key: Vec<serde_json::Value>,
	/// Decoded output values, in order.
	pub output: Vec<serde_json::Value>,
	/// Free-form advisory strings emitted alongside the output.
	pub concerns: Vec<String>,
}

impl LogicalQuery {
	/// True if the key/output lists were empty before JSON-encoding, i.e. this message
	/// carries no key or no output at all (used for the `rfd9_compat` placeholder fixup).
	pub(crate) fn empty_flags(&self) -> (bool, bool) {
		(self.key.is_empty(), self.output.is_empty())
	}
}
