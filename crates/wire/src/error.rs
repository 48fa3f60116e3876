//! Error taxonomy shared by every component of the SDK.

use thiserror::Error;

/// A single closed error type returned by every fallible operation in this SDK.
#[derive(Debug, Error)]
pub enum SdkError {
	/// An `UNSPECIFIED` frame was encountered where a direction was required, the
	/// chunker failed to make progress, or a request carried the wrong key cardinality.
	#[error("invalid protocol state")]
	InvalidState,

	/// A response-direction frame arrived while a request was being accumulated.
	#[error("unexpected submit frame while expecting a reply")]
	UnexpectedSubmit,

	/// A request-direction frame arrived while a response was being accumulated.
	#[error("unexpected reply frame while expecting a submit")]
	UnexpectedReply,

	/// A frame arrived for a session whose logical message had already completed.
	#[error("frame received after session {0} already completed")]
	MoreAfterComplete(i32),

	/// A reassembled `key` entry was not valid JSON.
	#[error("invalid JSON in key: {0}")]
	InvalidJsonInKey(#[source] serde_json::Error),

	/// A reassembled `output` entry was not valid JSON.
	#[error("invalid JSON in output: {0}")]
	InvalidJsonInOutput(#[source] serde_json::Error),

	/// A target string did not match `"<publisher>/<plugin>[/<endpoint>]"`.
	#[error("invalid target format: {0:?}")]
	InvalidTargetFormat(String),

	/// The named endpoint is not registered (or not present in the mock table).
	#[error("unknown endpoint: {0:?}")]
	UnknownEndpoint(String),

	/// Writing a frame to the outbound transport failed.
	#[error("failed to send frame")]
	SendFailure,

	/// Failure raised from a plugin's `set_config` hook.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Failures a plugin's configuration hook can raise, mapped to a structured
/// `SetConfigurationResponse` status at the service boundary.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// A configuration value was present but failed validation.
	#[error("invalid value {value:?} for field {field_name:?}: {reason}")]
	InvalidValue {
		/// Name of the offending field.
		field_name: String,
		/// The value that was rejected, rendered as a string.
		value: String,
		/// Human-readable reason the value was rejected.
		reason: String,
	},

	/// A required configuration field was missing.
	#[error("missing required field {field_name:?} of type {field_type:?}")]
	MissingRequired {
		/// Name of the missing field.
		field_name: String,
		/// Expected type of the field, for diagnostics.
		field_type: String,
		/// Example values that would satisfy this field, if known.
		candidates: Vec<String>,
	},

	/// A configuration field was present but not recognized.
	#[error("unrecognized field {field_name:?} with value {field_value:?}")]
	Unrecognized {
		/// Name of the unrecognized field.
		field_name: String,
		/// The value given for the unrecognized field.
		field_value: String,
		/// Similarly-named fields that were probably intended.
		confusables: Vec<String>,
	},

	/// A configuration failure that doesn't fit the other variants.
	#[error("{0}")]
	Unspecified(String),
}
