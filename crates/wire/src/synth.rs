//! Reassembly: accumulate a stream of wire [`Frame`]s into a [`LogicalQuery`].
//!
//! [`Synthesizer`] is fed one frame at a time via [`Synthesizer::push`] and is
//! genuinely incremental — it never assumes the whole frame sequence is
//! available up front, since frames for a session arrive interleaved with
//! frames for every other active session on the same stream.

use crate::error::SdkError;
use crate::options::WireOptions;
use crate::types::{Direction, Frame, LogicalQuery, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VecField {
	Key,
	Output,
	Concern,
}

struct Accumulating {
	id: i32,
	direction: Direction,
	publisher: String,
	plugin: String,
	query: String,
	key: Vec<String>,
	output: Vec<String>,
	concern: Vec<String>,
	last_field: VecField,
	split: bool,
}

enum SynthState {
	Empty,
	Accumulating(Accumulating),
	Completed(i32),
}

/// Incremental reassembler for one logical message.
///
/// Construct one per logical message (a session creates a fresh `Synthesizer`
/// each time it starts receiving a new request or a nested-query response).
pub struct Synthesizer {
	opts: WireOptions,
	state: SynthState,
}

impl Synthesizer {
	/// Create an empty synthesizer with the given wire options.
	pub fn new(opts: WireOptions) -> Self {
		Synthesizer {
			opts,
			state: SynthState::Empty,
		}
	}

	/// Feed one frame. Returns `Ok(Some(_))` once the logical message is complete,
	/// `Ok(None)` if more frames are still expected, or an error on a malformed
	/// sequence (direction cross-over, `UNSPECIFIED` state, or a frame arriving
	/// after completion).
	pub fn push(&mut self, frame: Frame) -> Result<Option<LogicalQuery>, SdkError> {
		match std::mem::replace(&mut self.state, SynthState::Empty) {
			SynthState::Completed(id) => {
				self.state = SynthState::Completed(id);
				Err(SdkError::MoreAfterComplete(id))
			}
			SynthState::Empty => self.begin(frame),
			SynthState::Accumulating(acc) => self.continue_with(acc, frame),
		}
	}

	fn begin(&mut self, frame: Frame) -> Result<Option<LogicalQuery>, SdkError> {
		let direction = frame.state.direction().ok_or(SdkError::InvalidState)?;
		let complete = frame.state.is_complete();
		let last_field = last_field_with_content(&frame, self.opts.rfd9_compat);
		let acc = Accumulating {
			id: frame.id,
			direction,
			publisher: frame.publisher_name,
			plugin: frame.plugin_name,
			query: frame.query_name,
			key: frame.key,
			output: frame.output,
			concern: frame.concern,
			last_field,
			split: frame.split,
		};

		if complete {
			let id = acc.id;
			let result = finalize(acc, self.opts)?;
			self.state = SynthState::Completed(id);
			Ok(Some(result))
		} else {
			self.state = SynthState::Accumulating(acc);
			Ok(None)
		}
	}

	fn continue_with(
		&mut self,
		mut acc: Accumulating,
		mut frame: Frame,
	) -> Result<Option<LogicalQuery>, SdkError> {
		let frame_direction = frame.state.direction().ok_or(SdkError::InvalidState)?;
		if frame_direction != acc.direction {
			let err = match acc.direction {
				Direction::Request => SdkError::UnexpectedReply,
				Direction::Response => SdkError::UnexpectedSubmit,
			};
			self.state = SynthState::Accumulating(acc);
			return Err(err);
		}

		let this_last_field = last_field_with_content(&frame, self.opts.rfd9_compat);
		let complete = frame.state.is_complete();

		if acc.split {
			match acc.last_field {
				VecField::Key => continue_first_entry(&mut acc.key, &mut frame.key),
				VecField::Output => continue_first_entry(&mut acc.output, &mut frame.output),
				VecField::Concern => continue_first_entry(&mut acc.concern, &mut frame.concern),
			}
		}
		acc.key.extend(frame.key);
		acc.output.extend(frame.output);
		acc.concern.extend(frame.concern);
		acc.last_field = this_last_field;
		acc.split = frame.split;

		if complete {
			let id = acc.id;
			let result = finalize(acc, self.opts)?;
			self.state = SynthState::Completed(id);
			Ok(Some(result))
		} else {
			self.state = SynthState::Accumulating(acc);
			Ok(None)
		}
	}
}

/// Append the new frame's continuation entry onto the accumulator's last entry
/// (string concatenation), consuming it from the frame's own list.
fn continue_first_entry(acc_field: &mut [String], frame_field: &mut Vec<String>) {
	if frame_field.is_empty() {
		return;
	}
	let continuation = frame_field.remove(0);
	if let Some(last) = acc_field.last_mut() {
		last.push_str(&continuation);
	}
}

/// Which of concern/output/key was the last one to carry real content on this frame.
fn last_field_with_content(frame: &Frame, rfd9_compat: bool) -> VecField {
	if !frame.concern.is_empty() {
		return VecField::Concern;
	}
	let output_has_content = if rfd9_compat {
		match frame.output.as_slice() {
			[only] => only != "" && only != "null",
			entries => !entries.is_empty(),
		}
	} else {
		!frame.output.is_empty()
	};
	if output_has_content {
		VecField::Output
	} else {
		VecField::Key
	}
}

fn finalize(acc: Accumulating, opts: WireOptions) -> Result<LogicalQuery, SdkError> {
	let key_entries = strip_placeholders(acc.key, opts.rfd9_compat);
	let output_entries = strip_placeholders(acc.output, opts.rfd9_compat);

	let key = decode_entries(&key_entries, opts, JsonField::Key)?;
	let output = decode_entries(&output_entries, opts, JsonField::Output)?;

	Ok(LogicalQuery {
		id: acc.id,
		direction: acc.direction,
		publisher: acc.publisher,
		plugin: acc.plugin,
		query: acc.query,
		key,
		output,
		concerns: acc.concern,
	})
}

/// Remove the compatibility fixup's raw (unencoded, zero-length) placeholder entries.
/// A genuinely JSON-encoded entry is never zero-length, so this cannot drop real content.
fn strip_placeholders(entries: Vec<String>, rfd9_compat: bool) -> Vec<String> {
	if rfd9_compat {
		entries.into_iter().filter(|s| !s.is_empty()).collect()
	} else {
		entries
	}
}

#[derive(Clone, Copy)]
enum JsonField {
	Key,
	Output,
}

fn decode_entries(
	entries: &[String],
	opts: WireOptions,
	field: JsonField,
) -> Result<Vec<serde_json::Value>, SdkError> {
	let mut decoded = Vec::with_capacity(entries.len());
	for (idx, entry) in entries.iter().enumerate() {
		match serde_json::from_str::<serde_json::Value>(entry) {
			Ok(value) => decoded.push(value),
			Err(first_err) => {
				if !opts.rfd9_compat {
					return Err(wrap_json_err(field, first_err));
				}
				// rfd9_compat fallback: concatenate all remaining entries and parse once.
				let joined = entries[idx..].concat();
				return match serde_json::from_str::<serde_json::Value>(&joined) {
					Ok(value) => {
						decoded.push(value);
						Ok(decoded)
					}
					Err(_) => Err(wrap_json_err(field, first_err)),
				};
			}
		}
	}
	Ok(decoded)
}

fn wrap_json_err(field: JsonField, err: serde_json::Error) -> SdkError {
	match field {
		JsonField::Key => SdkError::InvalidJsonInKey(err),
		JsonField::Output => SdkError::InvalidJsonInOutput(err),
	}
}
