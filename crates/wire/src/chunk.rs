//! Chunking: split a reassembled [`LogicalQuery`] into a sequence of wire [`Frame`]s.

use std::collections::VecDeque;

use crate::error::SdkError;
use crate::options::WireOptions;
use crate::types::{Frame, LogicalQuery, State};

/// Split `msg` into frames of at most [`crate::types::EFFECTIVE_MAX_SIZE_BYTES`] bytes.
pub fn chunk(msg: &LogicalQuery, opts: WireOptions) -> Result<Vec<Frame>, SdkError> {
	chunk_with_size(msg, crate::types::EFFECTIVE_MAX_SIZE_BYTES, opts)
}

/// Split `msg` into frames of at most `max_est_size` cumulative string bytes each.
///
/// `msg.direction` statically rules out the `UNSPECIFIED` state that the wire-level
/// [`State`] enum allows; there is nothing to validate here that the type system
/// doesn't already guarantee.
pub fn chunk_with_size(
	msg: &LogicalQuery,
	max_est_size: usize,
	opts: WireOptions,
) -> Result<Vec<Frame>, SdkError> {
	let (in_progress_state, completion_state) = State::pair_for(msg.direction);
	let (key_was_empty, output_was_empty) = msg.empty_flags();

	let mut key: VecDeque<String> = msg.key.iter().map(encode_json_entry).collect();
	let mut output: VecDeque<String> = msg.output.iter().map(encode_json_entry).collect();
	let mut concern: VecDeque<String> = msg.concerns.iter().cloned().collect();

	let mut frames: Vec<Frame> = Vec::new();

	loop {
		let sources_had_data = !key.is_empty() || !output.is_empty() || !concern.is_empty();

		let mut frame = Frame {
			id: msg.id,
			state: in_progress_state,
			publisher_name: if frames.is_empty() {
				msg.publisher.clone()
			} else {
				String::new()
			},
			plugin_name: if frames.is_empty() {
				msg.plugin.clone()
			} else {
				String::new()
			},
			query_name: if frames.is_empty() {
				msg.query.clone()
			} else {
				String::new()
			},
			key: Vec::new(),
			output: Vec::new(),
			concern: Vec::new(),
			split: false,
		};

		let mut remaining = max_est_size;
		let mut made_progress = false;
		let mut split_occurred = false;

		if !split_occurred {
			split_occurred = drain_field(&mut key, &mut frame.key, &mut remaining, &mut made_progress);
		}
		if !split_occurred {
			split_occurred =
				drain_field(&mut output, &mut frame.output, &mut remaining, &mut made_progress);
		}
		if !split_occurred {
			split_occurred =
				drain_field(&mut concern, &mut frame.concern, &mut remaining, &mut made_progress);
		}

		frame.split = split_occurred;

		if sources_had_data && !made_progress {
			return Err(SdkError::InvalidState);
		}

		frames.push(frame);

		if key.is_empty() && output.is_empty() && concern.is_empty() {
			break;
		}
	}

	if let Some(last) = frames.last_mut() {
		last.state = completion_state;
	}

	if opts.rfd9_compat {
		apply_rfd9_compat_fixup(&mut frames, key_was_empty, output_was_empty);
	}

	Ok(frames)
}

/// Drain whole strings from `source` into `sink` while they fit in `remaining`, splitting
/// the first string that doesn't. Returns true iff a genuine (non-empty) split occurred,
/// in which case the caller must stop draining subsequent fields into this frame.
fn drain_field(
	source: &mut VecDeque<String>,
	sink: &mut Vec<String>,
	remaining: &mut usize,
	made_progress: &mut bool,
) -> bool {
	loop {
		let Some(front_len) = source.front().map(String::len) else {
			return false;
		};

		if front_len <= *remaining {
			let whole = source.pop_front().expect("front checked above");
			*remaining -= whole.len();
			*made_progress = true;
			sink.push(whole);
			continue;
		}

		let front = source.front().expect("front checked above");
		let (prefix, suffix) = split_at_byte_boundary(front, *remaining);
		let took = prefix.len();
		*remaining -= took;
		sink.push(prefix);

		if took > 0 {
			*made_progress = true;
		}
		*source.front_mut().expect("front checked above") = suffix;
		return took > 0;
	}
}

/// Split `s` at the longest whole-code-point prefix whose UTF-8 length is `<= max_bytes`.
fn split_at_byte_boundary(s: &str, max_bytes: usize) -> (String, String) {
	if s.len() <= max_bytes {
		return (s.to_string(), String::new());
	}
	let mut boundary = 0;
	for (idx, ch) in s.char_indices() {
		let next = idx + ch.len_utf8();
		if next > max_bytes {
			break;
		}
		boundary = next;
	}
	(s[..boundary].to_string(), s[boundary..].to_string())
}

/// Legacy compatibility fixup: an empty `key`/`output` list still needs one entry so the
/// concatenation of all frames' `key` (and separately `output`) remains a valid JSON document.
fn apply_rfd9_compat_fixup(frames: &mut [Frame], key_was_empty: bool, output_was_empty: bool) {
	for frame in frames.iter_mut() {
		if frame.key.is_empty() {
			frame.key.push(String::new());
		}
		if frame.output.is_empty() {
			frame.output.push(String::new());
		}
	}
	if key_was_empty
		&& let Some(first) = frames.first_mut()
	{
		first.key[0] = "null".to_string();
	}
	if output_was_empty
		&& let Some(first) = frames.first_mut()
	{
		first.output[0] = "null".to_string();
	}
}

/// JSON-encode a single decoded value into the string form a frame carries on the wire.
fn encode_json_entry(value: &serde_json::Value) -> String {
	serde_json::to_string(value).expect("serde_json::Value always serializes")
}
