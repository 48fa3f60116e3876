//! The handle an endpoint body uses to record concerns and issue nested queries.

use std::sync::Arc;

use duplex_wire::{chunk, Direction, Frame, LogicalQuery, SdkError, Synthesizer, WireOptions};
use tokio::sync::mpsc;

use crate::target::parse_target;

/// A preconfigured `(target, key) -> output` table used in place of the transport
/// during tests. Looked up by value-equality, not hashing, since `serde_json::Value`
/// has no `Hash` impl and the source's own semantics are deep-equality.
#[derive(Debug, Clone, Default)]
pub struct MockTable(Vec<((String, serde_json::Value), serde_json::Value)>);

impl MockTable {
	/// An empty mock table.
	pub fn new() -> Self {
		MockTable::default()
	}

	/// Register the output for a single `(target, key)` pair.
	pub fn insert(&mut self, target: impl Into<String>, key: serde_json::Value, output: serde_json::Value) {
		self.0.push(((target.into(), key), output));
	}

	fn lookup_one(&self, target: &str, key: &serde_json::Value) -> Result<serde_json::Value, SdkError> {
		self.0
			.iter()
			.find(|((t, k), _)| t == target && k == key)
			.map(|(_, output)| output.clone())
			.ok_or_else(|| SdkError::UnknownEndpoint(target.to_string()))
	}

	fn lookup_batch(&self, target: &str, keys: &[serde_json::Value]) -> Result<Vec<serde_json::Value>, SdkError> {
		keys.iter().map(|key| self.lookup_one(target, key)).collect()
	}
}

/// Per-session handle passed to an endpoint body: records advisory concerns and
/// drives nested `query`/`batch_query` calls back into core over the same session.
pub struct Engine {
	session_id: i32,
	inbound: mpsc::Receiver<Frame>,
	outbound: mpsc::Sender<Option<Frame>>,
	opts: WireOptions,
	mock: Option<Arc<MockTable>>,
	concerns: Vec<String>,
}

impl Engine {
	pub(crate) fn new(
		session_id: i32,
		inbound: mpsc::Receiver<Frame>,
		outbound: mpsc::Sender<Option<Frame>>,
		opts: WireOptions,
		mock: Option<Arc<MockTable>>,
	) -> Self {
		Engine {
			session_id,
			inbound,
			outbound,
			opts,
			mock,
			concerns: Vec::new(),
		}
	}

	/// This session's id, as carried on every frame it exchanges.
	pub fn session_id(&self) -> i32 {
		self.session_id
	}

	/// Record an advisory finding to surface alongside the endpoint's output.
	pub fn record_concern(&mut self, concern: impl Into<String>) {
		self.concerns.push(concern.into());
	}

	pub(crate) fn take_concerns(&mut self) -> Vec<String> {
		std::mem::take(&mut self.concerns)
	}

	/// Reassemble the next inbound logical message on this session.
	pub(crate) async fn recv_message(&mut self) -> Result<LogicalQuery, SdkError> {
		let mut synth = Synthesizer::new(self.opts);
		loop {
			let frame = self.inbound.recv().await.ok_or(SdkError::SendFailure)?;
			if let Some(msg) = synth.push(frame)? {
				return Ok(msg);
			}
		}
	}

	pub(crate) async fn send_frames(&self, frames: Vec<Frame>) -> Result<(), SdkError> {
		for frame in frames {
			self.outbound.send(Some(frame)).await.map_err(|_| SdkError::SendFailure)?;
		}
		Ok(())
	}

	/// Issue a single nested query to `target` with `key`, returning its decoded output.
	pub async fn query(&mut self, target: &str, key: serde_json::Value) -> Result<serde_json::Value, SdkError> {
		let mut outputs = self.batch_query(target, vec![key]).await?;
		Ok(outputs.remove(0))
	}

	/// Issue a batch nested query to `target` with `keys`, returning one output per key, in order.
	pub async fn batch_query(&mut self, target: &str, keys: Vec<serde_json::Value>) -> Result<Vec<serde_json::Value>, SdkError> {
		if let Some(mock) = &self.mock {
			return mock.lookup_batch(target, &keys);
		}

		let parsed = parse_target(target)?;
		let request = LogicalQuery {
			id: self.session_id,
			direction: Direction::Request,
			publisher: parsed.publisher,
			plugin: parsed.plugin,
			query: parsed.endpoint,
			key: keys,
			output: Vec::new(),
			concerns: Vec::new(),
		};
		let frames = chunk(&request, self.opts)?;
		self.send_frames(frames).await?;

		let response = self.recv_message().await?;
		Ok(response.output)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tokio::sync::mpsc;

	use super::*;

	#[test]
	fn mock_table_batch_lookup_returns_values_in_order() {
		let mut mock = MockTable::new();
		mock.insert("p/q", json!(1), json!(1));
		mock.insert("p/q", json!(2), json!(2));
		mock.insert("p/q", json!(3), json!(3));

		let outputs = mock.lookup_batch("p/q", &[json!(1), json!(2), json!(3)]).unwrap();
		assert_eq!(outputs, vec![json!(1), json!(2), json!(3)]);
	}

	#[test]
	fn mock_table_lookup_miss_is_unknown_endpoint() {
		let mock = MockTable::new();
		let err = mock.lookup_one("p/q", &json!(1)).unwrap_err();
		assert!(matches!(err, SdkError::UnknownEndpoint(target) if target == "p/q"));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn query_round_trips_a_live_nested_request_response() {
		let opts = WireOptions::default();
		let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
		let (inbound_tx, inbound_rx) = mpsc::channel(8);
		let mut engine = Engine::new(7, inbound_rx, outbound_tx, opts, None);

		// Stands in for core: reassembles the sub-request this session emits, then
		// answers it on the same session id, the way a real nested query resolves.
		let responder = tokio::spawn(async move {
			let mut synth = Synthesizer::new(opts);
			let request = loop {
				let frame = outbound_rx.recv().await.unwrap().expect("frame, not end-of-stream sentinel");
				if let Some(msg) = synth.push(frame).unwrap() {
					break msg;
				}
			};
			assert_eq!(request.id, 7);
			assert_eq!(request.direction, Direction::Request);
			assert_eq!(request.publisher, "core");
			assert_eq!(request.plugin, "other");
			assert_eq!(request.query, "lookup");
			assert_eq!(request.key, vec![json!("k")]);

			let response = LogicalQuery {
				id: request.id,
				direction: Direction::Response,
				publisher: request.publisher,
				plugin: request.plugin,
				query: request.query,
				key: vec![],
				output: vec![json!("v")],
				concerns: vec![],
			};
			for frame in chunk(&response, opts).unwrap() {
				inbound_tx.send(frame).await.unwrap();
			}
		});

		let output = engine.query("core/other/lookup", json!("k")).await.unwrap();
		assert_eq!(output, json!("v"));
		responder.await.unwrap();
	}

	#[tokio::test(flavor = "current_thread")]
	async fn batch_query_in_mock_mode_bypasses_transport() {
		let mut mock = MockTable::new();
		mock.insert("p/q", json!(1), json!(1));
		mock.insert("p/q", json!(2), json!(2));
		mock.insert("p/q", json!(3), json!(3));

		let (outbound_tx, _outbound_rx) = mpsc::channel(1);
		let (_inbound_tx, inbound_rx) = mpsc::channel(1);
		let mut engine = Engine::new(1, inbound_rx, outbound_tx, WireOptions::default(), Some(Arc::new(mock)));

		let outputs = engine.batch_query("p/q", vec![json!(1), json!(2), json!(3)]).await.unwrap();
		assert_eq!(outputs, vec![json!(1), json!(2), json!(3)]);
	}
}
