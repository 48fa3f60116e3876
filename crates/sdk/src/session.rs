//! One query session: RECEIVING_REQUEST → RUNNING → SENDING_REPLY → CLOSED.

use std::sync::Arc;

use duplex_wire::{chunk, Direction, Frame, LogicalQuery, SdkError, State, WireOptions};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::engine::{Engine, MockTable};
use crate::registry::EndpointRegistry;

/// Channel capacity for a session's inbound queue and the shared outbound queue.
///
/// Cooperative scheduling means a slow endpoint body naturally back-pressures the
/// multiplexer's forwarding send rather than requiring an unbounded buffer (§5).
pub const SESSION_QUEUE_CAPACITY: usize = 32;

/// What the multiplexer tracks for one active session.
pub struct SessionHandle {
	/// The session's running task.
	pub task: tokio::task::JoinHandle<()>,
	/// Sender half of this session's inbound frame queue.
	pub inbound: mpsc::Sender<Frame>,
}

/// Spawn a new session task for `id`.
pub fn spawn(
	id: i32,
	outbound: mpsc::Sender<Option<Frame>>,
	finished: mpsc::UnboundedSender<i32>,
	registry: Arc<EndpointRegistry>,
	opts: WireOptions,
	mock: Option<Arc<MockTable>>,
) -> SessionHandle {
	let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
	let span = tracing::info_span!("session", session_id = id);
	let task = tokio::spawn(run(id, rx, outbound, finished, registry, opts, mock).instrument(span));
	SessionHandle { task, inbound: tx }
}

async fn run(
	id: i32,
	inbound: mpsc::Receiver<Frame>,
	outbound: mpsc::Sender<Option<Frame>>,
	finished: mpsc::UnboundedSender<i32>,
	registry: Arc<EndpointRegistry>,
	opts: WireOptions,
	mock: Option<Arc<MockTable>>,
) {
	tracing::info!("session started");
	let mut engine = Engine::new(id, inbound, outbound.clone(), opts, mock);

	if let Err(failure) = drive(id, &mut engine, &registry, opts).await {
		tracing::warn!(error = %failure.error, "session failed");
		let error_frame = Frame {
			id,
			state: State::Unspecified,
			publisher_name: failure.publisher,
			plugin_name: failure.plugin,
			concern: failure.concerns,
			..Default::default()
		};
		let _ = outbound.send(Some(error_frame)).await;
	} else {
		tracing::info!("session closed");
	}

	if finished.send(id).is_err() {
		tracing::warn!("finished queue closed before session {id} could signal completion");
	}
}

/// Context carried into the error frame when a session fails mid-flight.
struct Failure {
	error: SdkError,
	publisher: String,
	plugin: String,
	concerns: Vec<String>,
}

impl Failure {
	fn new(error: SdkError) -> Self {
		Failure {
			error,
			publisher: String::new(),
			plugin: String::new(),
			concerns: Vec::new(),
		}
	}

	fn with_header(error: SdkError, publisher: String, plugin: String) -> Self {
		Failure {
			error,
			publisher,
			plugin,
			concerns: Vec::new(),
		}
	}
}

fn lookup<'a>(registry: &'a EndpointRegistry, name: &str) -> Option<&'a crate::registry::Endpoint> {
	if name.is_empty() {
		registry.default_endpoint()
	} else {
		registry.get(name)
	}
}

async fn drive(id: i32, engine: &mut Engine, registry: &EndpointRegistry, opts: WireOptions) -> Result<(), Failure> {
	// RECEIVING_REQUEST
	let request: LogicalQuery = engine.recv_message().await.map_err(Failure::new)?;
	let publisher = request.publisher.clone();
	let plugin = request.plugin.clone();

	if request.key.len() != 1 {
		return Err(Failure::with_header(SdkError::InvalidState, publisher, plugin));
	}
	let endpoint = lookup(registry, &request.query)
		.ok_or_else(|| Failure::with_header(SdkError::UnknownEndpoint(request.query.clone()), publisher.clone(), plugin.clone()))?;
	let key = request.key.into_iter().next().expect("length checked above");

	// RUNNING (endpoint body may suspend into NESTED_QUERY via engine.query/batch_query)
	let output = endpoint
		.invoke(engine, key)
		.await
		.map_err(|err| Failure::with_header(err, publisher.clone(), plugin.clone()))?;
	let concerns = engine.take_concerns();

	// SENDING_REPLY
	let reply = LogicalQuery {
		id,
		direction: Direction::Response,
		publisher: publisher.clone(),
		plugin: plugin.clone(),
		query: request.query,
		key: Vec::new(),
		output: vec![output],
		concerns,
	};
	let frames = chunk(&reply, opts).map_err(|err| Failure::with_header(err, publisher.clone(), plugin.clone()))?;
	engine
		.send_frames(frames)
		.await
		.map_err(|err| Failure::with_header(err, publisher, plugin))?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use duplex_wire::{chunk_with_size, Direction as Dir};
	use serde_json::json;
	use tokio::sync::mpsc;

	use super::*;
	use crate::registry::EndpointRegistryBuilder;

	fn registry() -> Arc<EndpointRegistry> {
		let registry = EndpointRegistryBuilder::new()
			.register::<i64, i64, _>("", None, None, |_engine, key| Box::pin(async move { Ok(key * 2) }))
			.unwrap()
			.build();
		Arc::new(registry)
	}

	#[tokio::test(flavor = "current_thread")]
	async fn full_request_reply_round_trip() {
		let opts = WireOptions::default();
		let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
		let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();

		let handle = spawn(7, outbound_tx, finished_tx, registry(), opts, None);

		let request = LogicalQuery {
			id: 7,
			direction: Dir::Request,
			publisher: "mitre".into(),
			plugin: "example".into(),
			query: "".into(),
			key: vec![json!(21)],
			output: vec![],
			concerns: vec![],
		};
		for frame in chunk_with_size(&request, 4096, opts).unwrap() {
			handle.inbound.send(frame).await.unwrap();
		}

		let reply_frame = outbound_rx.recv().await.unwrap().unwrap();
		assert_eq!(reply_frame.state, State::ReplyComplete);
		assert_eq!(reply_frame.output, vec!["42".to_string()]);

		assert_eq!(finished_rx.recv().await.unwrap(), 7);
		handle.task.await.unwrap();
	}

	#[tokio::test(flavor = "current_thread")]
	async fn unknown_endpoint_emits_unspecified_frame() {
		let opts = WireOptions::default();
		let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
		let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();

		let handle = spawn(3, outbound_tx, finished_tx, registry(), opts, None);

		let request = LogicalQuery {
			id: 3,
			direction: Dir::Request,
			publisher: "mitre".into(),
			plugin: "example".into(),
			query: "does-not-exist".into(),
			key: vec![json!(1)],
			output: vec![],
			concerns: vec![],
		};
		for frame in chunk_with_size(&request, 4096, opts).unwrap() {
			handle.inbound.send(frame).await.unwrap();
		}

		let error_frame = outbound_rx.recv().await.unwrap().unwrap();
		assert_eq!(error_frame.state, State::Unspecified);
		assert_eq!(error_frame.id, 3);

		assert_eq!(finished_rx.recv().await.unwrap(), 3);
		handle.task.await.unwrap();
	}
}
