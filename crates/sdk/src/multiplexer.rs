//! Owns the single bidirectional stream: demultiplexes inbound frames into
//! per-session queues, multiplexes outbound frames from every session back
//! into one ordered stream.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use duplex_wire::{Frame, SdkError, State};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::engine::MockTable;
use crate::registry::EndpointRegistry;
use crate::session::{self, SessionHandle};

/// Bound on the shared outbound queue and each session's inbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Where the multiplexer's outbound queue is drained to. Implemented for the real
/// transport sink by the embedding binary, and for `mpsc::Sender<Option<Frame>>` here
/// for tests and in-process transports.
pub trait FrameSink: Send {
	/// Write one frame, or `None` to signal end-of-stream.
	fn send(&mut self, frame: Option<Frame>) -> impl Future<Output = Result<(), SdkError>> + Send;
}

impl FrameSink for mpsc::Sender<Option<Frame>> {
	async fn send(&mut self, frame: Option<Frame>) -> Result<(), SdkError> {
		mpsc::Sender::send(self, frame).await.map_err(|_| SdkError::SendFailure)
	}
}

/// Demultiplexes one bidirectional [`Frame`] stream across many concurrent sessions.
pub struct SessionMultiplexer {
	sessions: HashMap<i32, SessionHandle>,
	outbound_tx: mpsc::Sender<Option<Frame>>,
	outbound_rx: Option<mpsc::Receiver<Option<Frame>>>,
	finished_tx: mpsc::UnboundedSender<i32>,
	finished_rx: mpsc::UnboundedReceiver<i32>,
	registry: Arc<EndpointRegistry>,
	opts: duplex_wire::WireOptions,
	mock: Option<Arc<MockTable>>,
}

impl SessionMultiplexer {
	/// Build a multiplexer over `registry`. `mock`, when set, is threaded into every
	/// session so nested queries are answered from the table instead of the transport.
	pub fn new(registry: Arc<EndpointRegistry>, opts: duplex_wire::WireOptions, mock: Option<Arc<MockTable>>) -> Self {
		let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
		let (finished_tx, finished_rx) = mpsc::unbounded_channel();
		SessionMultiplexer {
			sessions: HashMap::new(),
			outbound_tx,
			outbound_rx: Some(outbound_rx),
			finished_tx,
			finished_rx,
			registry,
			opts,
			mock,
		}
	}

	/// Run the multiplexer until `inbound` ends or `shutdown` is cancelled, writing
	/// outbound frames to `outbound` as they're produced.
	pub async fn run<In, Out>(mut self, inbound: In, outbound: Out, shutdown: CancellationToken) -> Result<(), SdkError>
	where
		In: Stream<Item = Result<Frame, SdkError>> + Unpin + Send + 'static,
		Out: FrameSink + 'static,
	{
		self.outbound_tx
			.send(Some(Frame::default()))
			.await
			.map_err(|_| SdkError::SendFailure)?;

		let outbound_rx = self.outbound_rx.take().expect("outbound_rx taken exactly once");
		let writer = tokio::spawn(run_outbound(outbound_rx, outbound));

		self.dispatch_loop(inbound, shutdown).await;

		let _ = self.outbound_tx.send(None).await;
		if let Err(err) = writer.await {
			tracing::error!(error = %err, "outbound writer task panicked");
		}

		Ok(())
	}

	async fn dispatch_loop<In>(&mut self, mut inbound: In, shutdown: CancellationToken)
	where
		In: Stream<Item = Result<Frame, SdkError>> + Unpin,
	{
		loop {
			self.drain_finished().await;

			tokio::select! {
				biased;
				() = shutdown.cancelled() => {
					tracing::info!("multiplexer received external stop signal");
					break;
				}
				next = inbound.next() => {
					match next {
						Some(Ok(frame)) => {
							if let Err(err) = self.handle_frame(frame).await {
								tracing::error!(error = %err, "multiplexer error, aborting");
								self.emit_abort_frame(err).await;
								break;
							}
						}
						Some(Err(err)) => {
							tracing::error!(error = %err, "inbound stream aborted");
							self.emit_abort_frame(err).await;
							break;
						}
						None => {
							tracing::info!("inbound stream ended");
							break;
						}
					}
				}
			}
		}

		tracing::info!(pending = self.sessions.len(), "draining in-flight sessions");
		while !self.sessions.is_empty() {
			match self.finished_rx.recv().await {
				Some(id) => self.reap(id).await,
				None => break,
			}
		}
	}

	async fn handle_frame(&mut self, frame: Frame) -> Result<(), SdkError> {
		if let Some(handle) = self.sessions.get(&frame.id) {
			tracing::debug!(session_id = frame.id, "routing frame to existing session");
			if handle.inbound.send(frame).await.is_err() {
				tracing::warn!(session_id = frame.id, "session inbound queue closed, dropping frame");
			}
			return Ok(());
		}

		if !frame.state.is_submit() {
			return Err(SdkError::UnexpectedReply);
		}

		let id = frame.id;
		tracing::info!(session_id = id, "creating new session");
		let handle = session::spawn(
			id,
			self.outbound_tx.clone(),
			self.finished_tx.clone(),
			Arc::clone(&self.registry),
			self.opts,
			self.mock.clone(),
		);
		if handle.inbound.send(frame).await.is_err() {
			tracing::warn!(session_id = id, "new session's inbound queue closed immediately");
		}
		self.sessions.insert(id, handle);
		Ok(())
	}

	async fn drain_finished(&mut self) {
		while let Ok(id) = self.finished_rx.try_recv() {
			self.reap(id).await;
		}
	}

	async fn reap(&mut self, id: i32) {
		match self.sessions.remove(&id) {
			Some(handle) => {
				if let Err(err) = handle.task.await {
					tracing::error!(session_id = id, error = %err, "session task panicked");
				}
			}
			None => tracing::warn!(session_id = id, "finished signal for unknown session"),
		}
	}

	async fn emit_abort_frame(&self, err: SdkError) {
		let frame = Frame {
			id: 1,
			state: State::Unspecified,
			output: vec![err.to_string()],
			..Default::default()
		};
		let _ = self.outbound_tx.send(Some(frame)).await;
	}
}

async fn run_outbound<Out: FrameSink>(mut rx: mpsc::Receiver<Option<Frame>>, mut sink: Out) {
	while let Some(item) = rx.recv().await {
		let is_end = item.is_none();
		if let Err(err) = sink.send(item).await {
			tracing::error!(error = %err, "failed to write outbound frame");
			break;
		}
		if is_end {
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use duplex_wire::{chunk_with_size, Direction, LogicalQuery, WireOptions};
	use serde_json::json;
	use tokio_stream::wrappers::ReceiverStream;

	use super::*;
	use crate::registry::EndpointRegistryBuilder;

	fn registry() -> Arc<EndpointRegistry> {
		Arc::new(
			EndpointRegistryBuilder::new()
				.register::<i64, i64, _>("", None, None, |_engine, key| Box::pin(async move { Ok(key + 1) }))
				.unwrap()
				.build(),
		)
	}

	#[tokio::test(flavor = "current_thread")]
	async fn unknown_id_non_submit_frame_yields_unexpected_reply() {
		let (inbound_tx, inbound_rx) = mpsc::channel(4);
		let (outbound_tx, mut outbound_rx) = mpsc::channel(8);

		let mux = SessionMultiplexer::new(registry(), WireOptions::default(), None);
		let shutdown = CancellationToken::new();
		let run = tokio::spawn(mux.run(ReceiverStream::new(inbound_rx), outbound_tx, shutdown));

		// drain the startup sentinel
		assert_eq!(outbound_rx.recv().await.unwrap().unwrap().id, 0);

		inbound_tx
			.send(Ok(Frame {
				id: 99,
				state: State::ReplyComplete,
				..Default::default()
			}))
			.await
			.unwrap();
		drop(inbound_tx);

		let abort_frame = outbound_rx.recv().await.unwrap().unwrap();
		assert_eq!(abort_frame.id, 1);
		assert_eq!(abort_frame.state, State::Unspecified);
		assert!(abort_frame.output[0].contains("unexpected reply"));

		run.await.unwrap().unwrap();
	}

	#[tokio::test(flavor = "current_thread")]
	async fn unknown_id_submit_frame_starts_new_session() {
		let (inbound_tx, inbound_rx) = mpsc::channel(4);
		let (outbound_tx, mut outbound_rx) = mpsc::channel(8);

		let mux = SessionMultiplexer::new(registry(), WireOptions::default(), None);
		let shutdown = CancellationToken::new();
		let run = tokio::spawn(mux.run(ReceiverStream::new(inbound_rx), outbound_tx, shutdown));

		assert_eq!(outbound_rx.recv().await.unwrap().unwrap().id, 0);

		let request = LogicalQuery {
			id: 5,
			direction: Direction::Request,
			publisher: "mitre".into(),
			plugin: "example".into(),
			query: "".into(),
			key: vec![json!(1)],
			output: vec![],
			concerns: vec![],
		};
		for frame in chunk_with_size(&request, 4096, WireOptions::default()).unwrap() {
			inbound_tx.send(Ok(frame)).await.unwrap();
		}
		drop(inbound_tx);

		let reply = outbound_rx.recv().await.unwrap().unwrap();
		assert_eq!(reply.id, 5);
		assert_eq!(reply.output, vec!["2".to_string()]);

		run.await.unwrap().unwrap();
	}
}
