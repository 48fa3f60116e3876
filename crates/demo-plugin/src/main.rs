//! Minimal runnable example: one endpoint, wired onto [`SessionMultiplexer`] over an
//! in-memory duplex pair standing in for the transport, which is out of scope for
//! `duplex-sdk` itself (see that crate's docs).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use duplex_sdk::{ConfigError, Engine, EndpointRegistryBuilder, Plugin, PluginRequest, PluginResponse, PluginService, SdkError, SessionMultiplexer};
use duplex_wire::{chunk_with_size, Direction, LogicalQuery, WireOptions};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

struct DemoPlugin;

impl Plugin for DemoPlugin {
	fn set_config<'a>(&'a self, config: serde_json::Value) -> Pin<Box<dyn Future<Output = Result<(), ConfigError>> + Send + 'a>> {
		Box::pin(async move {
			tracing::info!(?config, "demo plugin configured");
			Ok(())
		})
	}

	fn default_policy_expression(&self) -> Option<String> {
		Some("true".to_string())
	}
}

async fn double(_engine: &mut Engine, key: i64) -> Result<i64, SdkError> {
	Ok(key * 2)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
	let plugin: Arc<dyn Plugin> = Arc::new(DemoPlugin);

	let registry = Arc::new(
		EndpointRegistryBuilder::new()
			.register::<i64, i64, _>("", None, None, |engine, key| Box::pin(double(engine, key)))?
			.build(),
	);

	let mut service = PluginService::new(Arc::clone(&registry), plugin);
	let PluginResponse::QuerySchemas(schemas) = service.call(PluginRequest::GetQuerySchemas).await? else {
		unreachable!("GetQuerySchemas always answers with QuerySchemas")
	};
	for schema in &schemas {
		tracing::info!(name = %schema.name, key_schema = %schema.key_schema, "registered endpoint");
	}

	let opts = WireOptions::default();
	let multiplexer = SessionMultiplexer::new(registry, opts, None);

	let (inbound_tx, inbound_rx) = mpsc::channel(8);
	let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
	let shutdown = CancellationToken::new();

	let run = tokio::spawn(multiplexer.run(ReceiverStream::new(inbound_rx).map(Ok), outbound_tx, shutdown));

	let printer = tokio::spawn(async move {
		while let Some(Some(frame)) = outbound_rx.recv().await {
			if frame.id != 0 {
				tracing::info!(?frame, "outbound frame");
			}
		}
	});

	let request = LogicalQuery {
		id: 1,
		direction: Direction::Request,
		publisher: "demo".into(),
		plugin: "double".into(),
		query: String::new(),
		key: vec![serde_json::json!(21)],
		output: vec![],
		concerns: vec![],
	};
	for frame in chunk_with_size(&request, 4096, opts)? {
		inbound_tx.send(frame).await?;
	}
	drop(inbound_tx);

	run.await??;
	printer.await?;
	Ok(())
}
