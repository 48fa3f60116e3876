//! The hooks an embedding plugin supplies beyond its declared query endpoints.

use std::future::Future;
use std::pin::Pin;

use duplex_wire::ConfigError;

/// Behavior a plugin implements for the non-streaming service surface (§4.E).
///
/// Boxes its own future rather than using `async fn` in the trait so `Plugin` stays
/// object-safe: [`crate::service::PluginService`] holds it as `Arc<dyn Plugin>`.
pub trait Plugin: Send + Sync {
	/// Apply a configuration object forwarded verbatim from the host.
	fn set_config<'a>(&'a self, config: serde_json::Value) -> Pin<Box<dyn Future<Output = Result<(), ConfigError>> + Send + 'a>>;

	/// The plugin's default policy expression, if it has one.
	fn default_policy_expression(&self) -> Option<String> {
		None
	}

	/// A human-readable explanation of the default query, if the plugin provides one.
	fn explain_default_query(&self) -> Option<String> {
		None
	}
}
