//! The four non-streaming RPCs, expressed as a [`tower_service::Service`] per §4.E.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use duplex_wire::SdkError;
use tower_service::Service;

use crate::plugin::Plugin;
use crate::registry::EndpointRegistry;

/// One query endpoint's schemas, as returned by `GetQuerySchemas`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySchema {
	/// Endpoint name; empty for the default endpoint.
	pub name: String,
	/// JSON Schema for the endpoint's key, serialized to a string.
	pub key_schema: String,
	/// JSON Schema for the endpoint's output, serialized to a string.
	pub output_schema: String,
}

/// `SetConfigurationResponse.status` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
	/// Error/uninitialized marker; also what an unclassified `ConfigError` maps to.
	Unspecified,
	/// Configuration applied successfully.
	None,
	/// A required field was missing.
	MissingRequiredConfiguration,
	/// A field was present but not recognized.
	UnrecognizedConfiguration,
	/// A field's value failed validation.
	InvalidConfigurationValue,
	/// Reserved for an internal failure while applying configuration; no `ConfigError` variant maps here yet.
	InternalError,
	/// Reserved for a referenced file that doesn't exist; no `ConfigError` variant maps here yet.
	FileNotFound,
	/// Reserved for a malformed configuration document; no `ConfigError` variant maps here yet.
	ParseError,
	/// Reserved for a required environment variable that isn't set; no `ConfigError` variant maps here yet.
	EnvVarNotSet,
	/// Reserved for a referenced external program that can't be found; no `ConfigError` variant maps here yet.
	MissingProgram,
}

/// One of the four non-streaming RPCs.
pub enum PluginRequest {
	/// `GetQuerySchemas`.
	GetQuerySchemas,
	/// `SetConfiguration`, carrying the opaque configuration object.
	SetConfiguration(serde_json::Value),
	/// `GetDefaultPolicyExpression`.
	GetDefaultPolicyExpression,
	/// `ExplainDefaultQuery`.
	ExplainDefaultQuery,
}

/// Response to a [`PluginRequest`].
pub enum PluginResponse {
	/// Answer to `GetQuerySchemas`.
	QuerySchemas(Vec<QuerySchema>),
	/// Answer to `SetConfiguration`.
	Configuration {
		/// Outcome of the configure attempt.
		status: ConfigStatus,
		/// Human-readable detail, empty on success.
		message: String,
	},
	/// Answer to `GetDefaultPolicyExpression`.
	DefaultPolicyExpression(String),
	/// Answer to `ExplainDefaultQuery`.
	ExplainDefaultQuery(String),
}

/// Implements the four non-streaming RPCs on top of an [`EndpointRegistry`] and a [`Plugin`].
///
/// The streaming RPC itself is [`crate::multiplexer::SessionMultiplexer`]; an embedding
/// binary drops both behind whatever transport-level service trait its generated stubs
/// expect.
#[derive(Clone)]
pub struct PluginService {
	registry: Arc<EndpointRegistry>,
	plugin: Arc<dyn Plugin>,
}

impl PluginService {
	/// Build a service over `registry` and `plugin`.
	pub fn new(registry: Arc<EndpointRegistry>, plugin: Arc<dyn Plugin>) -> Self {
		PluginService { registry, plugin }
	}
}

impl Service<PluginRequest> for PluginService {
	type Response = PluginResponse;
	type Error = SdkError;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		Poll::Ready(Ok(()))
	}

	fn call(&mut self, req: PluginRequest) -> Self::Future {
		let registry = Arc::clone(&self.registry);
		let plugin = Arc::clone(&self.plugin);

		Box::pin(async move {
			match req {
				PluginRequest::GetQuerySchemas => {
					let schemas = registry
						.iter()
						.map(|endpoint| QuerySchema {
							name: endpoint.name().to_string(),
							key_schema: serde_json::to_string(endpoint.key_schema()).expect("schema value always serializes"),
							output_schema: serde_json::to_string(endpoint.output_schema()).expect("schema value always serializes"),
						})
						.collect();
					Ok(PluginResponse::QuerySchemas(schemas))
				}
				PluginRequest::SetConfiguration(config) => {
					let response = match plugin.set_config(config).await {
						Ok(()) => PluginResponse::Configuration {
							status: ConfigStatus::None,
							message: String::new(),
						},
						Err(err) => PluginResponse::Configuration {
							status: config_status(&err),
							message: err.to_string(),
						},
					};
					Ok(response)
				}
				PluginRequest::GetDefaultPolicyExpression => Ok(PluginResponse::DefaultPolicyExpression(
					plugin.default_policy_expression().unwrap_or_default(),
				)),
				PluginRequest::ExplainDefaultQuery => Ok(PluginResponse::ExplainDefaultQuery(plugin.explain_default_query().unwrap_or_default())),
			}
		})
	}
}

fn config_status(err: &duplex_wire::ConfigError) -> ConfigStatus {
	use duplex_wire::ConfigError;
	match err {
		ConfigError::InvalidValue { .. } => ConfigStatus::InvalidConfigurationValue,
		ConfigError::MissingRequired { .. } => ConfigStatus::MissingRequiredConfiguration,
		ConfigError::Unrecognized { .. } => ConfigStatus::UnrecognizedConfiguration,
		ConfigError::Unspecified(_) => ConfigStatus::Unspecified,
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use duplex_wire::ConfigError;
	use serde_json::json;

	use super::*;
	use crate::registry::EndpointRegistryBuilder;

	struct RecordingPlugin {
		seen: Mutex<Vec<serde_json::Value>>,
		fail: Option<ConfigError>,
	}

	impl RecordingPlugin {
		fn ok() -> Self {
			RecordingPlugin {
				seen: Mutex::new(Vec::new()),
				fail: None,
			}
		}

		fn failing_with(err: ConfigError) -> Self {
			RecordingPlugin {
				seen: Mutex::new(Vec::new()),
				fail: Some(err),
			}
		}
	}

	impl Plugin for RecordingPlugin {
		fn set_config<'a>(&'a self, config: serde_json::Value) -> Pin<Box<dyn Future<Output = Result<(), ConfigError>> + Send + 'a>> {
			Box::pin(async move {
				self.seen.lock().unwrap().push(config);
				match &self.fail {
					Some(ConfigError::MissingRequired { field_name, field_type, candidates }) => Err(ConfigError::MissingRequired {
						field_name: field_name.clone(),
						field_type: field_type.clone(),
						candidates: candidates.clone(),
					}),
					Some(ConfigError::Unspecified(message)) => Err(ConfigError::Unspecified(message.clone())),
					Some(other) => unimplemented!("test helper doesn't clone {other:?}"),
					None => Ok(()),
				}
			})
		}

		fn default_policy_expression(&self) -> Option<String> {
			Some("true".to_string())
		}
	}

	fn registry() -> Arc<EndpointRegistry> {
		Arc::new(
			EndpointRegistryBuilder::new()
				.register::<i64, i64, _>("double", None, None, |_engine, key| Box::pin(async move { Ok(key * 2) }))
				.unwrap()
				.build(),
		)
	}

	#[tokio::test(flavor = "current_thread")]
	async fn get_query_schemas_lists_registered_endpoints() {
		let plugin = Arc::new(RecordingPlugin::ok());
		let mut service = PluginService::new(registry(), plugin);

		let PluginResponse::QuerySchemas(schemas) = service.call(PluginRequest::GetQuerySchemas).await.unwrap() else {
			panic!("wrong response variant");
		};
		assert_eq!(schemas.len(), 1);
		assert_eq!(schemas[0].name, "double");
	}

	#[tokio::test(flavor = "current_thread")]
	async fn set_configuration_success_maps_to_none_status() {
		let plugin = Arc::new(RecordingPlugin::ok());
		let mut service = PluginService::new(registry(), Arc::clone(&plugin) as Arc<dyn Plugin>);

		let response = service.call(PluginRequest::SetConfiguration(json!({"port": 1}))).await.unwrap();
		let PluginResponse::Configuration { status, message } = response else {
			panic!("wrong response variant");
		};
		assert_eq!(status, ConfigStatus::None);
		assert!(message.is_empty());
		assert_eq!(plugin.seen.lock().unwrap().len(), 1);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn set_configuration_failure_maps_config_error_to_status() {
		let plugin = Arc::new(RecordingPlugin::failing_with(ConfigError::MissingRequired {
			field_name: "port".into(),
			field_type: "integer".into(),
			candidates: vec![],
		}));
		let mut service = PluginService::new(registry(), plugin);

		let response = service.call(PluginRequest::SetConfiguration(json!({}))).await.unwrap();
		let PluginResponse::Configuration { status, message } = response else {
			panic!("wrong response variant");
		};
		assert_eq!(status, ConfigStatus::MissingRequiredConfiguration);
		assert!(message.contains("port"));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn set_configuration_unspecified_error_maps_to_unspecified_status() {
		let plugin = Arc::new(RecordingPlugin::failing_with(ConfigError::Unspecified("unclassified failure".into())));
		let mut service = PluginService::new(registry(), plugin);

		let response = service.call(PluginRequest::SetConfiguration(json!({}))).await.unwrap();
		let PluginResponse::Configuration { status, message } = response else {
			panic!("wrong response variant");
		};
		assert_eq!(status, ConfigStatus::Unspecified);
		assert!(message.contains("unclassified failure"));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn default_policy_expression_returns_plugin_hook_value() {
		let plugin = Arc::new(RecordingPlugin::ok());
		let mut service = PluginService::new(registry(), plugin);

		let response = service.call(PluginRequest::GetDefaultPolicyExpression).await.unwrap();
		let PluginResponse::DefaultPolicyExpression(expr) = response else {
			panic!("wrong response variant");
		};
		assert_eq!(expr, "true");
	}
}
