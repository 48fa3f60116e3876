//! Process-wide endpoint table: declared at startup via [`EndpointRegistryBuilder`],
//! consulted immutably for the rest of the process's life.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use duplex_wire::SdkError;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::Engine;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type ErasedBody = Box<dyn for<'a> Fn(&'a mut Engine, serde_json::Value) -> BoxFuture<'a, Result<serde_json::Value, SdkError>> + Send + Sync>;

/// A named handler inside a plugin, registered via [`EndpointRegistryBuilder::register`]
/// or [`EndpointRegistryBuilder::register_raw`].
pub struct Endpoint {
	name: String,
	key_schema: serde_json::Value,
	output_schema: serde_json::Value,
	body: ErasedBody,
}

impl Endpoint {
	/// Name this endpoint was registered under; empty for the default endpoint.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// True for the endpoint registered under the empty name.
	pub fn is_default(&self) -> bool {
		self.name.is_empty()
	}

	/// The endpoint's key JSON Schema, as given or derived at registration time.
	pub fn key_schema(&self) -> &serde_json::Value {
		&self.key_schema
	}

	/// The endpoint's output JSON Schema, as given or derived at registration time.
	pub fn output_schema(&self) -> &serde_json::Value {
		&self.output_schema
	}

	/// Invoke this endpoint's body with a raw JSON key value.
	pub(crate) fn invoke<'a>(&'a self, engine: &'a mut Engine, key: serde_json::Value) -> BoxFuture<'a, Result<serde_json::Value, SdkError>> {
		(self.body)(engine, key)
	}
}

/// Immutable, process-wide table of declared endpoints.
///
/// Built once via [`EndpointRegistryBuilder`] and shared by reference for the
/// lifetime of the server (§4.B): there is no global registration side effect here.
#[derive(Default)]
pub struct EndpointRegistry {
	endpoints: HashMap<String, Endpoint>,
}

impl EndpointRegistry {
	/// Look up an endpoint by name (the empty string selects the default endpoint).
	pub fn get(&self, name: &str) -> Option<&Endpoint> {
		self.endpoints.get(name)
	}

	/// The endpoint registered under the empty name, if any.
	pub fn default_endpoint(&self) -> Option<&Endpoint> {
		self.endpoints.values().find(|endpoint| endpoint.is_default())
	}

	/// Every registered endpoint, for `GetQuerySchemas`.
	pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
		self.endpoints.values()
	}
}

/// Accumulates endpoint declarations and finalizes them into an immutable
/// [`EndpointRegistry`]. Replaces the source's module-load-time global registry
/// with an explicit, constructor-supplied builder (§9).
#[derive(Default)]
pub struct EndpointRegistryBuilder {
	endpoints: HashMap<String, Endpoint>,
	has_default: bool,
}

impl EndpointRegistryBuilder {
	/// An empty builder.
	pub fn new() -> Self {
		EndpointRegistryBuilder::default()
	}

	/// Register a typed endpoint. `key_schema`/`output_schema` are derived from `K`/`O`
	/// via [`JsonSchema`] when not given explicitly; an explicit schema always wins.
	///
	/// At most one endpoint may be registered under the empty (default) name.
	pub fn register<K, O, F>(
		mut self,
		name: impl Into<String>,
		key_schema: Option<serde_json::Value>,
		output_schema: Option<serde_json::Value>,
		body: F,
	) -> Result<Self, SdkError>
	where
		K: DeserializeOwned + JsonSchema + Send + 'static,
		O: Serialize + JsonSchema,
		F: Fn(&mut Engine, K) -> BoxFuture<'_, Result<O, SdkError>> + Send + Sync + 'static,
	{
		let key_schema = key_schema.unwrap_or_else(|| schema_value::<K>());
		let output_schema = output_schema.unwrap_or_else(|| schema_value::<O>());
		let body = Arc::new(body);

		let adapter: ErasedBody = Box::new(move |engine: &mut Engine, raw_key: serde_json::Value| {
			let body = Arc::clone(&body);
			Box::pin(async move {
				let key: K = serde_json::from_value(raw_key).map_err(SdkError::InvalidJsonInKey)?;
				let output = body(engine, key).await?;
				serde_json::to_value(output).map_err(SdkError::InvalidJsonInOutput)
			})
		});

		self.insert(name.into(), key_schema, output_schema, adapter)
	}

	/// Register an endpoint whose key/output are handled as raw `serde_json::Value`s,
	/// with no Rust type to derive a schema from (the source's "no typed key" path, §9).
	/// Both schemas must be supplied explicitly.
	pub fn register_raw<F>(mut self, name: impl Into<String>, key_schema: serde_json::Value, output_schema: serde_json::Value, body: F) -> Result<Self, SdkError>
	where
		F: Fn(&mut Engine, serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value, SdkError>> + Send + Sync + 'static,
	{
		self.insert(name.into(), key_schema, output_schema, Box::new(body))
	}

	fn insert(&mut self, name: String, key_schema: serde_json::Value, output_schema: serde_json::Value, body: ErasedBody) -> Result<Self, SdkError> {
		if name.is_empty() && self.has_default {
			return Err(SdkError::InvalidState);
		}
		if name.is_empty() {
			self.has_default = true;
		}
		self.endpoints.insert(
			name.clone(),
			Endpoint {
				name,
				key_schema,
				output_schema,
				body,
			},
		);
		Ok(std::mem::take(self))
	}

	/// Finalize into an immutable registry.
	pub fn build(self) -> EndpointRegistry {
		EndpointRegistry {
			endpoints: self.endpoints,
		}
	}
}

fn schema_value<T: JsonSchema>() -> serde_json::Value {
	let schema = schemars::schema_for!(T);
	serde_json::to_value(schema).expect("schemars output always serializes")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(serde::Deserialize, JsonSchema)]
	struct Key {
		n: i64,
	}

	#[test]
	fn second_default_registration_fails() {
		let builder = EndpointRegistryBuilder::new()
			.register::<Key, i64, _>("", None, None, |_engine, key| Box::pin(async move { Ok(key.n) }))
			.unwrap();
		let err = builder
			.register::<Key, i64, _>("", None, None, |_engine, key| Box::pin(async move { Ok(key.n) }))
			.unwrap_err();
		assert!(matches!(err, SdkError::InvalidState));
	}

	#[test]
	fn default_endpoint_is_found_by_empty_name() {
		let registry = EndpointRegistryBuilder::new()
			.register::<Key, i64, _>("", None, None, |_engine, key| Box::pin(async move { Ok(key.n) }))
			.unwrap()
			.register::<Key, i64, _>("named", None, None, |_engine, key| Box::pin(async move { Ok(key.n) }))
			.unwrap()
			.build();
		assert!(registry.default_endpoint().unwrap().is_default());
		assert!(registry.get("named").is_some());
		assert!(registry.get("missing").is_none());
	}
}
