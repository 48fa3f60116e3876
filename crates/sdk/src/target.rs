//! Parsing of `"<publisher>/<plugin>[/<endpoint>]"` nested-query target strings.

use duplex_wire::SdkError;

/// A parsed nested-query target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
	/// Publisher of the target plugin.
	pub publisher: String,
	/// Name of the target plugin.
	pub plugin: String,
	/// Endpoint name, empty for the default endpoint.
	pub endpoint: String,
}

/// Parse `"<publisher>/<plugin>"` or `"<publisher>/<plugin>/<endpoint>"`.
///
/// A missing endpoint component means the default endpoint (empty name).
pub fn parse_target(s: &str) -> Result<Target, SdkError> {
	let mut parts = s.splitn(3, '/');
	let publisher = parts.next().filter(|s| !s.is_empty());
	let plugin = parts.next().filter(|s| !s.is_empty());

	match (publisher, plugin) {
		(Some(publisher), Some(plugin)) => Ok(Target {
			publisher: publisher.to_string(),
			plugin: plugin.to_string(),
			endpoint: parts.next().unwrap_or("").to_string(),
		}),
		_ => Err(SdkError::InvalidTargetFormat(s.to_string())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_default_endpoint() {
		let target = parse_target("mitre/example").unwrap();
		assert_eq!(target.publisher, "mitre");
		assert_eq!(target.plugin, "example");
		assert_eq!(target.endpoint, "");
	}

	#[test]
	fn parses_named_endpoint() {
		let target = parse_target("mitre/example/foo").unwrap();
		assert_eq!(target.endpoint, "foo");
	}

	#[test]
	fn rejects_missing_slash() {
		let err = parse_target("bad").unwrap_err();
		assert!(matches!(err, SdkError::InvalidTargetFormat(s) if s == "bad"));
	}
}
