//! Process-wide wire behavior knobs, threaded explicitly rather than read from globals.

/// Behavior knobs that affect chunking and reassembly, independent of any plugin's
/// own configuration (see the crate's configuration surface docs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireOptions {
	/// Preserve the legacy convention that concatenating all `key` frames (and
	/// separately all `output` frames) yields a valid JSON document: empty lists
	/// get a `""` placeholder, and an originally-empty list's first placeholder
	/// becomes the literal `null`.
	pub rfd9_compat: bool,
}

impl Default for WireOptions {
	fn default() -> Self {
		WireOptions { rfd9_compat: true }
	}
}
