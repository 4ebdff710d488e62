//! Engine settings
//!
//! Loaded from defaults, a TOML document, and `MODELVIEW_*` environment
//! variables, in that order of precedence (later wins).
//!
//! ```toml
//! max_depth = 16
//! fan_out = 8
//! strict_types = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_MAX_DEPTH: &str = "MODELVIEW_MAX_DEPTH";
pub const ENV_FAN_OUT: &str = "MODELVIEW_FAN_OUT";
pub const ENV_STRICT_TYPES: &str = "MODELVIEW_STRICT_TYPES";

/// Errors raised while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("Failed to read settings file {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Invalid settings document: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("Invalid value {value:?} for environment variable {var}")]
	InvalidEnv { var: String, value: String },

	#[error("Invalid setting '{field}': {message}")]
	Invalid { field: &'static str, message: String },
}

/// Engine-wide tunables
///
/// # Examples
///
/// ```
/// use modelview_serializers::SerializerSettings;
///
/// let settings = SerializerSettings::from_toml_str("fan_out = 4").unwrap();
/// assert_eq!(settings.fan_out, 4);
/// assert_eq!(settings.max_depth, 32);
/// assert!(settings.strict_types);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerializerSettings {
	/// Deepest nesting level materialization may reach
	pub max_depth: usize,
	/// Top-level entities materialized concurrently
	pub fan_out: usize,
	/// Reject scalar values whose JSON type does not match the declared type
	pub strict_types: bool,
}

impl Default for SerializerSettings {
	fn default() -> Self {
		Self {
			max_depth: 32,
			fan_out: 16,
			strict_types: true,
		}
	}
}

impl SerializerSettings {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_depth(mut self, max_depth: usize) -> Self {
		self.max_depth = max_depth;
		self
	}

	pub fn with_fan_out(mut self, fan_out: usize) -> Self {
		self.fan_out = fan_out;
		self
	}

	pub fn with_strict_types(mut self, strict: bool) -> Self {
		self.strict_types = strict;
		self
	}

	/// Parse a TOML document; missing keys keep their defaults
	pub fn from_toml_str(source: &str) -> Result<Self, SettingsError> {
		let settings: Self = toml::from_str(source)?;
		settings.validate()
	}

	pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&content)
	}

	/// Defaults overlaid with the process environment
	pub fn from_env() -> Result<Self, SettingsError> {
		Self::default().overlay_env()
	}

	/// Overlay `MODELVIEW_*` variables from the process environment
	pub fn overlay_env(self) -> Result<Self, SettingsError> {
		self.overlay_with(|var| std::env::var(var).ok())
	}

	/// Overlay values from an arbitrary variable lookup
	pub fn overlay_with<F>(mut self, lookup: F) -> Result<Self, SettingsError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(raw) = lookup(ENV_MAX_DEPTH) {
			self.max_depth = parse_usize(ENV_MAX_DEPTH, &raw)?;
		}
		if let Some(raw) = lookup(ENV_FAN_OUT) {
			self.fan_out = parse_usize(ENV_FAN_OUT, &raw)?;
		}
		if let Some(raw) = lookup(ENV_STRICT_TYPES) {
			self.strict_types = parse_bool(ENV_STRICT_TYPES, &raw)?;
		}
		self.validate()
	}

	pub fn validate(self) -> Result<Self, SettingsError> {
		if self.max_depth == 0 {
			return Err(SettingsError::Invalid {
				field: "max_depth",
				message: "must be at least 1".to_string(),
			});
		}
		if self.fan_out == 0 {
			return Err(SettingsError::Invalid {
				field: "fan_out",
				message: "must be at least 1".to_string(),
			});
		}
		Ok(self)
	}
}

fn parse_usize(var: &str, raw: &str) -> Result<usize, SettingsError> {
	raw.trim().parse().map_err(|_| SettingsError::InvalidEnv {
		var: var.to_string(),
		value: raw.to_string(),
	})
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, SettingsError> {
	match raw.trim().to_lowercase().as_str() {
		"true" | "1" | "yes" | "on" => Ok(true),
		"false" | "0" | "no" | "off" => Ok(false),
		_ => Err(SettingsError::InvalidEnv {
			var: var.to_string(),
			value: raw.to_string(),
		}),
	}
}
