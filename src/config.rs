use std::env;
use std::sync::Arc;

use crate::event_sourcing::{
    EventStoreError, JsonSerializer, PackedJsonSerializer, Result, SerializeEvents, Serializers,
};

// ============================================================================
// Event Store Configuration
// ============================================================================
//
// Resolved once at startup; the store only ever sees the final values.
//
//   EVENT_KERNEL_WARN_ON_STREAM_LENGTH   commits per stream before a warning
//   EVENT_KERNEL_ERROR_ON_STREAM_LENGTH  hard limit (loads report, applies fail)
//   EVENT_KERNEL_DEFAULT_SERIALIZER      codec id used for new commits
//
// A threshold of 0 disables it.
//
// ============================================================================

pub const WARN_ON_STREAM_LENGTH_ENV: &str = "EVENT_KERNEL_WARN_ON_STREAM_LENGTH";
pub const ERROR_ON_STREAM_LENGTH_ENV: &str = "EVENT_KERNEL_ERROR_ON_STREAM_LENGTH";
pub const DEFAULT_SERIALIZER_ENV: &str = "EVENT_KERNEL_DEFAULT_SERIALIZER";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventStoreConfig {
    pub warn_on_stream_length: u32,
    pub error_on_stream_length: u32,
    pub default_serializer: String,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            warn_on_stream_length: 0,
            error_on_stream_length: 0,
            default_serializer: JsonSerializer::ID.to_string(),
        }
    }
}

impl EventStoreConfig {
    /// Short streams only; nudges aggregates towards snapshots or splitting.
    pub fn strict() -> Self {
        Self {
            warn_on_stream_length: 500,
            error_on_stream_length: 1000,
            ..Self::default()
        }
    }

    /// Defaults overridden by whatever `EVENT_KERNEL_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(WARN_ON_STREAM_LENGTH_ENV) {
            config.warn_on_stream_length = parse_threshold(WARN_ON_STREAM_LENGTH_ENV, &value)?;
        }
        if let Some(value) = lookup(ERROR_ON_STREAM_LENGTH_ENV) {
            config.error_on_stream_length = parse_threshold(ERROR_ON_STREAM_LENGTH_ENV, &value)?;
        }
        if let Some(value) = lookup(DEFAULT_SERIALIZER_ENV) {
            let value = value.trim();
            if !value.is_empty() {
                config.default_serializer = value.to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.warn_on_stream_length > 0
            && self.error_on_stream_length > 0
            && self.warn_on_stream_length > self.error_on_stream_length
        {
            return Err(EventStoreError::invalid_argument(
                "warn_on_stream_length",
                format!(
                    "warning threshold {} is above the error threshold {}",
                    self.warn_on_stream_length, self.error_on_stream_length
                ),
            ));
        }
        Ok(())
    }

    /// Every built-in codec, with the configured one as default.
    pub fn serializers(&self) -> Result<Serializers> {
        let codecs: Vec<Arc<dyn SerializeEvents>> = vec![Arc::new(JsonSerializer), Arc::new(PackedJsonSerializer)];
        Serializers::new(codecs, &self.default_serializer)
    }
}

fn parse_threshold(name: &'static str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|e| EventStoreError::invalid_argument(name, format!("'{value}' is not a valid length: {e}")))
}
