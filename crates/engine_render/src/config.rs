//! Render cache configuration.

use serde::{Deserialize, Serialize};

use crate::gpu::BufferHint;

/// Configuration for a [`RenderDataStorage`](crate::RenderDataStorage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderStorageConfig {
    /// Slots available before the first growth.
    pub initial_capacity: u32,
    /// Prefix for GPU buffer labels. A buffer is labelled `"{prefix}.{field}"`.
    pub label_prefix: String,
    /// Upload hint passed to every buffer the cache creates.
    pub upload_hint: BufferHint,
}

impl RenderStorageConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn with_initial_capacity(mut self, capacity: u32) -> Self {
        self.initial_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_upload_hint(mut self, hint: BufferHint) -> Self {
        self.upload_hint = hint;
        self
    }
}

impl Default for RenderStorageConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            label_prefix: "render_data".to_string(),
            upload_hint: BufferHint::Dynamic,
        }
    }
}
