//! The GPU buffer boundary.
//!
//! The render cache never talks to a graphics API directly. It asks a
//! [`GpuDevice`] for buffers and writes bytes into them; everything else
//! (queues, bind groups, memory placement) belongs to the implementor.

use serde::{Deserialize, Serialize};

/// Allowed usages of a buffer, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    /// Source of a buffer-to-buffer copy.
    pub const COPY_SRC: Self = Self(1 << 0);
    /// Destination of CPU writes and copies.
    pub const COPY_DST: Self = Self(1 << 1);
    /// Bound as a vertex buffer.
    pub const VERTEX: Self = Self(1 << 2);
    /// Bound as a uniform buffer.
    pub const UNIFORM: Self = Self(1 << 3);
    /// Bound as a storage buffer.
    pub const STORAGE: Self = Self(1 << 4);

    /// Returns `true` if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How often the CPU is expected to rewrite a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferHint {
    /// Written once, read many times.
    Static,
    /// Partially rewritten most frames.
    #[default]
    Dynamic,
    /// Fully rewritten every frame.
    Stream,
}

/// Parameters for [`GpuDevice::create_buffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Size in bytes.
    pub size: u64,
    /// Usages the buffer must support.
    pub usage: BufferUsage,
    /// Expected update frequency, for memory placement.
    pub hint: BufferHint,
    /// Debug label, e.g. `"render_data.world_matrices"`.
    pub label: Option<String>,
}

/// Errors reported by a GPU device or buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    /// The device could not allocate the requested size.
    #[error("out of GPU memory allocating {requested} bytes")]
    OutOfMemory {
        /// Requested size in bytes.
        requested: u64,
    },

    /// A write would run past the end of the buffer.
    #[error("write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds {
        /// Write offset in bytes.
        offset: u64,
        /// Write length in bytes.
        len: u64,
        /// Buffer size in bytes.
        size: u64,
    },

    /// The buffer was used after `destroy`.
    #[error("buffer has been destroyed")]
    Destroyed,

    /// Any other backend failure.
    #[error("GPU device error: {0}")]
    Device(String),
}

/// Creates GPU buffers.
pub trait GpuDevice: Send + Sync {
    /// Create a buffer described by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns a [`GpuError`] if the backend cannot allocate it.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Box<dyn GpuBuffer>, GpuError>;
}

/// A GPU buffer the CPU can write into.
pub trait GpuBuffer: Send + Sync {
    /// Write `data` starting at `offset_bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`GpuError`] if the write is out of bounds or the buffer is
    /// gone.
    fn update(&mut self, data: &[u8], offset_bytes: u64) -> Result<(), GpuError>;

    /// Release the buffer's GPU memory. Further updates fail.
    fn destroy(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags_combine() {
        let usage = BufferUsage::STORAGE | BufferUsage::COPY_DST;
        assert!(usage.contains(BufferUsage::STORAGE));
        assert!(usage.contains(BufferUsage::COPY_DST));
        assert!(!usage.contains(BufferUsage::VERTEX));
    }

    #[test]
    fn test_hint_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&BufferHint::Stream).unwrap(), "\"stream\"");
        let hint: BufferHint = serde_json::from_str("\"static\"").unwrap();
        assert_eq!(hint, BufferHint::Static);
    }
}
