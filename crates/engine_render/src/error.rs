//! Render cache error types.

use crate::gpu::GpuError;

/// Errors from [`RenderDataStorage`](crate::RenderDataStorage).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The slot is not allocated.
    #[error("slot {0} is not allocated")]
    InvalidSlot(u32),

    /// No custom field with this name exists.
    #[error("unknown custom field '{0}'")]
    UnknownField(String),

    /// A custom field write supplied the wrong number of values.
    #[error("field '{field}' expects {expected} values, got {actual}")]
    FieldWidthMismatch {
        /// The custom field name.
        field: String,
        /// The field's registered width.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// Custom field widths must be in `1..=16`.
    #[error("field '{field}' has invalid width {width}")]
    InvalidFieldWidth {
        /// The rejected field name.
        field: String,
        /// The requested width.
        width: usize,
    },

    /// The parent assignment would make a slot its own ancestor.
    #[error("parenting slot {slot} under {parent} would create a cycle")]
    ParentCycle {
        /// The slot being parented.
        slot: u32,
        /// The requested parent.
        parent: u32,
    },

    /// A GPU device or buffer call failed.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}
