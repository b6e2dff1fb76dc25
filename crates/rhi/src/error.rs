//! Device-layer error types.

use ash::vk;
use thiserror::Error;

/// Fatal errors raised by the GPU layer.
///
/// Recoverable conditions are not represented here: a stale swapchain is
/// reported through [`crate::swapchain::SurfaceStatus`] and descriptor pool
/// exhaustion through `Option` returns.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Any Vulkan failure code not covered by a more specific variant
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The surface or device cannot satisfy a required configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Swapchain recreation produced different attachment formats
    #[error(
        "Swapchain formats changed on recreation: color {old_color:?} -> {new_color:?}, depth {old_depth:?} -> {new_depth:?}"
    )]
    FormatMismatch {
        old_color: vk::Format,
        new_color: vk::Format,
        old_depth: vk::Format,
        new_depth: vk::Format,
    },

    /// A frame fence did not signal within the configured timeout
    #[error("Timed out after {timeout_ns}ns waiting for GPU fence")]
    FenceTimeout { timeout_ns: u64 },

    #[error("GPU device lost")]
    DeviceLost,

    #[error("Surface error: {0}")]
    Surface(String),
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Vulkan(other),
        }
    }
}

/// Result type alias for device-layer operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
