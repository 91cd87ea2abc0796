//! Error types for gridflock.
//!
//! This module provides error types for configuration validation, buffer
//! allocation, the sort self-test and the optional GPU backend.

use std::fmt;

/// Errors found while validating a [`FlockConfig`](crate::FlockConfig).
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A field that must be strictly positive was zero or negative.
    NonPositive { field: &'static str, value: f32 },
    /// A field was NaN or infinite.
    NonFinite { field: &'static str },
    /// The population is empty.
    ZeroAgents,
    /// Batch size must be at least one agent.
    ZeroBatchSize,
    /// A worker pool of zero threads was requested.
    ZeroThreads,
    /// The derived grid has more cells than a `u32` cell id can address.
    GridTooLarge { side: u64 },
    /// A GPU kernel would need more workgroups than the device allows in one dimension.
    DispatchTooLarge { kernel: &'static str, workgroups: u32, limit: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NonPositive { field, value } => {
                write!(f, "`{}` must be positive, got {}", field, value)
            }
            ConfigError::NonFinite { field } => write!(f, "`{}` must be finite", field),
            ConfigError::ZeroAgents => write!(f, "agent count must be at least 1"),
            ConfigError::ZeroBatchSize => write!(f, "batch size must be at least 1"),
            ConfigError::ZeroThreads => write!(f, "thread count must be at least 1 when set"),
            ConfigError::GridTooLarge { side } => write!(
                f,
                "grid of {}^3 cells does not fit 32-bit cell ids; increase the interaction radii or shrink the domain",
                side
            ),
            ConfigError::DispatchTooLarge { kernel, workgroups, limit } => write!(
                f,
                "{} needs {} workgroups but the device allows {}; increase the interaction radii or reduce the agent count",
                kernel, workgroups, limit
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors reported by the key/value sort self-test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortError {
    /// Keys were not in ascending order after sorting.
    Unordered { sorter: &'static str, index: usize },
    /// A value no longer sits next to the key it was submitted with.
    PairBroken { sorter: &'static str, index: usize },
    /// A value was lost or duplicated.
    NotAPermutation { sorter: &'static str, value: u32 },
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::Unordered { sorter, index } => {
                write!(f, "{} left keys out of order at index {}", sorter, index)
            }
            SortError::PairBroken { sorter, index } => {
                write!(f, "{} separated a value from its key at index {}", sorter, index)
            }
            SortError::NotAPermutation { sorter, value } => {
                write!(f, "{} lost or duplicated value {}", sorter, value)
            }
        }
    }
}

impl std::error::Error for SortError {}

/// Errors that can occur while creating or driving a [`FlockSimulation`](crate::FlockSimulation).
#[derive(Debug)]
pub enum FlockError {
    /// The configuration was rejected.
    Config(ConfigError),
    /// A simulation buffer could not be allocated.
    Allocation { buffer: &'static str, bytes: usize },
    /// Position and velocity arrays handed to the simulation differ in length.
    AgentCountMismatch { positions: usize, velocities: usize },
    /// The dedicated worker pool could not be built.
    ThreadPool(rayon::ThreadPoolBuildError),
    /// The sort strategy failed its self-test.
    Sort(SortError),
}

impl fmt::Display for FlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlockError::Config(e) => write!(f, "Invalid configuration: {}", e),
            FlockError::Allocation { buffer, bytes } => {
                write!(f, "Failed to allocate {} ({} bytes)", buffer, bytes)
            }
            FlockError::AgentCountMismatch { positions, velocities } => write!(
                f,
                "Got {} positions but {} velocities; every agent needs both",
                positions, velocities
            ),
            FlockError::ThreadPool(e) => write!(f, "Failed to build worker pool: {}", e),
            FlockError::Sort(e) => write!(f, "Sort self-test failed: {}", e),
        }
    }
}

impl std::error::Error for FlockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlockError::Config(e) => Some(e),
            FlockError::ThreadPool(e) => Some(e),
            FlockError::Sort(e) => Some(e),
            FlockError::Allocation { .. } | FlockError::AgentCountMismatch { .. } => None,
        }
    }
}

impl From<ConfigError> for FlockError {
    fn from(e: ConfigError) -> Self {
        FlockError::Config(e)
    }
}

impl From<SortError> for FlockError {
    fn from(e: SortError) -> Self {
        FlockError::Sort(e)
    }
}

impl From<rayon::ThreadPoolBuildError> for FlockError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        FlockError::ThreadPool(e)
    }
}

/// Errors that can occur in the GPU backend.
#[cfg(feature = "gpu")]
#[derive(Debug)]
pub enum GpuError {
    /// The configuration was rejected.
    Config(ConfigError),
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// Failed to map buffer for reading.
    BufferMapping(String),
    /// A pass failed validation or execution on the device.
    Execution { pass: &'static str, message: String },
    /// Position and velocity arrays differ in length.
    AgentCountMismatch { positions: usize, velocities: usize },
    /// Seeding the agents on the host failed.
    Host(FlockError),
}

#[cfg(feature = "gpu")]
impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::Config(e) => write!(f, "Invalid configuration: {}", e),
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
            GpuError::Execution { pass, message } => {
                write!(f, "GPU pass `{}` failed: {}", pass, message)
            }
            GpuError::AgentCountMismatch { positions, velocities } => write!(
                f,
                "Got {} positions but {} velocities; every agent needs both",
                positions, velocities
            ),
            GpuError::Host(e) => write!(f, "Host setup failed: {}", e),
        }
    }
}

#[cfg(feature = "gpu")]
impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::Config(e) => Some(e),
            GpuError::DeviceCreation(e) => Some(e),
            GpuError::Host(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "gpu")]
impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

#[cfg(feature = "gpu")]
impl From<ConfigError> for GpuError {
    fn from(e: ConfigError) -> Self {
        GpuError::Config(e)
    }
}

#[cfg(feature = "gpu")]
impl From<FlockError> for GpuError {
    fn from(e: FlockError) -> Self {
        GpuError::Host(e)
    }
}
