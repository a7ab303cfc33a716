#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Candidate devices tried by a scenario when no list is configured.
pub const DEFAULT_CANDIDATES: [&str; 6] = ["llvm", "nvptx", "cuda", "opencl", "metal", "rocm"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn kind(&self) -> TargetKind {
        TargetKind::from_device(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[must_use]
pub fn default_candidates() -> Vec<DeviceId> {
    DEFAULT_CANDIDATES.iter().copied().map(DeviceId::new).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Llvm,
    Nvptx,
    Cuda,
    Opencl,
    Metal,
    Rocm,
    Vulkan,
    Other(String),
}

impl TargetKind {
    #[must_use]
    pub fn from_device(device: &str) -> Self {
        // Only the leading token names the backend: "llvm -mcpu=skylake" is llvm.
        let head = device.split_whitespace().next().unwrap_or_default();
        match head {
            "llvm" => Self::Llvm,
            "nvptx" => Self::Nvptx,
            "cuda" => Self::Cuda,
            "opencl" => Self::Opencl,
            "metal" => Self::Metal,
            "rocm" => Self::Rocm,
            "vulkan" => Self::Vulkan,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Llvm => "llvm",
            Self::Nvptx => "nvptx",
            Self::Cuda => "cuda",
            Self::Opencl => "opencl",
            Self::Metal => "metal",
            Self::Rocm => "rocm",
            Self::Vulkan => "vulkan",
            Self::Other(name) => name,
        }
    }

    /// Targets whose code runs on the host CPU.
    #[must_use]
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Llvm)
    }
}

/// Compilation destination for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    device_id: DeviceId,
    kind: TargetKind,
}

impl TargetDescriptor {
    #[must_use]
    pub fn new(device_id: DeviceId) -> Self {
        let kind = device_id.kind();
        Self { device_id, kind }
    }

    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    #[must_use]
    pub fn kind(&self) -> &TargetKind {
        &self.kind
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target({})", self.device_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceContext {
    device_id: DeviceId,
    ordinal: u32,
}

impl DeviceContext {
    #[must_use]
    pub fn new(device_id: DeviceId, ordinal: u32) -> Self {
        Self { device_id, ordinal }
    }

    /// Ordinal 0 of `device_id`.
    #[must_use]
    pub fn primary(device_id: DeviceId) -> Self {
        Self::new(device_id, 0)
    }

    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    #[must_use]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_id, self.ordinal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub available: bool,
    pub target: TargetDescriptor,
}

/// Maps a device identifier to a target and reports whether the runtime can
/// currently use it. Implementations must query availability on every call.
pub trait TargetResolver {
    fn resolve_target(&self, device: &DeviceId) -> Resolution;
}

impl<T: TargetResolver + ?Sized> TargetResolver for &T {
    fn resolve_target(&self, device: &DeviceId) -> Resolution {
        (**self).resolve_target(device)
    }
}

/// Resolver backed by a fixed availability set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticResolver {
    available: BTreeSet<DeviceId>,
}

impl StaticResolver {
    #[must_use]
    pub fn new<I, D>(available: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DeviceId>,
    {
        Self {
            available: available.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_available(&self, device: &DeviceId) -> bool {
        self.available.contains(device)
    }
}

impl TargetResolver for StaticResolver {
    fn resolve_target(&self, device: &DeviceId) -> Resolution {
        Resolution {
            available: self.is_available(device),
            target: TargetDescriptor::new(device.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    Mismatch {
        expected: DeviceContext,
        actual: DeviceContext,
    },
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch { expected, actual } => {
                write!(f, "device mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for DeviceError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGuard {
    context: DeviceContext,
}

impl DeviceGuard {
    #[must_use]
    pub fn new(context: DeviceContext) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn ensure_context(&self, actual: &DeviceContext) -> Result<(), DeviceError> {
        if actual != &self.context {
            return Err(DeviceError::Mismatch {
                expected: self.context.clone(),
                actual: actual.clone(),
            });
        }
        Ok(())
    }
}
