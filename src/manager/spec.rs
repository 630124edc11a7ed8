//! Deployment specification and its load-time normalization
//!
//! A [`ModelSpec`] is what callers ask for. [`ModelSpec::resolve`] turns it into
//! the spec the manager actually loads: one concrete device, one precision and
//! quantization flags the device can honor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceRequest {
    #[default]
    Cpu,
    /// Accelerator when available, CPU otherwise
    Auto,
    /// Explicit CUDA ordinal
    Cuda(usize),
}

impl FromStr for DeviceRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "auto" => Ok(Self::Auto),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|ordinal| ordinal.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| {
                    format!("unrecognized device '{s}' (expected cpu, auto, cuda or cuda:N)")
                }),
        }
    }
}

impl TryFrom<String> for DeviceRequest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceRequest> for String {
    fn from(value: DeviceRequest) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Auto => write!(f, "auto"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Concrete device a model is loaded on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDevice {
    Cpu,
    Cuda(usize),
}

impl Serialize for ResolvedDevice {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl ResolvedDevice {
    /// Resolve a request against the accelerators this process can use.
    /// An unavailable accelerator falls back to CPU.
    pub fn resolve(request: DeviceRequest, accelerator_available: bool) -> Self {
        match request {
            DeviceRequest::Cpu => Self::Cpu,
            DeviceRequest::Auto | DeviceRequest::Cuda(_) if !accelerator_available => Self::Cpu,
            DeviceRequest::Auto => Self::Cuda(0),
            DeviceRequest::Cuda(ordinal) => Self::Cuda(ordinal),
        }
    }

    pub fn is_cpu(&self) -> bool {
        matches!(self, Self::Cpu)
    }
}

impl fmt::Display for ResolvedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Floating-point precision for all model weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
    Bf16,
}

impl Precision {
    pub fn bytes_per_element(&self) -> u64 {
        match self {
            Self::F32 => 4,
            Self::F16 | Self::Bf16 => 2,
        }
    }

    /// Parse a `torch_dtype` value from a HuggingFace `config.json`
    pub fn from_torch_dtype(value: &str) -> Option<Self> {
        match value {
            "float32" | "f32" => Some(Self::F32),
            "float16" | "f16" | "half" => Some(Self::F16),
            "bfloat16" | "bf16" => Some(Self::Bf16),
            _ => None,
        }
    }

    /// The single precision a model is normalized to on `device`
    pub fn normalize(requested: Option<Self>, device: ResolvedDevice) -> Self {
        match device {
            ResolvedDevice::Cpu => Self::F32,
            ResolvedDevice::Cuda(_) => requested.unwrap_or(Self::F16),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => write!(f, "f32"),
            Self::F16 => write!(f, "f16"),
            Self::Bf16 => write!(f, "bf16"),
        }
    }
}

/// What to deploy and how
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Hub identifier, e.g. "TinyLlama/TinyLlama-1.1B-Chat-v1.0"
    #[serde(alias = "model_name")]
    pub identifier: String,

    #[serde(default)]
    pub device: DeviceRequest,

    #[serde(default)]
    pub load_in_8bit: bool,

    #[serde(default)]
    pub load_in_4bit: bool,

    #[serde(default)]
    pub trust_remote_code: bool,

    /// Preferred precision on accelerators; CPU always uses f32
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<Precision>,

    /// Hub revision, defaults to `main`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Hub access token for gated repositories
    #[serde(default, alias = "hf_token", skip_serializing)]
    pub token: Option<String>,
}

// Hand-written so the access token never reaches logs
impl fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSpec")
            .field("identifier", &self.identifier)
            .field("device", &self.device)
            .field("load_in_8bit", &self.load_in_8bit)
            .field("load_in_4bit", &self.load_in_4bit)
            .field("trust_remote_code", &self.trust_remote_code)
            .field("dtype", &self.dtype)
            .field("revision", &self.revision)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ModelSpec {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            device: DeviceRequest::Cpu,
            load_in_8bit: false,
            load_in_4bit: false,
            trust_remote_code: false,
            dtype: None,
            revision: None,
            token: None,
        }
    }

    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or("main")
    }

    /// Normalize the spec for loading on a host with or without an accelerator
    pub fn resolve(&self, accelerator_available: bool) -> ResolvedSpec {
        let device = ResolvedDevice::resolve(self.device, accelerator_available);
        let mut spec = self.clone();
        spec.identifier = spec.identifier.trim().to_string();

        if device.is_cpu() {
            if spec.load_in_8bit || spec.load_in_4bit {
                tracing::warn!(
                    model = %spec.identifier,
                    load_in_8bit = spec.load_in_8bit,
                    load_in_4bit = spec.load_in_4bit,
                    "Quantization is not available on CPU, loading at full precision"
                );
            }
            spec.load_in_8bit = false;
            spec.load_in_4bit = false;
        } else if spec.load_in_8bit && spec.load_in_4bit {
            tracing::warn!(
                model = %spec.identifier,
                "Both 8-bit and 4-bit quantization requested, using 4-bit"
            );
            spec.load_in_8bit = false;
        }

        if device.is_cpu()
            && let Some(requested) = spec.dtype
            && requested != Precision::F32
        {
            tracing::warn!(
                model = %spec.identifier,
                requested = %requested,
                "CPU inference runs in f32, ignoring requested dtype"
            );
        }

        let precision = Precision::normalize(spec.dtype, device);
        spec.dtype = Some(precision);

        ResolvedSpec {
            spec,
            device,
            precision,
        }
    }
}

/// A spec after device, quantization and precision normalization
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSpec {
    pub spec: ModelSpec,
    pub device: ResolvedDevice,
    pub precision: Precision,
}

impl ResolvedSpec {
    pub fn is_quantized(&self) -> bool {
        self.spec.load_in_8bit || self.spec.load_in_4bit
    }

    /// Clear both quantization flags for a backend that cannot apply them
    pub fn without_quantization(mut self) -> Self {
        if self.is_quantized() {
            tracing::warn!(
                model = %self.spec.identifier,
                load_in_8bit = self.spec.load_in_8bit,
                load_in_4bit = self.spec.load_in_4bit,
                dtype = %self.precision,
                "Quantized loading is not available in this backend, loading unquantized"
            );
        }
        self.spec.load_in_8bit = false;
        self.spec.load_in_4bit = false;
        self
    }
}
