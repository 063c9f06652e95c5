//! Capability-based security model for source scripts.
//!
//! Each execution runs under a [`CapabilityPolicy`]: which host capabilities
//! the script may touch plus the resource budgets it must stay within.
//! Policies come from one of three [`PolicyLevel`]s, which in turn are picked
//! from a source's trust rating.
//!
//! Process spawning and dynamic code loading are excluded at every level and
//! cannot be enabled by configuration.

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A host capability a script may try to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Filesystem access (`io.*`, `file.*`, `os.remove`, ...).
    File,

    /// Raw TCP access (`socket.*`).
    Socket,

    /// Interpreter introspection (`debug.*`, `reflect.*`, `collectgarbage`).
    Reflection,

    /// Spawning or controlling processes. Always denied.
    Process,

    /// Loading code at runtime (`require`, `load`, `dofile`). Always denied.
    ClassLoader,

    /// Creating threads. Always denied.
    Thread,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 6] = [
        Capability::File,
        Capability::Socket,
        Capability::Reflection,
        Capability::Process,
        Capability::ClassLoader,
        Capability::Thread,
    ];

    /// Parse a capability from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Capability::File),
            "socket" => Some(Capability::Socket),
            "reflection" => Some(Capability::Reflection),
            "process" => Some(Capability::Process),
            "class_loader" => Some(Capability::ClassLoader),
            "thread" => Some(Capability::Thread),
            _ => None,
        }
    }

    /// Convert capability to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::File => "file",
            Capability::Socket => "socket",
            Capability::Reflection => "reflection",
            Capability::Process => "process",
            Capability::ClassLoader => "class_loader",
            Capability::Thread => "thread",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named trust level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLevel {
    /// No file, socket or reflection access.
    #[default]
    Standard,

    /// File and socket access.
    Compatible,

    /// File, socket and reflection access with larger budgets.
    Trusted,
}

impl PolicyLevel {
    /// Level for a source trust rating using [`TrustThresholds::default`].
    pub fn for_rating(rating: i32) -> Self {
        TrustThresholds::default().level_for(rating)
    }

    pub fn parse(s: &str) -> Result<Self, PolicyError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(PolicyLevel::Standard),
            "compatible" => Ok(PolicyLevel::Compatible),
            "trusted" => Ok(PolicyLevel::Trusted),
            other => Err(PolicyError::UnknownLevel(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyLevel::Standard => "standard",
            PolicyLevel::Compatible => "compatible",
            PolicyLevel::Trusted => "trusted",
        }
    }
}

impl fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from trust rating to [`PolicyLevel`].
///
/// Ratings `1..=trusted_max` are trusted, `trusted_max+1..=compatible_max`
/// compatible, everything else (including zero and negatives) standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholds")]
pub struct TrustThresholds {
    trusted_max: i32,
    compatible_max: i32,
}

#[derive(Deserialize)]
struct RawThresholds {
    trusted_max: i32,
    compatible_max: i32,
}

impl TryFrom<RawThresholds> for TrustThresholds {
    type Error = PolicyError;

    fn try_from(raw: RawThresholds) -> Result<Self, Self::Error> {
        TrustThresholds::new(raw.trusted_max, raw.compatible_max)
    }
}

impl Default for TrustThresholds {
    fn default() -> Self {
        Self {
            trusted_max: 2,
            compatible_max: 4,
        }
    }
}

impl TrustThresholds {
    pub fn new(trusted_max: i32, compatible_max: i32) -> Result<Self, PolicyError> {
        if trusted_max < 1 || compatible_max < trusted_max {
            return Err(PolicyError::InvalidThresholds {
                trusted_max,
                compatible_max,
            });
        }
        Ok(Self {
            trusted_max,
            compatible_max,
        })
    }

    pub fn trusted_max(&self) -> i32 {
        self.trusted_max
    }

    pub fn compatible_max(&self) -> i32 {
        self.compatible_max
    }

    /// Total mapping from rating to level.
    pub fn level_for(&self, rating: i32) -> PolicyLevel {
        if rating < 1 {
            PolicyLevel::Standard
        } else if rating <= self.trusted_max {
            PolicyLevel::Trusted
        } else if rating <= self.compatible_max {
            PolicyLevel::Compatible
        } else {
            PolicyLevel::Standard
        }
    }
}

/// Immutable capability grant plus resource budgets for one execution.
///
/// Deserializes from either a level name (`"trusted"`) or an explicit table;
/// explicit tables are validated and missing fields take the standard
/// level's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicySpec", into = "RawPolicy")]
pub struct CapabilityPolicy {
    allow_file_access: bool,
    allow_socket_access: bool,
    allow_reflection: bool,
    max_stack_depth: u32,
    max_instruction_count: u64,
    timeout_ms: u64,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::for_level(PolicyLevel::Standard)
    }
}

impl CapabilityPolicy {
    /// Build a validated policy.
    pub fn new(
        allow_file_access: bool,
        allow_socket_access: bool,
        allow_reflection: bool,
        max_stack_depth: u32,
        max_instruction_count: u64,
        timeout_ms: u64,
    ) -> Result<Self, PolicyError> {
        if timeout_ms == 0 {
            return Err(PolicyError::InvalidTimeout);
        }
        if max_stack_depth == 0 {
            return Err(PolicyError::InvalidStackDepth);
        }
        if max_instruction_count == 0 {
            return Err(PolicyError::InvalidInstructionCount);
        }
        Ok(Self {
            allow_file_access,
            allow_socket_access,
            allow_reflection,
            max_stack_depth,
            max_instruction_count,
            timeout_ms,
        })
    }

    /// Fixed policy for a level.
    pub fn for_level(level: PolicyLevel) -> Self {
        match level {
            PolicyLevel::Standard => Self {
                allow_file_access: false,
                allow_socket_access: false,
                allow_reflection: false,
                max_stack_depth: 10_000,
                max_instruction_count: 50_000_000,
                timeout_ms: 10_000,
            },
            PolicyLevel::Compatible => Self {
                allow_file_access: true,
                allow_socket_access: true,
                allow_reflection: false,
                max_stack_depth: 10_000,
                max_instruction_count: 50_000_000,
                timeout_ms: 10_000,
            },
            PolicyLevel::Trusted => Self {
                allow_file_access: true,
                allow_socket_access: true,
                allow_reflection: true,
                max_stack_depth: 100_000,
                max_instruction_count: 500_000_000,
                timeout_ms: 30_000,
            },
        }
    }

    /// Policy for a source trust rating using the default thresholds.
    pub fn for_source(rating: i32) -> Self {
        Self::for_level(PolicyLevel::for_rating(rating))
    }

    /// Policy for a source trust rating using custom thresholds.
    pub fn for_source_with(rating: i32, thresholds: &TrustThresholds) -> Self {
        Self::for_level(thresholds.level_for(rating))
    }

    /// Same grants with a different timeout.
    pub fn with_timeout_ms(&self, timeout_ms: u64) -> Result<Self, PolicyError> {
        if timeout_ms == 0 {
            return Err(PolicyError::InvalidTimeout);
        }
        Ok(Self {
            timeout_ms,
            ..self.clone()
        })
    }

    /// Whether `capability` is granted. Process, class loading and threads
    /// are never granted.
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::File => self.allow_file_access,
            Capability::Socket => self.allow_socket_access,
            Capability::Reflection => self.allow_reflection,
            Capability::Process | Capability::ClassLoader | Capability::Thread => false,
        }
    }

    pub fn file_access(&self) -> bool {
        self.allow_file_access
    }

    pub fn socket_access(&self) -> bool {
        self.allow_socket_access
    }

    pub fn reflection(&self) -> bool {
        self.allow_reflection
    }

    /// Always `false`.
    pub fn process_access(&self) -> bool {
        false
    }

    /// Always `false`.
    pub fn class_loader_access(&self) -> bool {
        false
    }

    pub fn max_stack_depth(&self) -> u32 {
        self.max_stack_depth
    }

    pub fn max_instruction_count(&self) -> u64 {
        self.max_instruction_count
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

// ============================================================================
// Serde representation
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum PolicySpec {
    Level(PolicyLevel),
    Explicit(RawPolicy),
}

#[derive(Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawPolicy {
    #[serde(alias = "allow_file_access")]
    allow_file_access: bool,
    #[serde(alias = "allow_socket_access")]
    allow_socket_access: bool,
    #[serde(alias = "allow_reflection")]
    allow_reflection: bool,
    #[serde(alias = "max_stack_depth")]
    max_stack_depth: u32,
    #[serde(alias = "max_instruction_count")]
    max_instruction_count: u64,
    #[serde(alias = "timeout_ms")]
    timeout_ms: u64,
}

impl Default for RawPolicy {
    fn default() -> Self {
        CapabilityPolicy::default().into()
    }
}

impl From<CapabilityPolicy> for RawPolicy {
    fn from(policy: CapabilityPolicy) -> Self {
        Self {
            allow_file_access: policy.allow_file_access,
            allow_socket_access: policy.allow_socket_access,
            allow_reflection: policy.allow_reflection,
            max_stack_depth: policy.max_stack_depth,
            max_instruction_count: policy.max_instruction_count,
            timeout_ms: policy.timeout_ms,
        }
    }
}

impl TryFrom<PolicySpec> for CapabilityPolicy {
    type Error = PolicyError;

    fn try_from(spec: PolicySpec) -> Result<Self, Self::Error> {
        match spec {
            PolicySpec::Level(level) => Ok(CapabilityPolicy::for_level(level)),
            PolicySpec::Explicit(raw) => CapabilityPolicy::new(
                raw.allow_file_access,
                raw.allow_socket_access,
                raw.allow_reflection,
                raw.max_stack_depth,
                raw.max_instruction_count,
                raw.timeout_ms,
            ),
        }
    }
}
