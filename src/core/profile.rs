//! Performance profiles and the OS policy each one stands for

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest core index an affinity mask can address.
const MAX_MASK_CORES: usize = 64;

/// Scheduling priority bucket for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityClass {
    Idle,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    Realtime,
}

/// I/O priority hint. Values are the kernel's `IO_PRIORITY_HINT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoPriority {
    VeryLow = 0,
    Low = 1,
    Normal = 2,
    Critical = 3,
}

/// The concrete OS settings a profile resolves to on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyTuple {
    pub priority: PriorityClass,
    /// Power throttling (EcoQoS) requested
    pub throttling: bool,
    pub affinity: u64,
    pub io_priority: IoPriority,
}

/// Per-attribute outcome of applying a profile. Each attribute is
/// attempted independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyResult {
    pub applied_priority: bool,
    pub applied_affinity: bool,
    pub applied_throttle: bool,
    pub applied_io_priority: bool,
}

impl PolicyResult {
    pub const ALL_APPLIED: PolicyResult = PolicyResult {
        applied_priority: true,
        applied_affinity: true,
        applied_throttle: true,
        applied_io_priority: true,
    };

    pub fn is_complete(&self) -> bool {
        self.applied_priority
            && self.applied_affinity
            && self.applied_throttle
            && self.applied_io_priority
    }

    pub fn is_total_failure(&self) -> bool {
        !self.applied_priority
            && !self.applied_affinity
            && !self.applied_throttle
            && !self.applied_io_priority
    }
}

/// Resource policy applied to a matched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceProfile {
    /// Lowest priority, throttled, pinned to the last core, low I/O
    Efficiency,
    Normal,
    High,
    /// Highest class the OS grants; without the increase-base-priority
    /// privilege Windows silently downgrades this to High.
    Realtime,
}

impl PerformanceProfile {
    pub const ALL: [PerformanceProfile; 4] = [
        PerformanceProfile::Efficiency,
        PerformanceProfile::Normal,
        PerformanceProfile::High,
        PerformanceProfile::Realtime,
    ];

    /// Resolve the profile for a machine with `cores` logical processors.
    pub fn policy(self, cores: usize) -> PolicyTuple {
        match self {
            PerformanceProfile::Efficiency => PolicyTuple {
                priority: PriorityClass::Idle,
                throttling: true,
                affinity: last_core_mask(cores),
                io_priority: IoPriority::Low,
            },
            PerformanceProfile::Normal => PolicyTuple {
                priority: PriorityClass::Normal,
                throttling: false,
                affinity: all_cores_mask(cores),
                io_priority: IoPriority::Normal,
            },
            PerformanceProfile::High => PolicyTuple {
                priority: PriorityClass::High,
                throttling: false,
                affinity: all_cores_mask(cores),
                io_priority: IoPriority::Normal,
            },
            PerformanceProfile::Realtime => PolicyTuple {
                priority: PriorityClass::Realtime,
                throttling: false,
                affinity: all_cores_mask(cores),
                io_priority: IoPriority::Critical,
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PerformanceProfile::Efficiency => "Efficiency",
            PerformanceProfile::Normal => "Normal",
            PerformanceProfile::High => "High",
            PerformanceProfile::Realtime => "Realtime",
        }
    }
}

impl fmt::Display for PerformanceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PerformanceProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "efficiency" | "eco" => Ok(PerformanceProfile::Efficiency),
            "normal" => Ok(PerformanceProfile::Normal),
            "high" => Ok(PerformanceProfile::High),
            "realtime" | "maximum" => Ok(PerformanceProfile::Realtime),
            other => Err(format!("unknown profile '{}'", other)),
        }
    }
}

/// Mask with every addressable core set.
pub fn all_cores_mask(cores: usize) -> u64 {
    match cores.clamp(1, MAX_MASK_CORES) {
        MAX_MASK_CORES => u64::MAX,
        n => (1u64 << n) - 1,
    }
}

/// Mask with only the last addressable core set.
pub fn last_core_mask(cores: usize) -> u64 {
    1u64 << (cores.clamp(1, MAX_MASK_CORES) - 1)
}

/// Logical processor count of this machine.
pub fn logical_cores() -> usize {
    num_cpus::get().max(1)
}
