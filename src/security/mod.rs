//! Host-enforced hardening for the sandbox worker process
//!
//! Agent-authored code runs in a separate interpreter process. The host
//! narrows what that process may do in the forked child, after `fork()` and
//! before `exec()`, so the restrictions hold no matter what the code does.
//!
//! # Security Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 1: RESOURCE LIMITS (setrlimit)                          │
//! │  RLIMIT_AS  ──► address-space ceiling (runaway allocations)     │
//! │  RLIMIT_CPU ──► CPU-seconds ceiling (busy loops)               │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 2: CAPABILITIES                                          │
//! │  Worker keeps no root powers, even when the host runs as root   │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 3: SECCOMP BPF (optional)                                │
//! │                                                                 │
//! │  Worker ──syscall──► Filter ──denied?──► EPERM                  │
//! │                          │                                      │
//! │                          └─other─► Kernel                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Host-side rate limiting of recursive model calls lives in [`rate_limit`].

pub mod capabilities;
pub mod limits;
pub mod rate_limit;
pub mod seccomp;

use std::io;

use tracing::debug;

pub use capabilities::CapabilityDropper;
pub use limits::ResourceLimits;
pub use rate_limit::{RateLimitError, RateLimiter};
pub use seccomp::WorkerSeccomp;

/// Everything applied to a freshly forked worker before `exec()`.
///
/// The seccomp program is compiled up front so that nothing in [`apply`]
/// needs to build data structures in the forked child.
///
/// [`apply`]: WorkerHardening::apply
pub struct WorkerHardening {
    limits: ResourceLimits,
    capabilities: Option<CapabilityDropper>,
    seccomp: Option<seccompiler::BpfProgram>,
}

impl WorkerHardening {
    /// Compile the hardening plan for a worker.
    pub fn prepare(
        limits: ResourceLimits,
        drop_capabilities: bool,
        seccomp: bool,
    ) -> Result<Self, io::Error> {
        let seccomp = if seccomp {
            let filter = WorkerSeccomp::with_worker_denials();
            debug!(denied = ?filter.denied_names(), "Compiling worker seccomp filter");
            Some(filter.build()?)
        } else {
            None
        };
        let capabilities = drop_capabilities.then(CapabilityDropper::all);
        if let Some(dropper) = &capabilities {
            debug!(count = dropper.drop_count(), "Worker capabilities will be cleared");
        }
        Ok(Self {
            limits,
            capabilities,
            seccomp,
        })
    }

    pub fn has_seccomp(&self) -> bool {
        self.seccomp.is_some()
    }

    /// Apply every layer to the calling process. Irreversible.
    ///
    /// Runs inside the forked child; order is limits, capabilities, seccomp,
    /// because the filter would otherwise deny the calls the earlier layers make.
    pub fn apply(&self) -> Result<(), io::Error> {
        self.limits.apply()?;
        if let Some(dropper) = &self.capabilities {
            dropper.apply()?;
        }
        if let Some(program) = &self.seccomp {
            seccompiler::apply_filter(program)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }
        Ok(())
    }
}
