//! Resource ceilings for the worker process (setrlimit)

use std::io;

/// Address-space and CPU-time caps. `None` leaves the inherited limit alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: Option<u64>,
    pub cpu_seconds: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: Some(2048 * 1024 * 1024),
            cpu_seconds: Some(600),
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self {
            memory_bytes: None,
            cpu_seconds: None,
        }
    }

    /// Set soft and hard limits on the calling process.
    ///
    /// Only raw `setrlimit` calls happen here so it is usable after `fork()`.
    pub fn apply(&self) -> Result<(), io::Error> {
        if let Some(bytes) = self.memory_bytes {
            set_limit(libc::RLIMIT_AS, bytes)?;
        }
        if let Some(secs) = self.cpu_seconds {
            set_limit(libc::RLIMIT_CPU, secs)?;
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(target_os = "linux"))]
type Resource = libc::c_int;

fn set_limit(resource: Resource, value: u64) -> Result<(), io::Error> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    // SAFETY: `limit` is a valid, initialized rlimit for the duration of the call.
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
