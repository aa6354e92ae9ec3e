//! Linux capability clearing for the sandbox worker
//!
//! # Capability Sets
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Permitted (P)    │ Maximum caps this process CAN have          │
//! ├───────────────────┼─────────────────────────────────────────────┤
//! │  Effective (E)    │ Caps currently ACTIVE right now             │
//! ├───────────────────┼─────────────────────────────────────────────┤
//! │  Inheritable (I)  │ Caps passed to child processes after exec   │
//! ├───────────────────┼─────────────────────────────────────────────┤
//! │  Bounding (B)     │ Absolute limit (cannot be exceeded)         │
//! └───────────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! The worker needs no capability at all, so when the host runs with
//! privileges every capability is removed from every set in the forked
//! child. For an unprivileged host the sets are already empty and
//! [`CapabilityDropper::apply`] is a no-op.

use std::io;

use caps::{CapSet, Capability, CapsHashSet};

// ═══════════════════════════════════════════════════════════════════════════
// CapabilityDropper
// ═══════════════════════════════════════════════════════════════════════════
// USAGE:
//   Built in the parent. Call apply() AFTER forking but BEFORE exec(python),
//   from WorkerHardening::apply. Both sets are allocated up front so the
//   forked child only issues prctl/capset calls.
// ═══════════════════════════════════════════════════════════════════════════

pub struct CapabilityDropper {
    /// Removed from the bounding set one by one (prctl has no bulk form)
    bounding: Vec<Capability>,

    /// Installed as Effective, Inheritable and Permitted
    remaining: CapsHashSet,
}

impl CapabilityDropper {
    /// Drop every capability known to the caps crate.
    pub fn all() -> Self {
        let mut bounding: Vec<Capability> = caps::all().into_iter().collect();
        bounding.sort_by_key(|cap| cap.index());
        Self {
            bounding,
            remaining: CapsHashSet::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // apply() - Actually drop the capabilities
    // ═══════════════════════════════════════════════════════════════════════
    // ORDER:
    //   1. Bounding  (needs CAP_SETPCAP; failures ignored)
    //   2. Ambient   (older kernels lack it; failures ignored)
    //   3. Effective (must shrink before Permitted)
    //   4. Inheritable
    //   5. Permitted
    //
    // ⚠️ WARNING:
    //   IRREVERSIBLE for the calling process.
    // ═══════════════════════════════════════════════════════════════════════
    pub fn apply(&self) -> Result<(), io::Error> {
        for &cap in &self.bounding {
            let _ = caps::drop(None, CapSet::Bounding, cap);
        }
        let _ = caps::clear(None, CapSet::Ambient);

        for set in [CapSet::Effective, CapSet::Inheritable, CapSet::Permitted] {
            caps::set(None, set, &self.remaining)
                .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))?;
        }
        Ok(())
    }

    /// Capabilities removed from the bounding set.
    pub fn drop_count(&self) -> usize {
        self.bounding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_dangerous_caps() {
        let dropper = CapabilityDropper::all();
        assert!(dropper.drop_count() > 30);
        assert!(dropper.bounding.contains(&Capability::CAP_SYS_ADMIN));
        assert!(dropper.bounding.contains(&Capability::CAP_NET_RAW));
        assert!(dropper.remaining.is_empty());
    }

    #[test]
    fn test_bounding_order_is_stable() {
        let dropper = CapabilityDropper::all();
        assert!(dropper.bounding.windows(2).all(|w| w[0].index() < w[1].index()));
    }
}
