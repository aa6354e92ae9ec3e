//! Seccomp BPF deny-list for the sandbox worker
//!
//! # What is Seccomp?
//!
//! Seccomp (Secure Computing) is a Linux kernel feature that restricts
//! which system calls a process can make. The worker interpreter needs a
//! broad, version-dependent set of syscalls, so instead of an allow-list
//! we deny the few families agent code has no business using: networking,
//! process tracing, mounts, identity changes and kernel modules.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  ┌──────────┐     ┌─────────────┐     ┌──────────────┐         │
//! │  │ Syscall  │────►│ BPF Program │────►│ Decision     │         │
//! │  │ (socket, │     │ (deny-list) │     │ EPERM or     │         │
//! │  │  read)   │     └─────────────┘     │ ALLOW        │         │
//! │  └──────────┘                         └──────────────┘         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Denied calls fail with `EPERM`, which the interpreter surfaces as an
//! ordinary `PermissionError` inside the agent's code.

use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
use std::convert::TryInto;
use std::io;

// ═══════════════════════════════════════════════════════════════════════════
// WorkerSeccomp
// ═══════════════════════════════════════════════════════════════════════════
// WHAT IT IS:
//   A builder for a deny-list filter installed in the worker just before
//   exec(python). The filter survives exec, so execve itself must stay
//   allowed or the interpreter would never start.
// ═══════════════════════════════════════════════════════════════════════════

pub struct WorkerSeccomp {
    denied_syscalls: Vec<(&'static str, i64)>,
}

impl WorkerSeccomp {
    /// Empty deny-list; builds a filter that allows everything.
    fn new() -> Self {
        Self {
            denied_syscalls: Vec::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // with_worker_denials() - Pre-configured for the sandbox worker
    // ═══════════════════════════════════════════════════════════════════════
    // SYSCALL CATEGORIES:
    //   1. Network: socket, connect, bind, listen, accept
    //   2. Tracing: ptrace, process_vm_*
    //   3. Filesystems: mount, umount2, pivot_root, chroot
    //   4. Identity: setuid, setgid
    //   5. Kernel: modules, kexec, reboot, bpf, perf
    //   6. Namespaces: unshare, setns
    // ═══════════════════════════════════════════════════════════════════════
    pub fn with_worker_denials() -> Self {
        let mut filter = Self::new();

        // ─────────────────────────────────────────────────────────────────
        // Network - host functions are the only way out
        // ─────────────────────────────────────────────────────────────────
        filter.deny("socket", libc::SYS_socket);
        filter.deny("socketpair", libc::SYS_socketpair);
        filter.deny("connect", libc::SYS_connect);
        filter.deny("bind", libc::SYS_bind);
        filter.deny("listen", libc::SYS_listen);
        filter.deny("accept", libc::SYS_accept);
        filter.deny("accept4", libc::SYS_accept4);

        // ─────────────────────────────────────────────────────────────────
        // Tracing other processes
        // ─────────────────────────────────────────────────────────────────
        filter.deny("ptrace", libc::SYS_ptrace);
        filter.deny("process_vm_readv", libc::SYS_process_vm_readv);
        filter.deny("process_vm_writev", libc::SYS_process_vm_writev);

        // ─────────────────────────────────────────────────────────────────
        // Filesystem topology
        // ─────────────────────────────────────────────────────────────────
        filter.deny("mount", libc::SYS_mount);
        filter.deny("umount2", libc::SYS_umount2);
        filter.deny("pivot_root", libc::SYS_pivot_root);
        filter.deny("chroot", libc::SYS_chroot);

        // ─────────────────────────────────────────────────────────────────
        // Identity
        // ─────────────────────────────────────────────────────────────────
        filter.deny("setuid", libc::SYS_setuid);
        filter.deny("setgid", libc::SYS_setgid);

        // ─────────────────────────────────────────────────────────────────
        // Kernel
        // ─────────────────────────────────────────────────────────────────
        filter.deny("init_module", libc::SYS_init_module);
        filter.deny("finit_module", libc::SYS_finit_module);
        filter.deny("delete_module", libc::SYS_delete_module);
        filter.deny("kexec_load", libc::SYS_kexec_load);
        filter.deny("reboot", libc::SYS_reboot);
        filter.deny("bpf", libc::SYS_bpf);
        filter.deny("perf_event_open", libc::SYS_perf_event_open);

        // ─────────────────────────────────────────────────────────────────
        // Namespaces
        // ─────────────────────────────────────────────────────────────────
        filter.deny("unshare", libc::SYS_unshare);
        filter.deny("setns", libc::SYS_setns);

        filter
    }

    /// Add a syscall to the deny-list.
    fn deny(&mut self, name: &'static str, syscall: i64) -> &mut Self {
        self.denied_syscalls.push((name, syscall));
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // build() - Compile the filter into BPF bytecode
    // ═══════════════════════════════════════════════════════════════════════
    // ```text
    // ┌─────────────────────────────────────────────────────────┐
    // │  SeccompFilter                                          │
    // │    mismatch_action: Allow                               │
    // │    match_action: Errno(EPERM)                           │
    // │    rules:                                               │
    // │      socket  → [] (empty = always match)                │
    // │      ptrace  → []                                       │
    // │      (anything else) → Allow                            │
    // └─────────────────────────────────────────────────────────┘
    // ```
    // ═══════════════════════════════════════════════════════════════════════
    pub fn build(&self) -> Result<BpfProgram, io::Error> {
        let rules: Vec<(i64, Vec<SeccompRule>)> = self
            .denied_syscalls
            .iter()
            .map(|&(_, syscall)| (syscall, vec![]))
            .collect();

        let arch: TargetArch = std::env::consts::ARCH
            .try_into()
            .map_err(|e: seccompiler::BackendError| {
                io::Error::new(io::ErrorKind::Other, e.to_string())
            })?;

        let filter = SeccompFilter::new(
            rules.into_iter().collect(),
            SeccompAction::Allow,
            SeccompAction::Errno(libc::EPERM as u32),
            arch,
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        filter
            .try_into()
            .map_err(|e: seccompiler::BackendError| {
                io::Error::new(io::ErrorKind::Other, e.to_string())
            })
    }

    /// Names of denied syscalls (for logging)
    pub fn denied_names(&self) -> Vec<&'static str> {
        self.denied_syscalls.iter().map(|&(name, _)| name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        let filter = WorkerSeccomp::with_worker_denials();
        let result = filter.build();
        assert!(result.is_ok(), "Failed to build filter: {:?}", result.err());
    }

    #[test]
    fn test_denials_cover_networking() {
        let names = WorkerSeccomp::with_worker_denials().denied_names();
        assert!(names.contains(&"socket"));
        assert!(names.contains(&"connect"));
        assert!(!names.contains(&"execve"));
    }

    #[test]
    fn test_custom_filter() {
        let mut filter = WorkerSeccomp::new();
        filter
            .deny("socket", libc::SYS_socket)
            .deny("ptrace", libc::SYS_ptrace);
        assert_eq!(filter.denied_names(), vec!["socket", "ptrace"]);
        assert!(filter.build().is_ok());
    }
}
