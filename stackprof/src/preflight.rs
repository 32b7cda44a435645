//! Pre-flight checks for stackprof
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::domain::{Pid, ProfilerError};
use crate::symbolization::SymbolTable;

/// Minimum kernel version: `bpf_get_current_cgroup_id` landed in 4.18
const MIN_KERNEL_VERSION: (u32, u32) = (4, 18);

/// Bytes of kallsyms inspected for redacted addresses
const KALLSYMS_PROBE_BYTES: u64 = 4096;

/// What the run is about to touch
#[derive(Debug, Clone, Copy)]
pub struct PreflightTargets<'a> {
    pub pid: Option<Pid>,
    pub cgroup: Option<&'a Path>,
    pub kallsyms: &'a Path,
}

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// Returns an error for missing privileges, an old kernel, a missing target
/// process or an invalid cgroup directory
pub fn run_preflight_checks(targets: &PreflightTargets<'_>, quiet: bool) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    if let Some(pid) = targets.pid {
        check_process_exists(pid)?;
    }
    if let Some(cgroup) = targets.cgroup {
        check_cgroup_dir(cgroup)?;
    }
    check_kallsyms(targets.kallsyms, quiet);
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF + CAP_PERFMON would also do, but checking capabilities needs
    // more than libc gives us
    bail!(
        "Permission denied: stackprof requires root privileges to load eBPF programs.\n\n\
         Run with: sudo stackprof ..."
    );
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_kernel_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             stackprof requires Linux {}.{} or newer.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// Parse "5.15.0-generic" or "6.1.0-arch1-1" into (major, minor)
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

/// Check if the target process exists
///
/// # Errors
/// Returns [`ProfilerError::ProcessNotFound`] if `/proc/<pid>` is missing
pub fn check_process_exists(pid: Pid) -> Result<()> {
    let proc_path = format!("/proc/{}", pid.0);
    if !Path::new(&proc_path).exists() {
        return Err(ProfilerError::ProcessNotFound(pid)).with_context(|| {
            format!("Is the process still running? Check with: ps -p {}", pid.0)
        });
    }
    Ok(())
}

fn check_cgroup_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        bail!(
            "cgroup directory not found: {}\n\n\
             --cgroup expects a cgroup v2 directory, e.g. /sys/fs/cgroup/system.slice/nginx.service",
            path.display()
        );
    }
    Ok(())
}

/// Warn when kernel frames are going to show up as `Unknown`
fn check_kallsyms(path: &Path, quiet: bool) {
    if quiet {
        return;
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("warning: cannot read {} ({e}), kernel frames will be unresolved", path.display());
            return;
        }
    };

    let probe = SymbolTable::parse(BufReader::new(file.take(KALLSYMS_PROBE_BYTES)));
    if probe.is_redacted() {
        eprintln!(
            "warning: {} shows zero addresses (kernel.kptr_restrict), kernel frames will be unresolved",
            path.display()
        );
    }
}
