//! Type-specific samplers refreshing a service's last observation.
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use sysinfo::{ProcessesToUpdate, System};
use tracing::trace;

use crate::command;
use crate::observe;
use crate::service::{CommandSpec, RuleTest, Service, ServiceType};

/// Default connect timeout for host probes without a connection rule.
const DEFAULT_PROBE_TIMEOUT: u64 = 5;

/// Default budget for running a Program service's executable.
const DEFAULT_PROGRAM_TIMEOUT: u64 = 300;

/// Holds the process-table snapshot reused across cycles so per-process
/// CPU percentages are deltas rather than zeros.
pub struct Sampler {
    system: System,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refreshes `service.info` according to the service type. A sampling
    /// failure is reported as a message for a Failed event; the cycle
    /// continues.
    pub fn refresh(
        &mut self,
        service: &mut Service,
        stop: &AtomicBool,
    ) -> Result<(), String> {
        match service.kind {
            ServiceType::Process => self.refresh_process(service),
            ServiceType::File
            | ServiceType::Directory
            | ServiceType::Fifo => refresh_path(service),
            ServiceType::Filesystem => refresh_filesystem(service),
            ServiceType::Host | ServiceType::Network => refresh_connection(service),
            ServiceType::Program => refresh_program(service, stop),
            ServiceType::System => self.refresh_system(service),
        }
    }

    fn refresh_process(&mut self, service: &mut Service) -> Result<(), String> {
        let pid = observe::is_running(service, true);
        if pid == 0 {
            service.info.reset();
            return Ok(());
        }
        service.info.pid = pid;

        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let target = sysinfo::Pid::from_u32(pid);
        let Some(proc) = self.system.process(target) else {
            return Err(format!("failed to sample process {pid}"));
        };
        service.info.mem_kbyte = proc.memory() / 1024;
        service.info.cpu_percent = proc.cpu_usage();
        service.info.children = self
            .system
            .processes()
            .values()
            .filter(|p| p.parent() == Some(target))
            .count() as u32;
        trace!(
            "'{}' pid {} rss {}kB cpu {:.1}% children {}",
            service.name,
            pid,
            service.info.mem_kbyte,
            service.info.cpu_percent,
            service.info.children
        );
        Ok(())
    }

    fn refresh_system(&mut self, service: &mut Service) -> Result<(), String> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();
        service.info.mem_kbyte = self.system.used_memory() / 1024;
        service.info.cpu_percent = self.system.global_cpu_usage();
        Ok(())
    }
}

fn refresh_path(service: &mut Service) -> Result<(), String> {
    let Some(path) = &service.path else {
        return Err("no path configured".to_string());
    };
    let meta = std::fs::metadata(path).map_err(|e| format!("cannot read {path:?}: {e}"))?;
    service.info.size = meta.len();
    service.info.mode = meta.permissions().mode() & 0o7777;
    service.info.inode = meta.ino();

    if wants_checksum(service) {
        let data =
            std::fs::read(path).map_err(|e| format!("cannot checksum {path:?}: {e}"))?;
        let digest = Sha256::digest(&data);
        service.info.checksum = Some(format!("{digest:x}"));
    }
    Ok(())
}

fn wants_checksum(service: &Service) -> bool {
    service
        .rules
        .iter()
        .any(|rule| matches!(rule.test, RuleTest::Checksum { .. }))
}

fn refresh_filesystem(service: &mut Service) -> Result<(), String> {
    let Some(path) = &service.path else {
        return Err("no mount point configured".to_string());
    };
    let stat = nix::sys::statvfs::statvfs(path.as_path())
        .map_err(|e| format!("cannot stat filesystem {path:?}: {e}"))?;
    let total = stat.blocks() as f64;
    if total > 0.0 {
        let used = total - stat.blocks_available() as f64;
        service.info.space_percent = (used / total * 100.0) as f32;
    }
    Ok(())
}

fn refresh_connection(service: &mut Service) -> Result<(), String> {
    let Some(address) = &service.address else {
        return Err("no address configured".to_string());
    };
    let port = service.port.unwrap_or(0);
    let timeout = service
        .rules
        .iter()
        .find_map(|rule| match rule.test {
            RuleTest::Connection { timeout } => Some(timeout),
            _ => None,
        })
        .unwrap_or(DEFAULT_PROBE_TIMEOUT);

    let target = format!("{address}:{port}");
    let addr = target
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve {target}: {e}"))?
        .next()
        .ok_or_else(|| format!("cannot resolve {target}"))?;

    let started = Instant::now();
    match TcpStream::connect_timeout(&addr, Duration::from_secs(timeout)) {
        Ok(_) => {
            service.info.response_ms = Some(started.elapsed().as_millis() as u64);
            Ok(())
        }
        Err(_) => {
            service.info.response_ms = None;
            Ok(())
        }
    }
}

fn refresh_program(service: &mut Service, stop: &AtomicBool) -> Result<(), String> {
    let Some(path) = &service.path else {
        return Err("no program configured".to_string());
    };
    let spec = CommandSpec {
        argv: vec![path.to_string_lossy().to_string()],
        uid: None,
        gid: None,
        timeout: DEFAULT_PROGRAM_TIMEOUT,
    };
    let mut timeout_us = (spec.timeout as i64) * 1_000_000;
    let outcome = command::execute(&spec, &[], &mut timeout_us, stop);
    service.info.exit_status = Some(outcome.status);
    Ok(())
}
