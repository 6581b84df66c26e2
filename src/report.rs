//! Status and summary rendering for the CLI verbs.
use std::sync::atomic::AtomicBool;

use crate::config::RunConfig;
use crate::files;
use crate::sample::Sampler;
use crate::service::{Monitor, Service, ServiceType};
use crate::state::StateFile;

/// Renders either the full per-service report or the one-line summary.
/// Observations are probed live; monitor state comes from the state file
/// a running daemon keeps current.
pub fn render(conf: &RunConfig, services: &mut [Service], summary: bool) -> String {
    let persisted = StateFile::load(&conf.statefile).unwrap_or_default();
    let stop = AtomicBool::new(false);
    let mut sampler = Sampler::new();

    let mut out = String::new();
    match files::daemon_pid(&conf.pidfile) {
        Some(pid) => out.push_str(&format!("The vigil daemon is running with pid {pid}\n")),
        None => out.push_str("The vigil daemon is not running\n"),
    }
    out.push('\n');

    for service in services.iter_mut() {
        if let Some(entry) = persisted.services.get(&service.name) {
            service.monitor = entry.monitor;
        }
        let _ = sampler.refresh(service, &stop);

        if summary {
            out.push_str(&format!(
                "{:<12} '{}'{:<24} {}\n",
                type_label(service.kind),
                service.name,
                "",
                status_label(service)
            ));
        } else {
            out.push_str(&render_full(service));
            out.push('\n');
        }
    }
    out
}

fn render_full(service: &Service) -> String {
    let mut out = format!("{} '{}'\n", type_label(service.kind), service.name);
    out.push_str(&format!("  status        {}\n", status_label(service)));
    out.push_str(&format!(
        "  monitoring    {}\n",
        monitor_label(service.monitor)
    ));
    match service.kind {
        ServiceType::Process => {
            if service.info.pid != 0 {
                out.push_str(&format!("  pid           {}\n", service.info.pid));
                out.push_str(&format!(
                    "  memory        {} kB\n",
                    service.info.mem_kbyte
                ));
                out.push_str(&format!(
                    "  cpu           {:.1}%\n",
                    service.info.cpu_percent
                ));
                out.push_str(&format!("  children      {}\n", service.info.children));
            }
        }
        ServiceType::File | ServiceType::Directory | ServiceType::Fifo => {
            out.push_str(&format!("  size          {} B\n", service.info.size));
            out.push_str(&format!("  mode          {:04o}\n", service.info.mode));
        }
        ServiceType::Filesystem => {
            out.push_str(&format!(
                "  space usage   {:.1}%\n",
                service.info.space_percent
            ));
        }
        ServiceType::Host | ServiceType::Network => {
            if let Some(ms) = service.info.response_ms {
                out.push_str(&format!("  response      {ms} ms\n"));
            }
        }
        ServiceType::Program => {
            if let Some(status) = service.info.exit_status {
                out.push_str(&format!("  exit status   {status}\n"));
            }
        }
        ServiceType::System => {
            out.push_str(&format!(
                "  load          {:.1}% cpu, {} kB used\n",
                service.info.cpu_percent, service.info.mem_kbyte
            ));
        }
    }
    if !service.dependants.is_empty() {
        out.push_str(&format!(
            "  depends on    {}\n",
            service.dependants.join(", ")
        ));
    }
    out
}

fn type_label(kind: ServiceType) -> &'static str {
    match kind {
        ServiceType::Filesystem => "Filesystem",
        ServiceType::Directory => "Directory",
        ServiceType::File => "File",
        ServiceType::Process => "Process",
        ServiceType::Host => "Remote Host",
        ServiceType::System => "System",
        ServiceType::Fifo => "Fifo",
        ServiceType::Program => "Program",
        ServiceType::Network => "Network",
    }
}

fn monitor_label(monitor: Monitor) -> &'static str {
    match monitor {
        Monitor::Not => "Not monitored",
        Monitor::Yes => "Monitored",
        Monitor::Init => "Initializing",
        Monitor::Waiting => "Waiting",
    }
}

fn status_label(service: &Service) -> String {
    match service.kind {
        ServiceType::Process => {
            if service.info.pid != 0 {
                "Running".to_string()
            } else {
                "Not running".to_string()
            }
        }
        ServiceType::Host | ServiceType::Network => {
            if service.info.response_ms.is_some() {
                "Online".to_string()
            } else {
                "Unreachable".to_string()
            }
        }
        ServiceType::Program => match service.info.exit_status {
            Some(0) => "Status ok".to_string(),
            Some(status) => format!("Status failed ({status})"),
            None => "Not run".to_string(),
        },
        ServiceType::System => "Running".to_string(),
        _ => {
            if service.info.size != 0 || service.info.mode != 0 {
                "Accessible".to_string()
            } else {
                "Missing".to_string()
            }
        }
    }
}
