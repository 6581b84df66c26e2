//! Control file loading for vigild.
//!
//! The control file is YAML. Parsing proper is serde's job; this module
//! owns the schema, the validation pass (unknown dependencies, dependency
//! cycles, rule applicability) and the conversion into the runtime service
//! table.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use crate::error::VigilError;
use crate::service::{
    Action, CommandSpec, Info, Monitor, Operator, RestartBudget, Rule, RuleTest, Service,
    ServiceType,
};

/// Default command timeout in seconds when the control file omits one.
pub const DEFAULT_COMMAND_TIMEOUT: u64 = 30;

/// Default seconds between monitoring cycles.
pub const DEFAULT_POLLTIME: u64 = 30;

/// Candidate control file used when `-c` is not given.
pub const DEFAULT_CONTROL_FILE: &str = "vigil.yaml";

/// Top-level structure of the control file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ControlFile {
    /// Daemon-mode settings; the block's presence enables daemon mode.
    pub daemon: Option<DaemonSection>,
    /// Pid file path for daemon mode.
    pub pidfile: Option<String>,
    /// Persisted per-service state.
    pub statefile: Option<String>,
    /// Persistent unique instance id.
    pub idfile: Option<String>,
    /// Log file path or "syslog".
    pub logfile: Option<String>,
    /// Loopback HTTP control listener.
    pub httpd: Option<HttpdSection>,
    /// Remote collectors receiving the heartbeat.
    #[serde(default)]
    pub collectors: Vec<String>,
    /// Named service groups addressable with `-g`.
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
    /// Monitored services, in file order.
    #[serde(default)]
    pub services: IndexMap<String, ServiceSection>,
}

/// `daemon:` block.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DaemonSection {
    /// Seconds between monitoring cycles.
    pub polltime: u64,
    /// Seconds to pause before the first cycle.
    pub start_delay: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            polltime: DEFAULT_POLLTIME,
            start_delay: 0,
        }
    }
}

/// `httpd:` block. SSL is handled by an external transport and is not
/// configured here; the listener is IPv4 loopback.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpdSection {
    #[serde(default = "default_httpd_address")]
    pub address: String,
    pub port: u16,
    pub auth: Option<AuthSection>,
}

fn default_httpd_address() -> String {
    "127.0.0.1".to_string()
}

/// Optional basic-auth credentials for the control listener.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthSection {
    pub username: String,
    pub password: String,
}

/// One `services:` entry.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSection {
    /// Service type; decides which rules apply and how liveness resolves.
    #[serde(rename = "type")]
    pub kind: ServiceType,
    /// Observed path (file, directory, fifo, filesystem mount point or
    /// program to run).
    pub path: Option<String>,
    /// Pid file for process services.
    pub pidfile: Option<String>,
    /// Argv regex for process-table matching.
    #[serde(rename = "match")]
    pub match_pattern: Option<String>,
    /// Remote address for host/network services.
    pub address: Option<String>,
    /// TCP port for connection probes.
    pub port: Option<u16>,
    pub start: Option<CommandSection>,
    pub stop: Option<CommandSection>,
    pub restart: Option<CommandSection>,
    /// Services that must be running before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Rolling-window restart budget.
    pub restart_limit: Option<RestartLimitSection>,
    #[serde(default)]
    pub rules: Vec<RuleSection>,
}

/// Command descriptor as written in the control file.
#[derive(Debug, Deserialize, Clone)]
pub struct CommandSection {
    pub command: Vec<String>,
    pub timeout: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl CommandSection {
    fn build(&self) -> CommandSpec {
        CommandSpec {
            argv: self.command.clone(),
            uid: self.uid,
            gid: self.gid,
            timeout: self.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
        }
    }
}

/// `restart_limit:` block: more than `count` starts within `cycles`
/// consecutive cycles disables monitoring.
#[derive(Debug, Deserialize, Clone)]
pub struct RestartLimitSection {
    pub count: u32,
    pub cycles: u64,
}

/// One rule entry.
#[derive(Debug, Deserialize, Clone)]
pub struct RuleSection {
    pub test: RuleTestSection,
    pub action: Action,
    /// Cron gate; the rule is only evaluated at matching timestamps.
    pub every: Option<String>,
    /// Command run when `action: exec`.
    pub exec: Option<CommandSection>,
}

/// Rule predicates as written in the control file.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum RuleTestSection {
    Exist,
    Size { operator: Operator, bytes: u64 },
    Permission { mode: String },
    Checksum { expect: String },
    Space { operator: Operator, percent: f32 },
    Cpu { operator: Operator, percent: f32 },
    Memory { operator: Operator, kbytes: u64 },
    Children { operator: Operator, count: u32 },
    Connection { timeout: Option<u64> },
    Status { operator: Operator, value: i32 },
}

impl RuleTestSection {
    fn build(&self, service: &str) -> Result<RuleTest, VigilError> {
        Ok(match self {
            RuleTestSection::Exist => RuleTest::Exist,
            RuleTestSection::Size { operator, bytes } => RuleTest::Size {
                operator: *operator,
                bytes: *bytes,
            },
            RuleTestSection::Permission { mode } => {
                let mode = u32::from_str_radix(mode, 8).map_err(|_| {
                    VigilError::RuleNotApplicable {
                        service: service.to_string(),
                        rule: format!("permission '{mode}'"),
                        kind: "octal mode".to_string(),
                    }
                })?;
                RuleTest::Permission { mode }
            }
            RuleTestSection::Checksum { expect } => RuleTest::Checksum {
                expect: expect.to_ascii_lowercase(),
            },
            RuleTestSection::Space { operator, percent } => RuleTest::Space {
                operator: *operator,
                percent: *percent,
            },
            RuleTestSection::Cpu { operator, percent } => RuleTest::Cpu {
                operator: *operator,
                percent: *percent,
            },
            RuleTestSection::Memory { operator, kbytes } => RuleTest::Memory {
                operator: *operator,
                kbytes: *kbytes,
            },
            RuleTestSection::Children { operator, count } => RuleTest::Children {
                operator: *operator,
                count: *count,
            },
            RuleTestSection::Connection { timeout } => RuleTest::Connection {
                timeout: timeout.unwrap_or(5),
            },
            RuleTestSection::Status { operator, value } => RuleTest::Status {
                operator: *operator,
                value: *value,
            },
        })
    }
}

/// Runtime configuration assembled from the control file and CLI options.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub controlfile: PathBuf,
    pub polltime: u64,
    pub start_delay: u64,
    pub pidfile: PathBuf,
    pub statefile: PathBuf,
    pub idfile: PathBuf,
    pub logfile: Option<String>,
    /// True when running as a daemon (`-d` or explicit daemonisation).
    pub daemon: bool,
    /// Run in the foreground even in daemon mode (`-I`).
    pub foreground: bool,
    /// Debug level from `-v` occurrences.
    pub debug: u8,
    pub httpd: Option<HttpdSection>,
    pub collectors: Vec<String>,
    pub groups: HashMap<String, Vec<String>>,
    /// Local hostname, exported to commands as MONIT_HOST.
    pub hostname: String,
}

impl RunConfig {
    fn from_control(path: &Path, control: &ControlFile) -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let daemon = control.daemon.clone().unwrap_or_default();
        Self {
            controlfile: path.to_path_buf(),
            polltime: daemon.polltime.max(1),
            start_delay: daemon.start_delay,
            pidfile: PathBuf::from(
                control.pidfile.clone().unwrap_or_else(|| "vigil.pid".into()),
            ),
            statefile: PathBuf::from(
                control
                    .statefile
                    .clone()
                    .unwrap_or_else(|| "vigil.state".into()),
            ),
            idfile: PathBuf::from(control.idfile.clone().unwrap_or_else(|| "vigil.id".into())),
            logfile: control.logfile.clone(),
            daemon: control.daemon.is_some(),
            foreground: false,
            debug: 0,
            httpd: control.httpd.clone(),
            collectors: control.collectors.clone(),
            groups: control.groups.clone(),
            hostname,
        }
    }
}

/// Loads and parses the control file.
pub fn load_control_file(path: Option<&str>) -> Result<ControlFile, VigilError> {
    let path = path.unwrap_or(DEFAULT_CONTROL_FILE);
    let raw = fs::read_to_string(path)?;
    let control: ControlFile = serde_yaml::from_str(&raw)?;
    Ok(control)
}

/// Loads the control file and builds the validated runtime configuration
/// plus the service table contents.
pub fn load(path: Option<&str>) -> Result<(RunConfig, Vec<Service>), VigilError> {
    let path_str = path.unwrap_or(DEFAULT_CONTROL_FILE);
    let control = load_control_file(Some(path_str))?;
    let run = RunConfig::from_control(Path::new(path_str), &control);
    let services = build_services(&control)?;
    Ok((run, services))
}

/// Converts parsed sections into runtime services and validates the
/// catalogue as a whole.
pub fn build_services(control: &ControlFile) -> Result<Vec<Service>, VigilError> {
    let mut services = Vec::with_capacity(control.services.len());
    for (name, section) in &control.services {
        services.push(build_service(name, section)?);
    }

    check_dependencies(&services)?;
    check_groups(control, &services)?;
    Ok(services)
}

fn build_service(name: &str, section: &ServiceSection) -> Result<Service, VigilError> {
    let match_pattern = section
        .match_pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| VigilError::RuleNotApplicable {
            service: name.to_string(),
            rule: format!("match ({e})"),
            kind: "regex".to_string(),
        })?;

    let mut rules = Vec::with_capacity(section.rules.len());
    for rule in &section.rules {
        let test = rule.test.build(name)?;
        check_applicable(name, section.kind, &test)?;
        rules.push(Rule {
            test,
            action: rule.action,
            every: rule.every.clone(),
            exec: rule.exec.as_ref().map(CommandSection::build),
        });
    }

    let budget = match &section.restart_limit {
        Some(limit) => RestartBudget::new(Some(limit.count), limit.cycles.max(1)),
        None => RestartBudget::default(),
    };

    let rule_state = vec![None; rules.len()];
    Ok(Service {
        name: name.to_string(),
        kind: section.kind,
        path: section.path.as_ref().map(PathBuf::from),
        pidfile: section.pidfile.as_ref().map(PathBuf::from),
        match_pattern,
        address: section.address.clone(),
        port: section.port,
        start: section.start.as_ref().map(CommandSection::build),
        stop: section.stop.as_ref().map(CommandSection::build),
        restart: section.restart.as_ref().map(CommandSection::build),
        dependants: section.depends_on.clone(),
        rules,
        monitor: Monitor::Init,
        budget,
        info: Info::default(),
        rule_state,
    })
}

fn check_applicable(
    service: &str,
    kind: ServiceType,
    test: &RuleTest,
) -> Result<(), VigilError> {
    let ok = match test {
        RuleTest::Exist => true,
        RuleTest::Size { .. } | RuleTest::Checksum { .. } => kind == ServiceType::File,
        RuleTest::Permission { .. } => matches!(
            kind,
            ServiceType::File | ServiceType::Directory | ServiceType::Fifo
        ),
        RuleTest::Space { .. } => kind == ServiceType::Filesystem,
        RuleTest::Cpu { .. } | RuleTest::Memory { .. } => {
            matches!(kind, ServiceType::Process | ServiceType::System)
        }
        RuleTest::Children { .. } => kind == ServiceType::Process,
        RuleTest::Connection { .. } => {
            matches!(kind, ServiceType::Host | ServiceType::Network)
        }
        RuleTest::Status { .. } => kind == ServiceType::Program,
    };
    if ok {
        Ok(())
    } else {
        Err(VigilError::RuleNotApplicable {
            service: service.to_string(),
            rule: test.name().to_string(),
            kind: kind.to_string(),
        })
    }
}

/// Verifies every dependency target exists and the graph is acyclic.
fn check_dependencies(services: &[Service]) -> Result<(), VigilError> {
    let index: HashMap<&str, usize> = services
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    for service in services {
        for dep in &service.dependants {
            if !index.contains_key(dep.as_str()) {
                return Err(VigilError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Colour DFS: 0 unseen, 1 on the stack, 2 done.
    let mut colour = vec![0u8; services.len()];
    let mut trail: Vec<usize> = Vec::new();
    for start in 0..services.len() {
        if colour[start] == 0
            && let Some(cycle) = walk(start, services, &index, &mut colour, &mut trail)
        {
            return Err(VigilError::DependencyCycle { cycle });
        }
    }
    Ok(())
}

fn walk(
    node: usize,
    services: &[Service],
    index: &HashMap<&str, usize>,
    colour: &mut [u8],
    trail: &mut Vec<usize>,
) -> Option<String> {
    colour[node] = 1;
    trail.push(node);
    for dep in &services[node].dependants {
        let next = index[dep.as_str()];
        match colour[next] {
            1 => {
                let from = trail.iter().position(|&i| i == next).unwrap_or(0);
                let mut names: Vec<&str> = trail[from..]
                    .iter()
                    .map(|&i| services[i].name.as_str())
                    .collect();
                names.push(services[next].name.as_str());
                return Some(names.join(" -> "));
            }
            0 => {
                if let Some(cycle) = walk(next, services, index, colour, trail) {
                    return Some(cycle);
                }
            }
            _ => {}
        }
    }
    trail.pop();
    colour[node] = 2;
    None
}

fn check_groups(control: &ControlFile, services: &[Service]) -> Result<(), VigilError> {
    for (group, members) in &control.groups {
        for member in members {
            if !services.iter().any(|s| &s.name == member) {
                return Err(VigilError::UnknownDependency {
                    service: format!("group {group}"),
                    dependency: member.clone(),
                });
            }
        }
    }
    Ok(())
}
