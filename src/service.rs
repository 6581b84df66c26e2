//! Service catalogue: the entities the daemon monitors and acts on.
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// What kind of entity a service observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString, Deserialize, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Filesystem,
    Directory,
    File,
    Process,
    Host,
    System,
    Fifo,
    Program,
    Network,
}

/// Whether the validator evaluates a service each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Monitor {
    /// Disabled; only explicit user actions touch the service.
    Not,
    /// Fully monitored.
    Yes,
    /// First cycle after (re)enabling: sample once, evaluate nothing.
    Init,
    /// An action batch is currently executing against the service.
    Waiting,
}

/// Action attached to a rule or requested by the user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString, Deserialize, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Ignore,
    Alert,
    Restart,
    Stop,
    Exec,
    Unmonitor,
    Start,
    Monitor,
}

/// Comparison operator used by threshold rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Gt,
    Lt,
    Eq,
    Ne,
}

impl Operator {
    /// Applies the comparison with `observed` on the left.
    pub fn compare<T: PartialOrd + PartialEq>(&self, observed: T, limit: T) -> bool {
        match self {
            Operator::Gt => observed > limit,
            Operator::Lt => observed < limit,
            Operator::Eq => observed == limit,
            Operator::Ne => observed != limit,
        }
    }
}

/// One declarative test evaluated against a service each cycle.
#[derive(Debug, Clone)]
pub struct Rule {
    /// The predicate.
    pub test: RuleTest,
    /// What to do when the predicate fails.
    pub action: Action,
    /// Optional cron gate restricting evaluation windows.
    pub every: Option<String>,
    /// Command run when `action == Exec`.
    pub exec: Option<CommandSpec>,
}

/// Rule predicates. Protocol-specific probes stay outside the engine; the
/// connection test is a plain TCP connect.
#[derive(Debug, Clone)]
pub enum RuleTest {
    /// The entity exists (process running, file/dir/fifo present, host
    /// reachable).
    Exist,
    /// File size compared against a byte threshold.
    Size { operator: Operator, bytes: u64 },
    /// Permission bits differ from the expected mode.
    Permission { mode: u32 },
    /// SHA-256 checksum differs from the recorded hex digest.
    Checksum { expect: String },
    /// Filesystem usage percent.
    Space { operator: Operator, percent: f32 },
    /// Process CPU usage percent.
    Cpu { operator: Operator, percent: f32 },
    /// Process resident memory in kilobytes.
    Memory { operator: Operator, kbytes: u64 },
    /// Number of child processes.
    Children { operator: Operator, count: u32 },
    /// TCP connect to the service address within a timeout.
    Connection { timeout: u64 },
    /// Program exit status.
    Status { operator: Operator, value: i32 },
}

impl RuleTest {
    /// Short name used in events and applicability errors.
    pub fn name(&self) -> &'static str {
        match self {
            RuleTest::Exist => "exist",
            RuleTest::Size { .. } => "size",
            RuleTest::Permission { .. } => "permission",
            RuleTest::Checksum { .. } => "checksum",
            RuleTest::Space { .. } => "space",
            RuleTest::Cpu { .. } => "cpu",
            RuleTest::Memory { .. } => "memory",
            RuleTest::Children { .. } => "children",
            RuleTest::Connection { .. } => "connection",
            RuleTest::Status { .. } => "status",
        }
    }
}

/// Immutable description of a start/stop/restart command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Argument vector; `argv[0]` is the program path.
    pub argv: Vec<String>,
    /// Drop to this uid before exec.
    pub uid: Option<u32>,
    /// Drop to this gid before exec.
    pub gid: Option<u32>,
    /// Seconds allowed for the command and its convergence wait.
    pub timeout: u64,
}

impl CommandSpec {
    /// The program path, i.e. `argv[0]`.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

/// Last sampled observation of a service. Which fields are populated
/// depends on the service type.
#[derive(Debug, Clone, Default)]
pub struct Info {
    pub pid: u32,
    pub children: u32,
    pub mem_kbyte: u64,
    pub cpu_percent: f32,
    pub size: u64,
    pub mode: u32,
    pub inode: u64,
    pub checksum: Option<String>,
    pub space_percent: f32,
    pub response_ms: Option<u64>,
    pub exit_status: Option<i32>,
}

impl Info {
    /// Clears the observation, e.g. after a stop that is part of a restart.
    pub fn reset(&mut self) {
        *self = Info::default();
    }
}

/// Rolling-window restart budget: a ring of cycle numbers at which start
/// commands ran, bounded by the configured window.
#[derive(Debug, Clone, Default)]
pub struct RestartBudget {
    /// Maximum starts tolerated inside the window; `None` disables the cap.
    pub count: Option<u32>,
    /// Window length in cycles.
    pub cycles: u64,
    starts: VecDeque<u64>,
}

impl RestartBudget {
    pub fn new(count: Option<u32>, cycles: u64) -> Self {
        Self {
            count,
            cycles,
            starts: VecDeque::new(),
        }
    }

    /// Records a start at the given cycle.
    pub fn record_start(&mut self, cycle: u64) {
        self.starts.push_back(cycle);
    }

    /// Number of starts still inside the rolling window at `cycle`.
    pub fn starts_in_window(&mut self, cycle: u64) -> u32 {
        let horizon = cycle.saturating_sub(self.cycles.saturating_sub(1));
        while let Some(&front) = self.starts.front() {
            if front < horizon {
                self.starts.pop_front();
            } else {
                break;
            }
        }
        self.starts.len() as u32
    }

    /// True once the start count inside the window exceeds the budget.
    pub fn exceeded(&mut self, cycle: u64) -> bool {
        match self.count {
            Some(limit) => self.starts_in_window(cycle) > limit,
            None => false,
        }
    }

    /// Like [`starts_in_window`](Self::starts_in_window) but without
    /// pruning, usable on a shared snapshot.
    pub fn count_in_window(&self, cycle: u64) -> u32 {
        let horizon = cycle.saturating_sub(self.cycles.saturating_sub(1));
        self.starts.iter().filter(|&&c| c >= horizon).count() as u32
    }

    /// Reseeds the ring from persisted state: `count` starts attributed to
    /// `cycle`, so they age out once the window moves past it.
    pub fn seed(&mut self, count: u32, cycle: u64) {
        self.starts.clear();
        for _ in 0..count {
            self.starts.push_back(cycle);
        }
    }

    /// Total recorded starts, for status output.
    pub fn total(&self) -> usize {
        self.starts.len()
    }
}

/// The central entity: one monitored service.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub kind: ServiceType,
    /// Path of the observed entity (file, directory, fifo, filesystem
    /// mount point, or program to run).
    pub path: Option<PathBuf>,
    /// Pid file for Process services resolved by pidfile.
    pub pidfile: Option<PathBuf>,
    /// Argv pattern for Process services resolved by process-table match,
    /// or to cross-check a pid read from a pidfile.
    pub match_pattern: Option<Regex>,
    /// Remote address for Host/Network services.
    pub address: Option<String>,
    /// TCP port for Host/Network connection probes.
    pub port: Option<u16>,
    pub start: Option<CommandSpec>,
    pub stop: Option<CommandSpec>,
    pub restart: Option<CommandSpec>,
    /// Names of services that must be running before this one (the
    /// prerequisite side of the dependency edge).
    pub dependants: Vec<String>,
    pub rules: Vec<Rule>,
    pub monitor: Monitor,
    pub budget: RestartBudget,
    pub info: Info,
    /// Last outcome per rule, used for edge-triggered events.
    pub rule_state: Vec<Option<bool>>,
}

impl Service {
    /// Enables monitoring: `Not` becomes `Init` so the next cycle samples
    /// before evaluating; other states are left alone.
    pub fn monitor_set(&mut self) {
        if self.monitor == Monitor::Not {
            self.monitor = Monitor::Init;
        }
    }

    /// Disables monitoring and forgets rule history.
    pub fn monitor_unset(&mut self) {
        self.monitor = Monitor::Not;
        for state in &mut self.rule_state {
            *state = None;
        }
    }
}

/// Indexed service table replacing the original intrusive list: services in
/// configuration order plus a name index.
#[derive(Debug, Default)]
pub struct ServiceTable {
    services: Vec<Service>,
    index: HashMap<String, usize>,
}

impl ServiceTable {
    pub fn new(services: Vec<Service>) -> Self {
        let index = services
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self { services, index }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.position(name).map(|i| &self.services[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.position(name).map(|i| &mut self.services[i])
    }

    pub fn at(&self, idx: usize) -> &Service {
        &self.services[idx]
    }

    pub fn at_mut(&mut self, idx: usize) -> &mut Service {
        &mut self.services[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Service> {
        self.services.iter_mut()
    }
}
