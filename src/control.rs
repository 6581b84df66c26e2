//! Dependency-aware service actions.
//!
//! `control` applies a start/stop/restart/monitor/unmonitor action to one
//! service while honouring its dependency graph: prerequisites come up
//! before their dependents, dependents go down before their prerequisites.
//! Traversal marks live in a per-batch [`Traversal`] context rather than
//! on the services, so shared subtrees are visited once and every batch
//! starts from clean marks.
use chrono::Utc;
use tracing::{debug, info};

use crate::clock;
use crate::command;
use crate::config::RunConfig;
use crate::error::VigilError;
use crate::event::{Event, EventKind, EventState};
use crate::observe::{self, Converged};
use crate::run::{Engine, RunFlags};
use crate::service::{Action, CommandSpec, Service, ServiceTable, ServiceType};

/// Visited marks for one action batch: `visited` for start/monitor walks,
/// `depend_visited` for stop/unmonitor walks.
#[derive(Debug)]
pub struct Traversal {
    visited: Vec<bool>,
    depend_visited: Vec<bool>,
}

impl Traversal {
    pub fn new(len: usize) -> Self {
        Self {
            visited: vec![false; len],
            depend_visited: vec![false; len],
        }
    }

    /// Clears both mark sets; the sweep that ends every batch.
    pub fn reset(&mut self) {
        self.visited.fill(false);
        self.depend_visited.fill(false);
    }

    /// True when no mark is set.
    pub fn all_clear(&self) -> bool {
        !self.visited.iter().chain(self.depend_visited.iter()).any(|&m| m)
    }
}

/// Applies `action` to the named service, walking its dependency graph.
/// After the batch all traversal marks are reset.
pub fn control(engine: &Engine, name: &str, action: Action) -> Result<(), VigilError> {
    let mut table = engine.services.lock()?;
    let mut traversal = Traversal::new(table.len());
    let mut dispatch = Dispatch {
        table: &mut table,
        traversal: &mut traversal,
        conf: &engine.conf,
        flags: &engine.flags,
        cycle: engine.cycle(),
    };
    dispatch.apply(name, action)?;
    traversal.reset();
    debug_assert!(traversal.all_clear());
    Ok(())
}

/// Applies `action` to every service in configuration order as a single
/// batch, so shared prerequisites are acted on once.
pub fn control_all(engine: &Engine, action: Action) -> Result<(), VigilError> {
    let mut table = engine.services.lock()?;
    let names: Vec<String> = table.iter().map(|s| s.name.clone()).collect();
    let mut traversal = Traversal::new(table.len());
    for name in names {
        let mut dispatch = Dispatch {
            table: &mut table,
            traversal: &mut traversal,
            conf: &engine.conf,
            flags: &engine.flags,
            cycle: engine.cycle(),
        };
        dispatch.apply(&name, action)?;
    }
    traversal.reset();
    Ok(())
}

/// Applies `action` to every member of a configured group.
pub fn control_group(engine: &Engine, group: &str, action: Action) -> Result<(), VigilError> {
    let members = engine
        .conf
        .groups
        .get(group)
        .cloned()
        .ok_or_else(|| VigilError::UnknownGroup(group.to_string()))?;
    for member in members {
        control(engine, &member, action)?;
    }
    Ok(())
}

/// One action batch over the locked service table.
struct Dispatch<'a> {
    table: &'a mut ServiceTable,
    traversal: &'a mut Traversal,
    conf: &'a RunConfig,
    flags: &'a RunFlags,
    cycle: u64,
}

impl Dispatch<'_> {
    fn apply(&mut self, name: &str, action: Action) -> Result<(), VigilError> {
        let idx = self
            .table
            .position(name)
            .ok_or_else(|| VigilError::UnknownService(name.to_string()))?;

        match action {
            Action::Start => {
                self.do_depend(idx, Action::Stop, false);
                self.do_start(idx);
                self.do_depend(idx, Action::Start, false);
            }
            Action::Stop => {
                self.do_depend(idx, Action::Stop, true);
                self.do_stop(idx, true);
            }
            Action::Restart => {
                info!("'{}' trying to restart", self.table.at(idx).name);
                self.do_depend(idx, Action::Stop, false);
                if self.table.at(idx).restart.is_some() {
                    self.do_restart(idx);
                    self.do_depend(idx, Action::Start, false);
                } else if self.do_stop(idx, false) {
                    // Only start if the stop converged.
                    self.do_start(idx);
                    self.do_depend(idx, Action::Start, false);
                } else {
                    // Leave the service monitored so the next cycle
                    // retries the restart.
                    self.table.at_mut(idx).monitor_set();
                }
            }
            Action::Monitor => {
                // Monitoring is enabled for this service and everything it
                // depends on; services depending on it keep their state.
                self.do_monitor(idx);
            }
            Action::Unmonitor => {
                // Monitoring is disabled for this service and everything
                // that depends on it.
                self.do_depend(idx, Action::Unmonitor, false);
                self.do_unmonitor(idx);
            }
            other => {
                return Err(VigilError::InvalidAction(other.to_string()));
            }
        }
        Ok(())
    }

    /// Post-order start: bring up every prerequisite of `idx`, then `idx`
    /// itself.
    fn do_start(&mut self, idx: usize) {
        if self.traversal.visited[idx] {
            return;
        }
        self.traversal.visited[idx] = true;

        for dep in self.prerequisites(idx) {
            self.do_start(dep);
        }

        let service = self.table.at(idx);
        if let Some(start) = service.start.clone() {
            if service.kind != ServiceType::Process || observe::is_running(service, false) == 0 {
                info!("'{}' start: {}", service.name, start.program());
                let mut timeout_us = (start.timeout as i64) * 1_000_000;
                let env = self.env_overlay(idx, "Started");
                let outcome = command::execute(
                    &start,
                    &env,
                    &mut timeout_us,
                    &self.flags.stopped,
                );
                self.table.at_mut(idx).budget.record_start(self.cycle);

                let service = self.table.at(idx);
                let converged = service.kind != ServiceType::Process
                    || observe::wait_start(service, &mut timeout_us, &self.flags.stopped)
                        == Converged::Started;
                if !converged || outcome.status < 0 {
                    self.post_exec_failure(idx, "start", outcome);
                } else {
                    self.post_exec_success(idx, "started");
                }
            }
        } else {
            debug!("'{}' start skipped -- method not defined", service.name);
        }
        self.table.at_mut(idx).monitor_set();
    }

    /// Stops `idx` itself. Returns false when the stop did not converge.
    /// With `disable_monitor` unset (stop as part of a restart) the
    /// observation is reset instead of the monitoring state.
    fn do_stop(&mut self, idx: usize, disable_monitor: bool) -> bool {
        if self.traversal.depend_visited[idx] {
            return true;
        }
        self.traversal.depend_visited[idx] = true;

        let mut converged = true;
        let service = self.table.at(idx);
        if let Some(stop) = service.stop.clone() {
            if service.kind != ServiceType::Process || observe::is_running(service, false) != 0 {
                info!("'{}' stop: {}", service.name, stop.program());
                let pid = observe::is_running(service, true);
                let mut timeout_us = (stop.timeout as i64) * 1_000_000;
                let env = self.env_overlay(idx, "Stopped");
                let outcome =
                    command::execute(&stop, &env, &mut timeout_us, &self.flags.stopped);

                let kind = self.table.at(idx).kind;
                let stopped = kind != ServiceType::Process
                    || observe::wait_stop(pid, &mut timeout_us, &self.flags.stopped)
                        == Converged::Stopped;
                if !stopped || outcome.status < 0 {
                    converged = false;
                    self.post_exec_failure(idx, "stop", outcome);
                } else {
                    self.post_exec_success(idx, "stopped");
                }
            }
        } else {
            debug!("'{}' stop skipped -- method not defined", service.name);
        }

        let service = self.table.at_mut(idx);
        if disable_monitor {
            service.monitor_unset();
        } else {
            service.info.reset();
        }
        converged
    }

    /// Runs the dedicated restart command of `idx`.
    fn do_restart(&mut self, idx: usize) {
        let service = self.table.at_mut(idx);
        if let Some(restart) = service.restart.clone() {
            info!("'{}' restart: {}", service.name, restart.program());
            service.info.reset();
            let mut timeout_us = (restart.timeout as i64) * 1_000_000;
            let env = self.env_overlay(idx, "Restarted");
            let outcome =
                command::execute(&restart, &env, &mut timeout_us, &self.flags.stopped);
            self.table.at_mut(idx).budget.record_start(self.cycle);

            let service = self.table.at(idx);
            let converged = service.kind != ServiceType::Process
                || observe::wait_start(service, &mut timeout_us, &self.flags.stopped)
                    == Converged::Started;
            if !converged || outcome.status < 0 {
                self.post_exec_failure(idx, "restart", outcome);
            } else {
                self.post_exec_success(idx, "restarted");
            }
        } else {
            debug!("'{}' restart skipped -- method not defined", service.name);
        }
        self.table.at_mut(idx).monitor_set();
    }

    /// Post-order monitor enable over prerequisites.
    fn do_monitor(&mut self, idx: usize) {
        if self.traversal.visited[idx] {
            return;
        }
        self.traversal.visited[idx] = true;
        for dep in self.prerequisites(idx) {
            self.do_monitor(dep);
        }
        self.table.at_mut(idx).monitor_set();
    }

    fn do_unmonitor(&mut self, idx: usize) {
        if self.traversal.depend_visited[idx] {
            return;
        }
        self.traversal.depend_visited[idx] = true;
        self.table.at_mut(idx).monitor_unset();
    }

    /// Walks every service that depends on `idx`, descending before
    /// stopping/unmonitoring (children first) and after starting/
    /// monitoring (parents first).
    fn do_depend(&mut self, idx: usize, action: Action, disable_monitor: bool) {
        let target = self.table.at(idx).name.clone();
        for child in 0..self.table.len() {
            if !self.table.at(child).dependants.iter().any(|d| d == &target) {
                continue;
            }
            match action {
                Action::Start => self.do_start(child),
                Action::Monitor => self.do_monitor(child),
                _ => {}
            }
            self.do_depend(child, action, disable_monitor);
            match action {
                Action::Stop => {
                    self.do_stop(child, disable_monitor);
                }
                Action::Unmonitor => self.do_unmonitor(child),
                _ => {}
            }
        }
    }

    /// Positions of the services `idx` depends on. The control file
    /// validation guarantees they exist.
    fn prerequisites(&self, idx: usize) -> Vec<usize> {
        self.table
            .at(idx)
            .dependants
            .iter()
            .filter_map(|name| self.table.position(name))
            .collect()
    }

    fn env_overlay(&self, idx: usize, event: &str) -> Vec<(String, String)> {
        build_env(self.table.at(idx), &self.conf.hostname, event)
    }

    fn post_exec_failure(&self, idx: usize, verb: &str, outcome: command::ExecOutcome) {
        let message = if outcome.message.is_empty() {
            "no output".to_string()
        } else {
            outcome.message
        };
        Event::new(
            self.table.at(idx).name.clone(),
            EventKind::Exec,
            EventState::Failed,
            Action::Alert,
            format!(
                "failed to {verb} (exit status {}) -- {message}",
                outcome.status
            ),
        )
        .post();
    }

    fn post_exec_success(&self, idx: usize, verb: &str) {
        Event::new(
            self.table.at(idx).name.clone(),
            EventKind::Exec,
            EventState::Succeeded,
            Action::Alert,
            verb,
        )
        .post();
    }
}

/// Builds the environment overlay injected into service commands; it is
/// the child's entire environment.
pub fn build_env(service: &Service, hostname: &str, event: &str) -> Vec<(String, String)> {
    let mut env = vec![
        ("MONIT_DATE".to_string(), clock::local_stamp(Utc::now())),
        ("MONIT_SERVICE".to_string(), service.name.clone()),
        ("MONIT_HOST".to_string(), hostname.to_string()),
        ("MONIT_EVENT".to_string(), event.to_string()),
        ("MONIT_DESCRIPTION".to_string(), event.to_string()),
    ];
    if service.kind == ServiceType::Process {
        env.push((
            "MONIT_PROCESS_PID".to_string(),
            observe::is_running(service, false).to_string(),
        ));
        env.push((
            "MONIT_PROCESS_MEMORY".to_string(),
            service.info.mem_kbyte.to_string(),
        ));
        env.push((
            "MONIT_PROCESS_CHILDREN".to_string(),
            service.info.children.to_string(),
        ));
        env.push((
            "MONIT_PROCESS_CPU_PERCENT".to_string(),
            format!("{:.0}", service.info.cpu_percent),
        ));
    }
    env
}

/// Runs a rule-local exec command outside any traversal; used by the
/// validator for `action: exec` rules.
pub fn run_exec(
    conf: &RunConfig,
    flags: &RunFlags,
    service: &Service,
    spec: &CommandSpec,
) -> command::ExecOutcome {
    let env = build_env(service, &conf.hostname, "Started");
    let mut timeout_us = (spec.timeout as i64) * 1_000_000;
    command::execute(spec, &env, &mut timeout_us, &flags.stopped)
}
