//! One monitoring cycle over the whole service table.
//!
//! Rules state the condition that is wrong: `size gt N` fires when the
//! observed size exceeds N, `status ne 0` when the program exited
//! non-zero. `exist` is the exception and fires when the entity is gone.
use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::control;
use crate::cron;
use crate::error::VigilError;
use crate::event::{Event, EventKind, EventState};
use crate::run::Engine;
use crate::sample::Sampler;
use crate::service::{Action, CommandSpec, Monitor, RuleTest, Service, ServiceType};

/// An action queued while the table lock was held, dispatched afterwards.
struct PendingAction {
    action: Action,
    exec: Option<(Service, CommandSpec)>,
}

/// Runs one cycle: every enabled service is sampled and its rules
/// evaluated in configuration order; resulting actions are dispatched and
/// the restart budget enforced.
pub fn validate(engine: &Engine, sampler: &mut Sampler) -> Result<(), VigilError> {
    let cycle = engine.next_cycle();
    let now = Local::now();
    debug!("validate cycle {cycle}");

    let names: Vec<String> = {
        let table = engine.services.lock()?;
        table.iter().map(|s| s.name.clone()).collect()
    };

    for name in names {
        if engine.flags.stopped() {
            break;
        }
        let pending = check_service(engine, sampler, &name, &now)?;
        for pending in pending {
            dispatch(engine, &name, pending)?;
        }
        enforce_budget(engine, &name, cycle)?;
    }
    Ok(())
}

/// Evaluates one service under the table lock and returns the actions to
/// run once the lock is released.
fn check_service(
    engine: &Engine,
    sampler: &mut Sampler,
    name: &str,
    now: &DateTime<Local>,
) -> Result<Vec<PendingAction>, VigilError> {
    let mut table = engine.services.lock()?;
    let Some(service) = table.get_mut(name) else {
        return Ok(Vec::new());
    };

    match service.monitor {
        Monitor::Not => return Ok(Vec::new()),
        Monitor::Init => {
            // First cycle after enabling: populate the observation only.
            if let Err(e) = sampler.refresh(service, &engine.flags.stopped) {
                debug!("'{}' initial sample failed: {e}", service.name);
            }
            service.monitor = Monitor::Yes;
            return Ok(Vec::new());
        }
        Monitor::Yes | Monitor::Waiting => {}
    }

    let sample_ok = match sampler.refresh(service, &engine.flags.stopped) {
        Ok(()) => true,
        Err(message) => {
            Event::new(
                service.name.clone(),
                EventKind::Instance,
                EventState::Failed,
                Action::Alert,
                message,
            )
            .post();
            false
        }
    };

    let mut pending = Vec::new();
    for i in 0..service.rules.len() {
        let rule = service.rules[i].clone();
        if let Some(expr) = &rule.every
            && !cron::matches(expr, now)
        {
            continue;
        }

        let Some(violated) = rule_violated(service, &rule.test, sample_ok) else {
            continue;
        };
        let previous = service.rule_state[i];
        service.rule_state[i] = Some(violated);

        if violated {
            Event::new(
                service.name.clone(),
                rule_event_kind(&rule.test),
                EventState::Failed,
                rule.action,
                failure_message(service, &rule.test),
            )
            .post();
            let exec = match rule.action {
                Action::Exec => rule
                    .exec
                    .clone()
                    .map(|spec| ((*service).clone(), spec)),
                _ => None,
            };
            pending.push(PendingAction {
                action: rule.action,
                exec,
            });
        } else if previous == Some(true) {
            Event::new(
                service.name.clone(),
                rule_event_kind(&rule.test),
                EventState::Succeeded,
                rule.action,
                format!("{} test succeeded", rule.test.name()),
            )
            .post();
        }
    }
    Ok(pending)
}

/// Runs one queued action. Alerts were already delivered when the event
/// was posted; everything else goes through the dispatcher.
fn dispatch(engine: &Engine, name: &str, pending: PendingAction) -> Result<(), VigilError> {
    match pending.action {
        Action::Ignore | Action::Alert => Ok(()),
        Action::Exec => {
            if let Some((service, spec)) = pending.exec {
                let outcome = control::run_exec(&engine.conf, &engine.flags, &service, &spec);
                if outcome.status != 0 {
                    warn!(
                        "'{}' exec '{}' exited with status {} -- {}",
                        name,
                        spec.program(),
                        outcome.status,
                        outcome.message
                    );
                }
            } else {
                debug!("'{name}' exec skipped -- command not defined");
            }
            Ok(())
        }
        action => control::control(engine, name, action),
    }
}

/// Disables a service that burned through its restart budget.
fn enforce_budget(engine: &Engine, name: &str, cycle: u64) -> Result<(), VigilError> {
    let mut table = engine.services.lock()?;
    let Some(service) = table.get_mut(name) else {
        return Ok(());
    };
    if service.monitor != Monitor::Not && service.budget.exceeded(cycle) {
        let count = service.budget.count_in_window(cycle);
        let window = service.budget.cycles;
        Event::new(
            service.name.clone(),
            EventKind::Instance,
            EventState::Failed,
            Action::Unmonitor,
            format!(
                "restart limit exceeded -- {count} starts within {window} cycles, monitoring disabled"
            ),
        )
        .post();
        service.monitor_unset();
    }
    Ok(())
}

/// Whether a rule's failure condition holds. `None` means the rule cannot
/// be evaluated this cycle and keeps its previous state.
fn rule_violated(service: &Service, test: &RuleTest, sample_ok: bool) -> Option<bool> {
    if let RuleTest::Exist = test {
        return Some(!exists(service, sample_ok));
    }
    if !sample_ok {
        return None;
    }
    let info = &service.info;
    Some(match test {
        RuleTest::Exist => unreachable!(),
        RuleTest::Size { operator, bytes } => operator.compare(info.size, *bytes),
        RuleTest::Permission { mode } => info.mode != *mode,
        RuleTest::Checksum { expect } => {
            info.checksum.as_deref() != Some(expect.as_str())
        }
        RuleTest::Space { operator, percent } => {
            operator.compare(info.space_percent, *percent)
        }
        RuleTest::Cpu { operator, percent } => {
            operator.compare(info.cpu_percent, *percent)
        }
        RuleTest::Memory { operator, kbytes } => {
            operator.compare(info.mem_kbyte, *kbytes)
        }
        RuleTest::Children { operator, count } => {
            operator.compare(info.children, *count)
        }
        RuleTest::Connection { .. } => info.response_ms.is_none(),
        RuleTest::Status { operator, value } => match info.exit_status {
            Some(actual) => operator.compare(actual, *value),
            None => true,
        },
    })
}

fn exists(service: &Service, sample_ok: bool) -> bool {
    match service.kind {
        ServiceType::Process => service.info.pid != 0,
        ServiceType::Host | ServiceType::Network => service.info.response_ms.is_some(),
        ServiceType::Program => sample_ok && service.info.exit_status.is_some(),
        ServiceType::System => true,
        ServiceType::File
        | ServiceType::Directory
        | ServiceType::Fifo
        | ServiceType::Filesystem => sample_ok,
    }
}

fn rule_event_kind(test: &RuleTest) -> EventKind {
    match test {
        RuleTest::Exist => EventKind::Exist,
        RuleTest::Size { .. }
        | RuleTest::Permission { .. }
        | RuleTest::Checksum { .. }
        | RuleTest::Space { .. } => EventKind::Data,
        RuleTest::Cpu { .. } | RuleTest::Memory { .. } | RuleTest::Children { .. } => {
            EventKind::Resource
        }
        RuleTest::Connection { .. } => EventKind::Connection,
        RuleTest::Status { .. } => EventKind::Status,
    }
}

fn failure_message(service: &Service, test: &RuleTest) -> String {
    let info = &service.info;
    match test {
        RuleTest::Exist => "does not exist".to_string(),
        RuleTest::Size { bytes, .. } => {
            format!("size test failed -- current size {} B, limit {bytes} B", info.size)
        }
        RuleTest::Permission { mode } => format!(
            "permission test failed -- current mode {:04o}, expected {mode:04o}",
            info.mode
        ),
        RuleTest::Checksum { .. } => "checksum changed".to_string(),
        RuleTest::Space { percent, .. } => format!(
            "space usage {:.1}% exceeds limit {percent:.1}%",
            info.space_percent
        ),
        RuleTest::Cpu { percent, .. } => format!(
            "cpu usage {:.1}% exceeds limit {percent:.1}%",
            info.cpu_percent
        ),
        RuleTest::Memory { kbytes, .. } => format!(
            "memory usage {} kB exceeds limit {kbytes} kB",
            info.mem_kbyte
        ),
        RuleTest::Children { count, .. } => {
            format!("children {} off limit {count}", info.children)
        }
        RuleTest::Connection { timeout } => {
            format!("connection test failed within {timeout} s")
        }
        RuleTest::Status { value, .. } => match info.exit_status {
            Some(actual) => format!("status test failed -- exit status {actual}, test against {value}"),
            None => "status test failed -- program did not run".to_string(),
        },
    }
}
