//! Helpers shared by unit and integration tests.
use crate::service::{Info, Monitor, RestartBudget, Service, ServiceType};

/// A bare process service with no commands, rules or dependencies.
pub fn sample_service(name: &str) -> Service {
    Service {
        name: name.to_string(),
        kind: ServiceType::Process,
        path: None,
        pidfile: None,
        match_pattern: None,
        address: None,
        port: None,
        start: None,
        stop: None,
        restart: None,
        dependants: Vec::new(),
        rules: Vec::new(),
        monitor: Monitor::Not,
        budget: RestartBudget::default(),
        info: Info::default(),
        rule_state: Vec::new(),
    }
}
