use std::error::Error;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use regex::Regex;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use vigild::{
    cli::{Cli, Verb, parse_args, parse_verb},
    config::{self, RunConfig},
    control,
    daemon::{self, Daemon},
    error::VigilError,
    files, http, observe, report,
    run::Engine,
    sample::Sampler,
    service::{Action, ServiceTable},
    state::StateFile,
    validate,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    if let Some(hash) = &args.hash {
        files::print_hashes(hash.as_deref())?;
        return Ok(());
    }

    if args.test {
        match config::load(args.controlfile.as_deref()) {
            Ok(_) => {
                println!("Control file syntax OK");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    let (mut conf, services) = config::load(args.controlfile.as_deref())?;
    apply_overrides(&mut conf, &args);

    if args.id {
        println!("vigil id: {}", files::instance_id(&conf.idfile)?);
        return Ok(());
    }
    if args.resetid {
        let id = files::reset_instance_id(&conf.idfile)?;
        println!("vigil id reset: {id}");
        // A running daemon picks the new id up on reload.
        if files::daemon_pid(&conf.pidfile).is_some() {
            daemon::request_reload(&conf)?;
        }
        return Ok(());
    }

    match parse_verb(&args.action)? {
        None => run_default(conf, services, &args),
        Some(Verb::Control { action, service }) => {
            run_control(conf, services, &args, action, service)
        }
        Some(Verb::Reload) => Ok(daemon::request_reload(&conf)?),
        Some(Verb::Quit) => Ok(daemon::request_quit(&conf)?),
        Some(Verb::Status) => run_status(conf, services, false),
        Some(Verb::Summary) => run_status(conf, services, true),
        Some(Verb::Validate) => run_validate(conf, services),
        Some(Verb::Procmatch(pattern)) => run_procmatch(&pattern),
    }
}

/// Default action: daemonise when `-d` was given, otherwise run a single
/// validation pass.
fn run_default(
    conf: RunConfig,
    services: Vec<vigild::service::Service>,
    _args: &Cli,
) -> Result<(), Box<dyn Error>> {
    if conf.daemon {
        if files::daemon_pid(&conf.pidfile).is_some() && daemon::wakeup_call(&conf) {
            return Ok(());
        }
        let engine = build_engine(conf, services)?;
        let mut daemon = Daemon::new(engine);
        daemon.run()?;
        Ok(())
    } else {
        run_validate(conf, services)
    }
}

fn run_validate(
    conf: RunConfig,
    services: Vec<vigild::service::Service>,
) -> Result<(), Box<dyn Error>> {
    let engine = build_engine(conf, services)?;
    let persisted = StateFile::load(&engine.conf.statefile)?;
    {
        let mut table = engine.services.lock().map_err(VigilError::from)?;
        persisted.apply(&mut table);
    }
    let mut sampler = Sampler::new();
    validate::validate(&engine, &mut sampler)?;
    save_state(&engine);
    Ok(())
}

/// Routes a start/stop/restart/monitor/unmonitor request either through a
/// running daemon's control listener or directly against the catalogue.
fn run_control(
    conf: RunConfig,
    services: Vec<vigild::service::Service>,
    args: &Cli,
    action: Action,
    service: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let targets = resolve_targets(&conf, &services, args, service.clone())?;

    let daemon_running = files::daemon_pid(&conf.pidfile).is_some();
    if daemon_running {
        let Some(httpd) = conf.httpd.clone() else {
            return Err(Box::new(VigilError::InvalidAction(
                "daemon is running without http support; stop it or configure httpd"
                    .to_string(),
            )));
        };
        let mut errors = 0;
        for target in &targets {
            if let Err(e) = http::control_daemon(&httpd, target, action) {
                error!("{e}");
                errors += 1;
            }
        }
        if errors > 0 {
            return Err(Box::new(VigilError::InvalidAction(format!(
                "{errors} action(s) failed"
            ))));
        }
        return Ok(());
    }

    let engine = build_engine(conf, services)?;
    let persisted = StateFile::load(&engine.conf.statefile)?;
    {
        let mut table = engine.services.lock().map_err(VigilError::from)?;
        persisted.apply(&mut table);
    }
    if let Some(group) = &args.group {
        control::control_group(&engine, group, action)?;
    } else if service.as_deref() == Some("all") {
        control::control_all(&engine, action)?;
    } else {
        for target in &targets {
            control::control(&engine, target, action)?;
        }
    }
    save_state(&engine);
    Ok(())
}

/// Expands `-g group`, `all` or a single name into target service names.
fn resolve_targets(
    conf: &RunConfig,
    services: &[vigild::service::Service],
    args: &Cli,
    service: Option<String>,
) -> Result<Vec<String>, VigilError> {
    if let Some(group) = &args.group {
        return conf
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| VigilError::UnknownGroup(group.clone()));
    }
    match service.as_deref() {
        Some("all") => Ok(services.iter().map(|s| s.name.clone()).collect()),
        Some(name) => Ok(vec![name.to_string()]),
        None => Err(VigilError::InvalidAction(
            "please specify a service name or 'all'".to_string(),
        )),
    }
}

fn run_status(
    conf: RunConfig,
    mut services: Vec<vigild::service::Service>,
    summary: bool,
) -> Result<(), Box<dyn Error>> {
    print!("{}", report::render(&conf, &mut services, summary));
    Ok(())
}

fn run_procmatch(pattern: &str) -> Result<(), Box<dyn Error>> {
    let regex = Regex::new(pattern)?;
    let matches = observe::match_process_table(&regex);
    println!("Total matches: {}", matches.len());
    for m in matches {
        println!("  {} {}", m.pid, m.command);
    }
    Ok(())
}

fn build_engine(
    conf: RunConfig,
    services: Vec<vigild::service::Service>,
) -> Result<Arc<Engine>, Box<dyn Error>> {
    let id = files::instance_id(&conf.idfile)?;
    Ok(Arc::new(Engine::new(conf, ServiceTable::new(services), id)))
}

fn save_state(engine: &Arc<Engine>) {
    let snapshot = match engine.services.lock() {
        Ok(table) => StateFile::snapshot(&table, engine.cycle()),
        Err(e) => {
            error!("state snapshot failed: {e}");
            return;
        }
    };
    if let Err(e) = snapshot.save(&engine.conf.statefile) {
        error!("could not save state: {e}");
    }
}

fn apply_overrides(conf: &mut RunConfig, args: &Cli) {
    if let Some(polltime) = args.daemon {
        conf.daemon = true;
        conf.polltime = polltime.max(1);
    }
    if args.foreground {
        conf.foreground = true;
    }
    if let Some(logfile) = &args.logfile {
        conf.logfile = Some(logfile.clone());
    }
    if let Some(pidfile) = &args.pidfile {
        conf.pidfile = pidfile.into();
    }
    if let Some(statefile) = &args.statefile {
        conf.statefile = statefile.into();
    }
    conf.debug = args.verbose;
}

fn init_logging(args: &Cli) {
    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    match args.logfile.as_deref() {
        Some("syslog") | None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
        Some(path) => {
            match fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    let _ = tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_writer(move || file.try_clone().expect("log file handle"))
                        .with_ansi(false)
                        .try_init();
                }
                Err(e) => {
                    eprintln!("Failed to open log file {path}: {e}");
                    let _ = tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_writer(std::io::stderr)
                        .try_init();
                }
            }
        }
    }
    if args.logfile.as_deref() == Some("syslog") {
        warn!("syslog output is not wired in this build; logging to stderr");
    }
}
