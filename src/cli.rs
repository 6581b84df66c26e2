//! Command-line interface for vigil.
use clap::{ArgAction, Parser};

use crate::error::VigilError;
use crate::service::Action;

/// Command-line options. Action verbs are positional arguments so the
/// surface reads `vigil -c file start nginx`.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, author)]
#[command(about = "A host monitoring daemon", long_about = None)]
pub struct Cli {
    /// Use this control file.
    #[arg(short = 'c', long = "conf", value_name = "FILE")]
    pub controlfile: Option<String>,

    /// Run as a daemon once per n seconds.
    #[arg(short = 'd', long = "daemon", value_name = "SECONDS")]
    pub daemon: Option<u64>,

    /// Set group name for start, stop, restart, monitor and unmonitor.
    #[arg(short = 'g', long = "group", value_name = "NAME")]
    pub group: Option<String>,

    /// Print log information to this file, or "syslog".
    #[arg(short = 'l', long = "logfile", value_name = "FILE")]
    pub logfile: Option<String>,

    /// Use this lock file in daemon mode.
    #[arg(short = 'p', long = "pidfile", value_name = "FILE")]
    pub pidfile: Option<String>,

    /// Set the file vigil should write state information to.
    #[arg(short = 's', long = "statefile", value_name = "FILE")]
    pub statefile: Option<String>,

    /// Do not run in background (needed for run from init).
    #[arg(short = 'I', long = "interactive")]
    pub foreground: bool,

    /// Run syntax check for the control file and exit.
    #[arg(short = 't', long = "test")]
    pub test: bool,

    /// Verbose mode; twice for diagnostic trace output.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Print SHA1 and MD5 hashes of the file (or stdin) and exit.
    #[arg(short = 'H', long = "hash", value_name = "FILE", num_args = 0..=1)]
    pub hash: Option<Option<String>>,

    /// Print the unique instance id and exit.
    #[arg(long = "id")]
    pub id: bool,

    /// Reset the unique instance id. Use with caution.
    #[arg(long = "resetid")]
    pub resetid: bool,

    /// Optional action: start|stop|restart|monitor|unmonitor <name|all>,
    /// reload, status, summary, quit, validate, procmatch <pattern>.
    #[arg(value_name = "ARGS", trailing_var_arg = true)]
    pub action: Vec<String>,
}

/// A parsed positional action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// A service action; `service` is `None` when only `-g` selects the
    /// targets, and `Some("all")` addresses every service.
    Control {
        action: Action,
        service: Option<String>,
    },
    Reload,
    Status,
    Summary,
    Quit,
    Validate,
    Procmatch(String),
}

/// Parses the positional arguments into a [`Verb`]. No arguments means the
/// default action (daemon or single validation pass).
pub fn parse_verb(args: &[String]) -> Result<Option<Verb>, VigilError> {
    let Some(first) = args.first() else {
        return Ok(None);
    };
    let rest = args.get(1).map(String::as_str);
    let verb = match first.as_str() {
        "start" | "stop" | "restart" | "monitor" | "unmonitor" => {
            let action: Action = first
                .parse()
                .map_err(|_| VigilError::InvalidAction(first.clone()))?;
            Verb::Control {
                action,
                service: rest.map(str::to_string),
            }
        }
        "reload" => Verb::Reload,
        "status" => Verb::Status,
        "summary" => Verb::Summary,
        "quit" => Verb::Quit,
        "validate" => Verb::Validate,
        "procmatch" => match rest {
            Some(pattern) => Verb::Procmatch(pattern.to_string()),
            None => {
                return Err(VigilError::InvalidAction(
                    "procmatch requires a pattern".to_string(),
                ));
            }
        },
        other => return Err(VigilError::InvalidAction(other.to_string())),
    };
    Ok(Some(verb))
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
