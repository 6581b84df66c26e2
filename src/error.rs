//! Error handling for vigild.
use thiserror::Error;

/// Defines all possible errors that can occur in the monitoring engine.
#[derive(Debug, Error)]
pub enum VigilError {
    /// Error reading or accessing the control file.
    #[error("Failed to read control file: {0}")]
    ControlFileRead(#[from] std::io::Error),

    /// Error parsing the YAML control file.
    #[error("Invalid control file: {0}")]
    ControlFileParse(#[from] serde_yaml::Error),

    /// A service named in an action or rule does not exist.
    #[error("Service '{0}' -- doesn't exist")]
    UnknownService(String),

    /// A group named with `-g` does not exist in the control file.
    #[error("Group '{0}' -- doesn't exist")]
    UnknownGroup(String),

    /// Error when a dependency reference is undefined in the control file.
    #[error("Service '{service}' declares unknown dependency '{dependency}'")]
    UnknownDependency {
        /// The service with an invalid dependency reference.
        service: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// Error when the dependency graph contains a cycle.
    #[error("Detected dependency cycle: {cycle}")]
    DependencyCycle {
        /// Human-readable cycle description (e.g. `a -> b -> a`).
        cycle: String,
    },

    /// A rule was attached to a service type it cannot be evaluated for.
    #[error("Service '{service}': rule '{rule}' is not applicable to type {kind}")]
    RuleNotApplicable {
        /// The offending service.
        service: String,
        /// Short rule name.
        rule: String,
        /// Service type name.
        kind: String,
    },

    /// An action verb on the command line was not recognised.
    #[error("Invalid action '{0}'  (-h will show valid arguments)")]
    InvalidAction(String),

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoison(String),

    /// Error for the persisted state file.
    #[error("State file error: {0}")]
    State(#[from] StateFileError),

    /// Error for the HTTP control channel.
    #[error("Control channel error: {0}")]
    Http(#[from] HttpClientError),

    /// Error raised by OS-level calls through nix.
    #[error(transparent)]
    Errno(#[from] nix::errno::Errno),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `VigilError`.
impl<T> From<std::sync::PoisonError<T>> for VigilError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        VigilError::MutexPoison(err.to_string())
    }
}

/// Error type for the persisted state file.
#[derive(Debug, Error)]
pub enum StateFileError {
    /// Error reading or writing the state file.
    #[error("Failed to read state file: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing JSON contents of the state file.
    #[error("Failed to parse state file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error type for the loopback HTTP control client.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// Could not reach the daemon's control socket.
    #[error("Cannot connect to the vigil daemon. Did you start it with http support?")]
    NotAvailable(#[source] std::io::Error),

    /// Socket I/O failed mid-request.
    #[error("Control socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The status line of the response could not be parsed.
    #[error("Cannot parse status in response: {0}")]
    BadStatusLine(String),

    /// The daemon rejected the action.
    #[error("Action failed -- {0}")]
    Rejected(String),
}
