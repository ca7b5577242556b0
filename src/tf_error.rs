use thiserror::Error;

/// Enumerates the ways a transform lookup can fail
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum TfError {
    /// There is no path between the from and to frame.
    #[error("tf_pose_sync: CouldNotFindTransform {} -> {}", .0, .1)]
    CouldNotFindTransform(String, String),
    /// In the event that a write is simultaneously happening with a read of the same tf buffer
    #[error("tf_pose_sync: CouldNotAcquireLock")]
    CouldNotAcquireLock,
    /// A sample on the path could not be turned into a rigid transform.
    #[error("tf_pose_sync: InvalidTransform {} -> {} ({})", .0, .1, .2)]
    InvalidTransform(String, String, String),
}

impl TfError {
    /// True when the frames are simply not connected, as opposed to any other failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TfError::CouldNotFindTransform(..))
    }
}

/// Reasons a command is rejected. A rejected command leaves the registration tables untouched.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{command} is missing the {argument} argument")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("{command}: {value:?} is not a valid number for {argument}")]
    InvalidNumber {
        command: &'static str,
        argument: &'static str,
        value: String,
    },
    #[error("{command}: unknown clause {clause:?}")]
    UnknownClause { command: &'static str, clause: String },
    #[error("{command}: unexpected argument {token:?}")]
    UnexpectedArgument { command: &'static str, token: String },
    #[error("offset rotation (qw qx qy qz) must have a non-zero norm")]
    DegenerateOffset,
    #[error("body {0} does not exist")]
    NoSuchBody(String),
}

/// Reasons a [`crate::SyncConfig`] cannot be built.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("reference frame must not be empty")]
    EmptyReferenceFrame,
    #[error("unexpected creation argument {0:?}")]
    UnexpectedArgument(String),
}
