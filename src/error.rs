use std::path::PathBuf;

use thiserror::Error;

/// Everything that can make a single probe fail. A failed probe is reported
/// as skipped on stderr; it never aborts the remaining probes.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("toolchain step `{step}` exited with status {status}")]
    Toolchain { step: &'static str, status: i32 },

    #[error("toolchain step `{step}` produced no exit status (killed by signal?)")]
    NoExitStatus { step: &'static str },

    #[error("could not launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dump: {0}")]
    MalformedDump(String),

    #[error("probe output is missing `{0}`")]
    MissingOutput(&'static str),

    #[error("required target fact `{0}` has not been discovered yet")]
    MissingFact(&'static str),

    #[error("could not read captured stdout at {path:?}: {source}")]
    Stdout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
