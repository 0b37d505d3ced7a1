use pmuc_shared::PORT_COUNT;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The PMUc is not answering; nothing may be activated.
    #[error("power settings are unavailable: {0}")]
    Unavailable(String),

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} has not been read from the device yet")]
    NotReady(&'static str),

    #[error("no port {0} (ports are 0..{max})", max = PORT_COUNT)]
    InvalidPort(usize),

    #[error("{value} is outside [{min}, {max}] for {name}")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{name}: {text:?} is not a number")]
    InvalidDraft { name: String, text: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown parameter {0}")]
    UnknownParameter(String),

    #[error("cannot encode status: {0}")]
    Encode(#[from] serde_json::Error),
}
