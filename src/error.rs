use std::io;
use std::path::PathBuf;

/// Errors raised by the journal and the queue engine.
///
/// Every variant except `Poisoned` corresponds to a condition the server
/// treats as fatal: the journals are the only durable copy of the queue, so
/// there is no partial state to keep serving from.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem failure while opening, writing, flushing or removing a journal.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The configured journal directory does not exist.
    #[error("journal directory does not exist: {}", .0.display())]
    MissingJournalDir(PathBuf),

    /// A complete journal record failed to decode.
    #[error("corrupt journal {} at byte {offset}: {reason}", .path.display())]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: &'static str,
    },

    /// Payload longer than the journal's 32-bit length prefix can describe.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// A previous lock holder panicked while mutating the engine.
    #[error("engine lock poisoned")]
    Poisoned,

    /// A blocking engine task panicked or was cancelled.
    #[cfg(feature = "server")]
    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The TCP listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
