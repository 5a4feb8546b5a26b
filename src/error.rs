use thiserror::Error;

/// Flow-level error taxonomy.
///
/// `Validation` never advances or clears a conversation step; the handler
/// re-prompts and the user retries the same input. Every other variant
/// aborts the active flow: the handler clears the stored step and releases
/// any working tree before surfacing the message.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed user input (worker name, URL, credential shape).
    #[error("{0}")]
    Validation(String),

    /// The Cloudflare API rejected a request; carries its reason verbatim.
    #[error("{0}")]
    Remote(String),

    /// `git clone` failed (unreachable, private, or malformed repository).
    #[error("failed to clone repository: {0}")]
    CloneFailed(String),

    /// No recognizable entry script in the cloned tree.
    #[error("no main script file found; the repository needs index.js, worker.js, or a similar entry point")]
    EntryPointNotFound,

    #[error(transparent)]
    Telegram(#[from] teloxide::RequestError),

    #[error("session store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Validation errors keep the current step; everything else clears it.
    pub fn keeps_step(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Whether the message is written for the end user. Infrastructure
    /// failures get a generic apology instead of the raw error.
    pub fn user_facing(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Remote(_) | Error::CloneFailed(_) | Error::EntryPointNotFound
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
