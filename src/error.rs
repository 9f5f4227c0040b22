use std::io;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("command execution failed: {0}")]
    Command(#[from] io::Error),

    #[error("gpg exited with status {status}: {stderr}")]
    Gpg { status: i32, stderr: String },

    #[error("invalid fingerprint '{fingerprint}': {reason}")]
    InvalidFingerprint { fingerprint: String, reason: String },

    #[error("invalid keyserver '{0}'")]
    InvalidKeyserver(String),

    #[error("key {0} not found on keyserver")]
    NotFoundOnKeyserver(String),

    #[error("key {0} not found in keyring")]
    NotFoundInKeyring(String),

    #[error("key {0} is revoked")]
    RevokedKey(String),

    #[error("key {0} is expired")]
    ExpiredKey(String),

    #[error("bad signature")]
    BadSignature,

    #[error("signature verification failed: {0}")]
    VerificationError(String),

    #[error("signed with wrong key: expected {expected}, got {actual}")]
    SignedWithWrongKey { expected: String, actual: String },

    #[error("failed to download {url}: {reason}")]
    Http { url: String, reason: String },

    #[error("failed to download {url}: HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("malformed keylist at line {line}: {reason}")]
    MalformedKeylist { line: usize, reason: String },

    #[error("keylist is already syncing")]
    AlreadySyncing,

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("failed to capture stdin of subprocess")]
    StdinCaptureFailed,
}

impl Error {
    /// Whether this error, raised while fetching or inspecting a single
    /// member key, only degrades that key instead of aborting the run.
    pub fn is_per_key(&self) -> bool {
        matches!(
            self,
            Error::InvalidKeyserver(_)
                | Error::NotFoundOnKeyserver(_)
                | Error::NotFoundInKeyring(_)
                | Error::RevokedKey(_)
                | Error::ExpiredKey(_)
                | Error::Gpg { .. }
                | Error::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
