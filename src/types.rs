use chrono::NaiveDate;

/// A key as listed by `gpg --list-keys --with-colons`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub fingerprint: String,
    /// Primary user ID, empty if the key has none.
    pub uid: String,
    pub expires: Option<NaiveDate>,
    pub validity: KeyValidity,
}

/// Validity field of a `pub` record in gpg's colon listing.
///
/// A sync only rejects [`KeyValidity::Revoked`] and [`KeyValidity::Expired`]
/// keys; the other levels describe web-of-trust state and are kept as listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[non_exhaustive]
pub enum KeyValidity {
    #[default]
    Unknown,
    Undefined,
    Never,
    Marginal,
    Full,
    Ultimate,
    Expired,
    Revoked,
}

impl KeyValidity {
    pub fn from_gpg_char(c: char) -> Self {
        match c {
            'o' => Self::Unknown,
            'q' => Self::Undefined,
            'n' => Self::Never,
            'm' => Self::Marginal,
            'f' => Self::Full,
            'u' => Self::Ultimate,
            'e' => Self::Expired,
            'r' => Self::Revoked,
            _ => Self::Unknown,
        }
    }
}

/// Where a Refresher run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    #[default]
    Idle,
    FetchingDocument,
    VerifyingDocument,
    EnumeratingKeys,
    FetchingKeys,
    ValidatingKeys,
    Done,
}

/// Snapshot of a run's progress, published through a [`ProgressSlot`].
///
/// `current_key` is 1-based; both counters are zero outside the per-key stages.
///
/// [`ProgressSlot`]: crate::ProgressSlot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub current_key: usize,
    pub total_keys: usize,
}

impl ProgressEvent {
    pub fn stage(stage: Stage) -> Self {
        Self {
            stage,
            current_key: 0,
            total_keys: 0,
        }
    }

    pub fn key(stage: Stage, current_key: usize, total_keys: usize) -> Self {
        Self {
            stage,
            current_key,
            total_keys,
        }
    }
}

/// How a Refresher run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every key was fetched and is valid.
    Success,
    /// The run completed, but some keys failed. Holds the summary.
    Warning(String),
    /// The run aborted. Holds the description of what went wrong.
    Error(String),
    /// The run was cancelled before completing.
    Canceled,
}

/// Options for a Refresher run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Timeout for the entire run, in seconds.
    /// If None, no timeout is applied.
    pub timeout_secs: Option<u64>,
}
