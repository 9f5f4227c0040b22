use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, Keyserver, normalize_fingerprint, normalize_keyserver};
use crate::types::SyncOutcome;

/// A [`KeylistDocument`] shared between its owner and a running Refresher.
///
/// The lock is only taken briefly, to begin and to finish a run; it is never
/// held across I/O.
pub type SharedKeylist = Arc<Mutex<KeylistDocument>>;

/// One authority's sync configuration together with the outcome of its last
/// run.
///
/// While [`is_syncing`](Self::is_syncing) is true the document belongs to the
/// running Refresher and configuration edits are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeylistDocument {
    authority: Fingerprint,
    keyserver: Keyserver,
    keylist_url: Option<String>,
    signature_url: Option<String>,
    last_synced: Option<DateTime<Utc>>,
    error: Option<String>,
    warning: Option<String>,
    syncing: bool,
}

/// What a Refresher run needs to know about its document, copied out when the
/// run begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub authority: Fingerprint,
    pub keyserver: Keyserver,
    pub keylist_url: Option<String>,
    pub signature_url: Option<String>,
}

impl SyncTarget {
    /// Where to download the detached signature from. Defaults to the keylist
    /// URL with `.sig` appended.
    pub fn signature_location(&self) -> Option<String> {
        match (&self.keylist_url, &self.signature_url) {
            (_, Some(sig)) => Some(sig.clone()),
            (Some(list), None) => Some(format!("{list}.sig")),
            (None, None) => None,
        }
    }
}

/// Summary of a document's sync state, for whoever displays it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Syncing,
    Error(String),
    /// Synced, but with the given warning.
    Warning {
        last_synced: Option<DateTime<Utc>>,
        warning: String,
    },
    Synced(DateTime<Utc>),
    Never,
}

impl KeylistDocument {
    pub fn new(authority: &str, keyserver: &str) -> Result<Self> {
        Ok(Self {
            authority: normalize_fingerprint(authority)?,
            keyserver: normalize_keyserver(keyserver)?,
            keylist_url: None,
            signature_url: None,
            last_synced: None,
            error: None,
            warning: None,
            syncing: false,
        })
    }

    #[must_use]
    pub fn with_keylist_url(mut self, url: impl Into<String>) -> Self {
        self.keylist_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_signature_url(mut self, url: impl Into<String>) -> Self {
        self.signature_url = Some(url.into());
        self
    }

    pub fn into_shared(self) -> SharedKeylist {
        Arc::new(Mutex::new(self))
    }

    pub fn authority(&self) -> &Fingerprint {
        &self.authority
    }

    pub fn keyserver(&self) -> &Keyserver {
        &self.keyserver
    }

    pub fn keylist_url(&self) -> Option<&str> {
        self.keylist_url.as_deref()
    }

    pub fn signature_url(&self) -> Option<&str> {
        self.signature_url.as_deref()
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.syncing {
            return Err(Error::AlreadySyncing);
        }
        Ok(())
    }

    /// Changes the authority. Refused while a run owns the document.
    pub fn set_authority(&mut self, authority: &str) -> Result<()> {
        self.ensure_idle()?;
        self.authority = normalize_fingerprint(authority)?;
        Ok(())
    }

    /// Changes the keyserver. Refused while a run owns the document.
    pub fn set_keyserver(&mut self, keyserver: &str) -> Result<()> {
        self.ensure_idle()?;
        self.keyserver = normalize_keyserver(keyserver)?;
        Ok(())
    }

    /// Changes both document locations. Refused while a run owns the document.
    pub fn set_urls(
        &mut self,
        keylist_url: Option<String>,
        signature_url: Option<String>,
    ) -> Result<()> {
        self.ensure_idle()?;
        self.keylist_url = keylist_url;
        self.signature_url = signature_url;
        Ok(())
    }

    /// Hands the document to a new run: marks it syncing, clears the previous
    /// run's error and warning, and returns what the run needs.
    pub fn begin_sync(&mut self) -> Result<SyncTarget> {
        self.ensure_idle()?;
        self.syncing = true;
        self.error = None;
        self.warning = None;

        Ok(SyncTarget {
            authority: self.authority.clone(),
            keyserver: self.keyserver.clone(),
            keylist_url: self.keylist_url.clone(),
            signature_url: self.signature_url.clone(),
        })
    }

    /// Records the outcome of the run started by [`begin_sync`](Self::begin_sync)
    /// and releases the document.
    pub fn finish_sync(&mut self, outcome: &SyncOutcome, now: DateTime<Utc>) {
        self.syncing = false;
        match outcome {
            SyncOutcome::Success => self.mark_synced(now),
            SyncOutcome::Warning(warning) => {
                self.warning = Some(warning.clone());
                self.mark_synced(now);
            }
            SyncOutcome::Error(error) => self.error = Some(error.clone()),
            SyncOutcome::Canceled => {}
        }
    }

    fn mark_synced(&mut self, now: DateTime<Utc>) {
        // never move backwards, e.g. after a clock adjustment
        self.last_synced = Some(self.last_synced.map_or(now, |prev| prev.max(now)));
    }

    pub fn status(&self) -> SyncStatus {
        if self.syncing {
            return SyncStatus::Syncing;
        }
        if let Some(error) = &self.error {
            return SyncStatus::Error(error.clone());
        }
        if let Some(warning) = &self.warning {
            return SyncStatus::Warning {
                last_synced: self.last_synced,
                warning: warning.clone(),
            };
        }
        match self.last_synced {
            Some(ts) => SyncStatus::Synced(ts),
            None => SyncStatus::Never,
        }
    }

    /// Whether a non-forced sync is due: never synced, last run failed, or the
    /// last success is at least `interval` old.
    pub fn is_due(&self, interval: TimeDelta, now: DateTime<Utc>) -> bool {
        if self.syncing {
            return false;
        }
        if self.error.is_some() {
            return true;
        }
        match self.last_synced {
            Some(ts) => now - ts >= interval,
            None => true,
        }
    }
}

/// Parses a keylist document into its fingerprints, in document order.
///
/// One fingerprint per line; `#` starts a comment and blank lines are
/// ignored. Repeated fingerprints are kept only once.
pub fn parse_keylist(document: &[u8]) -> Result<Vec<Fingerprint>> {
    let text = std::str::from_utf8(document).map_err(|err| Error::MalformedKeylist {
        line: 0,
        reason: format!("not valid UTF-8: {err}"),
    })?;

    let mut fingerprints: Vec<Fingerprint> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in text.lines().enumerate() {
        let content = raw.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }

        let fp = normalize_fingerprint(content).map_err(|err| Error::MalformedKeylist {
            line: idx + 1,
            reason: err.to_string(),
        })?;

        if !seen.insert(fp.clone()) {
            debug!(fingerprint = %fp, line = idx + 1, "skipping duplicate fingerprint");
            continue;
        }
        fingerprints.push(fp);
    }

    Ok(fingerprints)
}
