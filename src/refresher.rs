use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::document::{SharedKeylist, SyncTarget, parse_keylist};
use crate::error::{Error, Result};
use crate::fetch::DocumentFetcher;
use crate::fingerprint::Fingerprint;
use crate::openpgp::OpenPgp;
use crate::progress::{CancelFlag, ProgressSlot};
use crate::types::{ProgressEvent, Stage, SyncOptions, SyncOutcome};

/// Runs keylist synchronizations.
///
/// A run refreshes the authority key, downloads the keylist and its detached
/// signature, verifies the signature against the authority, and then fetches
/// and validates every listed key in document order. Keys that cannot be
/// fetched or are revoked or expired degrade the run to a warning; failures
/// concerning the authority or the document abort it.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> keylist_sync::Result<()> {
/// use std::sync::Arc;
/// use keylist_sync::{FetcherOptions, GnuPg, HttpFetcher, KeylistDocument, Refresher};
///
/// let refresher = Refresher::new(
///     Arc::new(GnuPg::with_homedir("/tmp/sync-keyring")),
///     Arc::new(HttpFetcher::new(FetcherOptions::default())?),
/// );
/// let keylist = KeylistDocument::new(
///     "ABAF11C65A2970B130ABE3C479BE3E4300411886",
///     "keys.openpgp.org",
/// )?
/// .with_keylist_url("https://example.org/keylist.txt")
/// .into_shared();
///
/// let handle = refresher.start(&keylist, true)?;
/// let outcome = handle.join().await;
/// println!("{outcome:?}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Refresher {
    pgp: Arc<dyn OpenPgp>,
    fetcher: Arc<dyn DocumentFetcher>,
    options: SyncOptions,
}

struct KeyFailure {
    fingerprint: Fingerprint,
    error: Error,
}

impl Refresher {
    pub fn new(pgp: Arc<dyn OpenPgp>, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self {
            pgp,
            fetcher,
            options: SyncOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Starts a run for `keylist` on a background task.
    ///
    /// Fails with [`Error::AlreadySyncing`] if another run owns the document.
    /// `force` only marks the run as user requested; deciding whether a
    /// sync is due is up to the caller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, keylist: &SharedKeylist, force: bool) -> Result<RefresherHandle> {
        let target = keylist.lock().begin_sync()?;
        info!(authority = %target.authority, force, "starting keylist sync");

        let cancel = CancelFlag::new();
        let progress = ProgressSlot::new();

        let task = tokio::spawn({
            let refresher = self.clone();
            let guard = SyncGuard::new(keylist.clone());
            let cancel = cancel.clone();
            let progress = progress.clone();
            async move {
                let outcome = refresher.run(&target, &cancel, &progress).await;
                guard.finish(&outcome);
                outcome
            }
        });

        Ok(RefresherHandle {
            cancel,
            progress,
            task,
        })
    }

    /// Executes one run in the current task.
    ///
    /// Never fails: every error ends up in the returned outcome. A
    /// [`Stage::Done`] event is published last.
    pub async fn run(
        &self,
        target: &SyncTarget,
        cancel: &CancelFlag,
        progress: &ProgressSlot,
    ) -> SyncOutcome {
        let sync = self.sync(target, cancel, progress);

        let result = match self.options.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), sync)
                .await
                .unwrap_or(Err(Error::Timeout(secs))),
            None => sync.await,
        };

        let outcome = result.unwrap_or_else(|err| SyncOutcome::Error(err.to_string()));
        progress.publish(ProgressEvent::stage(Stage::Done));

        match &outcome {
            SyncOutcome::Success => info!(authority = %target.authority, "keylist synced"),
            SyncOutcome::Warning(warning) => {
                warn!(authority = %target.authority, %warning, "keylist synced with warnings")
            }
            SyncOutcome::Error(error) => {
                warn!(authority = %target.authority, %error, "keylist sync failed")
            }
            SyncOutcome::Canceled => info!(authority = %target.authority, "keylist sync canceled"),
        }

        outcome
    }

    async fn sync(
        &self,
        target: &SyncTarget,
        cancel: &CancelFlag,
        progress: &ProgressSlot,
    ) -> Result<SyncOutcome> {
        progress.publish(ProgressEvent::stage(Stage::FetchingDocument));

        // Refresh the authority first so a revocation is seen before it
        // vouches for anything. If the keyserver cannot deliver it, a local
        // copy that is still valid will do.
        let mut authority_failure = None;
        if let Err(error) = self
            .pgp
            .fetch_key(&target.keyserver, &target.authority)
            .await
        {
            if !error.is_per_key() {
                return Err(error);
            }
            warn!(authority = %target.authority, %error, "could not refresh authority key");
            authority_failure = Some(KeyFailure {
                fingerprint: target.authority.clone(),
                error,
            });
        }
        let authority = self.pgp.inspect_key(&target.authority).await?;
        debug!(authority = %target.authority, uid = %authority.uid, expires = ?authority.expires, "authority key valid");

        let mut failures = Vec::new();
        let Some(keylist_url) = &target.keylist_url else {
            debug!(authority = %target.authority, "no keylist URL, only the authority key is synced");
            return Ok(self.conclude(authority_failure, &failures, 0).await);
        };

        let document = self.fetcher.fetch(keylist_url).await?;
        let signature = match target.signature_location() {
            Some(location) => Some(self.fetcher.fetch(&location).await?),
            None => None,
        };

        progress.publish(ProgressEvent::stage(Stage::VerifyingDocument));
        self.pgp
            .verify(&document, signature.as_deref(), &target.authority)
            .await?;

        progress.publish(ProgressEvent::stage(Stage::EnumeratingKeys));
        let fingerprints = parse_keylist(&document)?;
        let total = fingerprints.len();
        debug!(authority = %target.authority, total, "keylist verified");

        for (idx, fp) in fingerprints.iter().enumerate() {
            if cancel.is_canceled() {
                debug!(processed = idx, total, "cancellation requested");
                return Ok(SyncOutcome::Canceled);
            }

            let current = idx + 1;
            if let Err(error) = self.refresh_key(target, fp, current, total, progress).await {
                if !error.is_per_key() {
                    return Err(error);
                }
                warn!(fingerprint = %fp, %error, "key failed to sync");
                failures.push(KeyFailure {
                    fingerprint: fp.clone(),
                    error,
                });
            }
        }

        Ok(self.conclude(authority_failure, &failures, total).await)
    }

    async fn conclude(
        &self,
        authority_failure: Option<KeyFailure>,
        failures: &[KeyFailure],
        total: usize,
    ) -> SyncOutcome {
        if authority_failure.is_none() && failures.is_empty() {
            return SyncOutcome::Success;
        }

        let mut lines = Vec::new();
        if let Some(failure) = &authority_failure {
            lines.push(format!(
                "authority key {} was not refreshed, using the local copy: {}",
                failure.fingerprint,
                failure_reason(&failure.error)
            ));
        }
        if !failures.is_empty() {
            lines.push(self.summarize(failures, total).await);
        }

        SyncOutcome::Warning(lines.join("\n"))
    }

    async fn refresh_key(
        &self,
        target: &SyncTarget,
        fp: &Fingerprint,
        current: usize,
        total: usize,
        progress: &ProgressSlot,
    ) -> Result<()> {
        progress.publish(ProgressEvent::key(Stage::FetchingKeys, current, total));
        self.pgp.fetch_key(&target.keyserver, fp).await?;

        progress.publish(ProgressEvent::key(Stage::ValidatingKeys, current, total));
        let key = self.pgp.inspect_key(fp).await?;
        debug!(fingerprint = %fp, uid = %key.uid, expires = ?key.expires, "key valid");

        Ok(())
    }

    async fn summarize(&self, failures: &[KeyFailure], total: usize) -> String {
        let mut summary = format!("{} of {} keys failed to sync:", failures.len(), total);

        for failure in failures {
            // the identity is only known if an older copy of the key is around
            let identity = self
                .pgp
                .get_identity(&failure.fingerprint)
                .await
                .ok()
                .flatten();

            summary.push('\n');
            summary.push_str(failure.fingerprint.as_str());
            if let Some(identity) = identity {
                summary.push_str(&format!(" ({identity})"));
            }
            summary.push_str(": ");
            summary.push_str(&failure_reason(&failure.error));
        }

        summary
    }
}

fn failure_reason(error: &Error) -> String {
    match error {
        Error::NotFoundOnKeyserver(_) => "not found on keyserver".to_string(),
        Error::InvalidKeyserver(keyserver) => format!("keyserver {keyserver} unavailable"),
        Error::NotFoundInKeyring(_) => "not found in keyring".to_string(),
        Error::RevokedKey(_) => "revoked".to_string(),
        Error::ExpiredKey(_) => "expired".to_string(),
        other => other.to_string(),
    }
}

/// Releases the document if a run's task ends without recording an outcome,
/// e.g. because it panicked or was aborted.
struct SyncGuard {
    keylist: Option<SharedKeylist>,
}

impl SyncGuard {
    fn new(keylist: SharedKeylist) -> Self {
        Self {
            keylist: Some(keylist),
        }
    }

    fn finish(mut self, outcome: &SyncOutcome) {
        if let Some(keylist) = self.keylist.take() {
            keylist.lock().finish_sync(outcome, Utc::now());
        }
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        if let Some(keylist) = self.keylist.take() {
            keylist.lock().finish_sync(
                &SyncOutcome::Error("sync task ended unexpectedly".to_string()),
                Utc::now(),
            );
        }
    }
}

/// Control and observation of a run started by [`Refresher::start`].
///
/// Dropping the handle does not stop the run.
pub struct RefresherHandle {
    cancel: CancelFlag,
    progress: ProgressSlot,
    task: JoinHandle<SyncOutcome>,
}

impl RefresherHandle {
    /// Requests cooperative cancellation. The key being processed finishes
    /// first; keys already fetched stay in the keyring.
    pub fn cancel_early(&self) {
        self.cancel.cancel();
    }

    /// The latest progress event not read yet, if any.
    pub fn try_recv_progress(&self) -> Option<ProgressEvent> {
        self.progress.try_recv()
    }

    /// A receiver for the run's progress that can outlive the handle.
    pub fn progress(&self) -> ProgressSlot {
        self.progress.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to end. The document has been updated by the time
    /// this returns.
    pub async fn join(self) -> SyncOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => SyncOutcome::Error(format!("sync task failed: {err}")),
        }
    }
}
