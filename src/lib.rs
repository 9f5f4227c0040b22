//! Keep a local GnuPG keyring in sync with authority-signed keylists.
//!
//! An authority publishes a keylist: a document listing the fingerprints of
//! keys its members should have, with a detached signature made by the
//! authority key. A [`Refresher`] run downloads the keylist, verifies it was
//! signed by the expected authority, and fetches and validates every listed
//! key from a keyserver, reporting progress through a single-slot
//! [`ProgressSlot`] and honoring cooperative cancellation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keylist_sync::{FetcherOptions, GnuPg, HttpFetcher, KeylistDocument, Refresher};
//!
//! #[tokio::main]
//! async fn main() -> keylist_sync::Result<()> {
//!     let refresher = Refresher::new(
//!         Arc::new(GnuPg::new()),
//!         Arc::new(HttpFetcher::new(FetcherOptions::default())?),
//!     );
//!
//!     let keylist = KeylistDocument::new(
//!         "ABAF 11C6 5A29 70B1 30AB  E3C4 79BE 3E43 0041 1886",
//!         "hkps://keys.openpgp.org",
//!     )?
//!     .with_keylist_url("https://example.org/keylist.txt")
//!     .into_shared();
//!
//!     let handle = refresher.start(&keylist, false)?;
//!     while !handle.is_finished() {
//!         if let Some(event) = handle.try_recv_progress() {
//!             println!("{:?} {}/{}", event.stage, event.current_key, event.total_keys);
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     }
//!     handle.join().await;
//!
//!     println!("{:?}", keylist.lock().status());
//!     Ok(())
//! }
//! ```
//!
//! # Requirements
//!
//! - `gpg` (GnuPG 2.x) available, or configured through [`GnuPg::program`]
//! - Network access to the keyserver and the keylist URLs

mod document;
mod error;
mod fetch;
mod fingerprint;
mod gnupg;
mod openpgp;
mod parse;
mod progress;
mod refresher;
mod types;

pub use document::{KeylistDocument, SharedKeylist, SyncStatus, SyncTarget, parse_keylist};
pub use error::{Error, Result};
pub use fetch::{DocumentFetcher, FetcherOptions, HttpFetcher};
pub use fingerprint::{
    Fingerprint, KeyId, Keyserver, fingerprint_to_keyid, normalize_fingerprint,
    normalize_keyserver, validate_fingerprint,
};
pub use gnupg::GnuPg;
pub use openpgp::OpenPgp;
pub use progress::{CancelFlag, ProgressSlot};
pub use refresher::{Refresher, RefresherHandle};
pub use types::{Key, KeyValidity, ProgressEvent, Stage, SyncOptions, SyncOutcome};
