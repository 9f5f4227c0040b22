use async_trait::async_trait;

use crate::error::Result;
use crate::fingerprint::{Fingerprint, Keyserver};
use crate::types::Key;

/// The OpenPGP operations a Refresher needs from a keyring.
///
/// [`GnuPg`] implements this on top of the `gpg` binary. Tests substitute
/// in-memory keyrings.
///
/// [`GnuPg`]: crate::GnuPg
#[async_trait]
pub trait OpenPgp: Send + Sync {
    /// Receives `fp` from `keyserver` into the local keyring.
    ///
    /// Fails with [`Error::InvalidKeyserver`] if the keyserver cannot be used
    /// and [`Error::NotFoundOnKeyserver`] if it has no such key.
    ///
    /// [`Error::InvalidKeyserver`]: crate::Error::InvalidKeyserver
    /// [`Error::NotFoundOnKeyserver`]: crate::Error::NotFoundOnKeyserver
    async fn fetch_key(&self, keyserver: &Keyserver, fp: &Fingerprint) -> Result<()>;

    /// Returns the key if it is in the keyring and currently usable.
    ///
    /// Fails with `NotFoundInKeyring`, `RevokedKey` or `ExpiredKey`.
    async fn inspect_key(&self, fp: &Fingerprint) -> Result<Key>;

    /// The primary user ID bound to `fp`, if the key is known and has one.
    async fn get_identity(&self, fp: &Fingerprint) -> Result<Option<String>>;

    /// Verifies that `message` carries a good signature made by `signer`.
    ///
    /// With `signature` set, it is a detached signature over `message`;
    /// otherwise `message` must be signed inline.
    async fn verify(
        &self,
        message: &[u8],
        signature: Option<&[u8]>,
        signer: &Fingerprint,
    ) -> Result<()>;
}
