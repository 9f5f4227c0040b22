use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, Keyserver};
use crate::openpgp::OpenPgp;
use crate::parse::{classify_listing, classify_recv, classify_verify, parse_keys};
use crate::types::Key;

const DEFAULT_GPG_PROGRAM: &str = "gpg";

/// [`OpenPgp`] implementation driving the `gpg` binary.
///
/// Every invocation runs non-interactively (`--batch --no-tty`) with
/// `LC_ALL=C` so its output can be classified.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> keylist_sync::Result<()> {
/// use keylist_sync::{GnuPg, OpenPgp, normalize_fingerprint, normalize_keyserver};
///
/// let gpg = GnuPg::with_homedir("/tmp/sync-keyring").timeout(60);
/// let fp = normalize_fingerprint("ABAF 11C6 5A29 70B1 30AB  E3C4 79BE 3E43 0041 1886")?;
/// gpg.fetch_key(&normalize_keyserver("keys.openpgp.org")?, &fp).await?;
/// println!("{:?}", gpg.get_identity(&fp).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GnuPg {
    program: PathBuf,
    homedir: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

impl Default for GnuPg {
    fn default() -> Self {
        Self::new()
    }
}

impl GnuPg {
    /// Uses `gpg` from `PATH` against gpg's default home directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_GPG_PROGRAM),
            homedir: None,
            timeout_secs: None,
        }
    }

    /// Uses `gpg` from `PATH` against the keyring in `path`.
    #[must_use]
    pub fn with_homedir(path: impl Into<PathBuf>) -> Self {
        Self {
            homedir: Some(path.into()),
            ..Self::new()
        }
    }

    /// Sets the gpg binary to run, e.g. `/usr/bin/gpg2`.
    #[must_use]
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Bounds each gpg invocation to `secs` seconds.
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Checks whether the configured gpg binary can be executed.
    pub async fn is_available(&self) -> bool {
        match Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(err) => {
                debug!(program = %self.program.display(), error = %err, "gpg not available");
                false
            }
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("LC_ALL", "C").args(["--batch", "--no-tty"]);
        if let Some(homedir) = &self.homedir {
            cmd.arg("--homedir").arg(homedir);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run_gpg<I, S>(&self, args: I, input: Option<&[u8]>) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let run = async {
            let mut child = cmd.spawn()?;
            let stdin = match input {
                Some(_) => Some(child.stdin.take().ok_or(Error::StdinCaptureFailed)?),
                None => None,
            };

            // gpg may exit before reading all of its input, e.g. when the
            // signature is unusable. Its stderr then tells what happened, so
            // feed stdin while collecting the output.
            let feed = async move {
                if let (Some(mut stdin), Some(data)) = (stdin, input) {
                    match stdin.write_all(data).await {
                        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                            debug!("gpg stopped reading its input");
                        }
                        other => other?,
                    }
                    // stdin is dropped here, closing it so gpg sees end of input
                }
                Ok::<_, io::Error>(())
            };

            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            Ok::<_, Error>(output?)
        };

        let output = match self.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
                .await
                .map_err(|_| Error::Timeout(secs))??,
            None => run.await?,
        };

        debug!(
            status = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "gpg finished"
        );
        Ok(output)
    }

    async fn list_key(&self, fp: &Fingerprint) -> Result<Output> {
        self.run_gpg(["--with-colons", "--list-keys", fp.as_str()], None)
            .await
    }
}

fn check_gpg_error(output: &Output) -> Error {
    Error::Gpg {
        status: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

#[async_trait]
impl OpenPgp for GnuPg {
    async fn fetch_key(&self, keyserver: &Keyserver, fp: &Fingerprint) -> Result<()> {
        let output = self
            .run_gpg(
                ["--keyserver", keyserver.as_str(), "--recv-keys", fp.as_str()],
                None,
            )
            .await?;

        classify_recv(&String::from_utf8_lossy(&output.stderr), keyserver, fp)?;

        if !output.status.success() {
            return Err(check_gpg_error(&output));
        }

        Ok(())
    }

    async fn inspect_key(&self, fp: &Fingerprint) -> Result<Key> {
        let output = self.list_key(fp).await?;
        classify_listing(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            fp,
        )
    }

    async fn get_identity(&self, fp: &Fingerprint) -> Result<Option<String>> {
        let output = self.list_key(fp).await?;
        if !output.status.success() {
            return Ok(None);
        }

        let identity = parse_keys(&String::from_utf8_lossy(&output.stdout))
            .into_iter()
            .find(|k| k.fingerprint == fp.as_str())
            .map(|k| k.uid)
            .filter(|uid| !uid.is_empty());

        Ok(identity)
    }

    async fn verify(
        &self,
        message: &[u8],
        signature: Option<&[u8]>,
        signer: &Fingerprint,
    ) -> Result<()> {
        let mut args = vec![
            "--keyid-format".to_string(),
            "0xlong".to_string(),
            "--verify".to_string(),
        ];

        // gpg reads a detached signature from a file and the signed data from
        // stdin. The file has to outlive the gpg call.
        let sig_file = match signature {
            Some(sig) => {
                let mut file = tempfile::NamedTempFile::new()?;
                file.write_all(sig)?;
                file.flush()?;
                args.push(file.path().to_string_lossy().to_string());
                Some(file)
            }
            None => None,
        };
        args.push("-".to_string());

        let output = self.run_gpg(&args, Some(message)).await?;
        drop(sig_file);

        classify_verify(
            &String::from_utf8_lossy(&output.stderr),
            output.status.success(),
            signer,
        )
    }
}
