//! Interpretation of gpg's output.
//!
//! gpg reports most outcomes only as human readable text on stderr, so the
//! classifiers here match on stable key phrases rather than whole lines.
//! Every gpg invocation runs with `LC_ALL=C` to keep those phrases in English.

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, Keyserver};
use crate::types::{Key, KeyValidity};

pub fn parse_keys(output: &str) -> Vec<Key> {
    let mut keys = Vec::new();
    let mut current_key: Option<KeyBuilder> = None;

    for line in output.lines() {
        let fields: Vec<&str> = line.split(':').collect();

        match fields[0] {
            "pub" => {
                if let Some(builder) = current_key.take() {
                    builder.push_into(&mut keys);
                }
                current_key = Some(KeyBuilder::from_pub_fields(&fields));
            }
            // The first fpr after a pub line is the primary key's; later ones
            // belong to subkeys.
            "fpr" => {
                if let Some(ref mut builder) = current_key
                    && builder.fingerprint.is_none()
                    && fields.len() > 9
                {
                    builder.fingerprint = Some(fields[9].to_uppercase());
                }
            }
            "uid" => {
                if let Some(ref mut builder) = current_key
                    && builder.uid.is_none()
                    && fields.len() > 9
                {
                    builder.uid = Some(unescape_colons(fields[9]));
                }
            }
            "sub" | "ssb" | "uat" | "rev" | "tru" | "sig" | "grp" => {}
            other if !other.is_empty() => {
                debug!(record_type = other, "skipping unknown GPG record type");
            }
            _ => {}
        }
    }

    if let Some(builder) = current_key {
        builder.push_into(&mut keys);
    }

    keys
}

/// Classifies the result of `gpg --recv-keys`.
///
/// Only the stderr phrases are decisive here; the caller still treats an
/// unexplained non-zero exit status as a failure.
pub fn classify_recv(stderr: &str, keyserver: &Keyserver, fp: &Fingerprint) -> Result<()> {
    if stderr.contains("No keyserver available") {
        return Err(Error::InvalidKeyserver(keyserver.to_string()));
    }

    if stderr.contains("not found on keyserver") || stderr.contains("receive failed: No data") {
        return Err(Error::NotFoundOnKeyserver(fp.to_string()));
    }

    Ok(())
}

/// Classifies the result of `gpg --list-keys --with-colons <fp>`.
///
/// Returns the listed key when it is present and neither revoked nor expired.
pub fn classify_listing(stdout: &str, stderr: &str, fp: &Fingerprint) -> Result<Key> {
    if stderr.contains("error reading key: No public key") {
        return Err(Error::NotFoundInKeyring(fp.to_string()));
    }

    let key = parse_keys(stdout)
        .into_iter()
        .find(|k| k.fingerprint == fp.as_str())
        .ok_or_else(|| Error::NotFoundInKeyring(fp.to_string()))?;

    match key.validity {
        KeyValidity::Revoked => Err(Error::RevokedKey(fp.to_string())),
        KeyValidity::Expired => Err(Error::ExpiredKey(fp.to_string())),
        _ => Ok(key),
    }
}

/// Classifies the result of `gpg --verify`, checking that the signature is
/// good and was made by `expected`.
///
/// Checks run in a fixed order so that output carrying several signals always
/// maps to the same error: bad signature, then missing or unusable signature
/// data, then a revoked signer, then a signer other than `expected`. Anything
/// short of positive evidence fails as [`Error::VerificationError`].
pub fn classify_verify(stderr: &str, exit_ok: bool, expected: &Fingerprint) -> Result<()> {
    if stderr.contains("BAD signature") {
        return Err(Error::BadSignature);
    }

    for phrase in [
        "No public key",
        "no valid OpenPGP data found",
        "could not be verified",
    ] {
        if stderr.contains(phrase) {
            return Err(Error::VerificationError(phrase.to_string()));
        }
    }

    if stderr.contains("revoked by its owner") {
        return Err(Error::RevokedKey(expected.to_string()));
    }

    if !stderr.contains("Signature made") || !stderr.contains("Good signature from") {
        return Err(Error::VerificationError(
            "no good signature reported".to_string(),
        ));
    }

    let signer = extract_signer_keyid(stderr).ok_or_else(|| {
        Error::VerificationError("could not determine the signing key".to_string())
    })?;

    if !signer_matches(&signer, expected) {
        return Err(Error::SignedWithWrongKey {
            expected: expected.to_string(),
            actual: signer,
        });
    }

    if !exit_ok {
        return Err(Error::VerificationError(
            "gpg reported failure".to_string(),
        ));
    }

    Ok(())
}

/// Finds the signing key ID gpg reports next to "Signature made".
///
/// gpg 2.x prints it on the following line (`using RSA key 0x...`), gpg 1.x
/// on the same line (`using RSA key ID ...`).
fn extract_signer_keyid(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr.lines().collect();
    let idx = lines.iter().position(|l| l.contains("Signature made"))?;

    let candidate = if lines[idx].contains("using") {
        lines[idx]
    } else {
        lines.get(idx + 1)?
    };

    let last = candidate.split_whitespace().last()?;
    let normalized = last
        .strip_prefix("0x")
        .or_else(|| last.strip_prefix("0X"))
        .unwrap_or(last)
        .to_uppercase();

    if !normalized.is_empty() && normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(normalized)
    } else {
        None
    }
}

fn signer_matches(signer: &str, expected: &Fingerprint) -> bool {
    match signer.len() {
        40 => signer == expected.as_str(),
        16 => signer == expected.keyid().as_str(),
        _ => false,
    }
}

/// gpg escapes `:` in colon listings as `\x3a`.
fn unescape_colons(s: &str) -> String {
    s.replace("\\x3a", ":")
}

fn parse_timestamp(s: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    s.parse::<i64>()
        .ok()
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.date_naive())
}

#[derive(Default)]
struct KeyBuilder {
    fingerprint: Option<String>,
    uid: Option<String>,
    expires: Option<NaiveDate>,
    validity: KeyValidity,
}

impl KeyBuilder {
    fn from_pub_fields(fields: &[&str]) -> Self {
        Self {
            validity: fields
                .get(1)
                .and_then(|v| v.chars().next())
                .map(KeyValidity::from_gpg_char)
                .unwrap_or_default(),
            expires: fields.get(6).and_then(|s| parse_timestamp(s)),
            ..Self::default()
        }
    }

    fn push_into(self, keys: &mut Vec<Key>) {
        match self.fingerprint {
            Some(fingerprint) => keys.push(Key {
                fingerprint,
                uid: self.uid.unwrap_or_default(),
                expires: self.expires,
                validity: self.validity,
            }),
            None => debug!("skipping key without fingerprint record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHORITY: &str = "ABAF11C65A2970B130ABE3C479BE3E4300411886";

    fn authority() -> Fingerprint {
        AUTHORITY.parse().unwrap()
    }

    const SAMPLE_KEY_OUTPUT: &str = r#"tru::1:1568815794:0:3:1:5
pub:f:4096:1:4AA4767BBC9C4B1D:1409337986:1725177586::-:::scSC::::::23::0:
fpr:::::::::6645B0A8C7005E78DB1D7864F99FFE0FEAE999BD:
uid:f::::1409337986::2CAEDC6E92DD5AF0E9A7C7C44E08C3C7A9E26BE4::Keylist Authority <authority@example.org>::::::::::0:
sub:f:4096:1:B31FB30B04D73EB0:1409337986:1725177586:::::s::::::23:
fpr:::::::::BAE40BD8DC8BDAAA11DCFF68B31FB30B04D73EB0:
pub:u:4096:1:79BE3E4300411886:1568815794:::-:::scSC::::::23::0:
fpr:::::::::ABAF11C65A2970B130ABE3C479BE3E4300411886:
uid:u::::1568815794::F64689C4BF20D8BB2C66F7AD22DCE8C8C4B42E69::Jane Member <jane@example.org>::::::::::0:"#;

    #[test]
    fn test_parse_keys() {
        let keys = parse_keys(SAMPLE_KEY_OUTPUT);
        assert_eq!(keys.len(), 2);

        assert_eq!(
            keys[0].fingerprint,
            "6645B0A8C7005E78DB1D7864F99FFE0FEAE999BD"
        );
        assert_eq!(keys[0].uid, "Keylist Authority <authority@example.org>");
        assert_eq!(keys[0].validity, KeyValidity::Full);
        assert_eq!(
            keys[0].expires,
            chrono::NaiveDate::from_ymd_opt(2024, 9, 1)
        );

        assert_eq!(keys[1].fingerprint, AUTHORITY);
        assert_eq!(keys[1].validity, KeyValidity::Ultimate);
    }

    #[test]
    fn test_parse_escaped_uid() {
        let output = r#"pub:f:256:22:79BE3E4300411886:1600000000:::-:::scSC::::::23::0:
fpr:::::::::ABAF11C65A2970B130ABE3C479BE3E4300411886:
uid:f::::1600000000::HASH::Ops\x3a Security <sec@example.org>::::::::::0:"#;
        let keys = parse_keys(output);
        assert_eq!(keys[0].uid, "Ops: Security <sec@example.org>");
        assert_eq!(keys[0].expires, None);
    }

    #[test]
    fn test_parse_garbage_and_truncated() {
        assert!(parse_keys("").is_empty());
        assert!(parse_keys("this is not gpg output\nneither is this").is_empty());
        assert!(parse_keys("pub:f:4096").is_empty());

        let missing_fpr = "pub:f:4096:1:DEADBEEF12345678:1400000000:::-:::scSC::::::23::0:";
        assert!(parse_keys(missing_fpr).is_empty());
    }

    #[test]
    fn test_classify_recv() {
        let ks: Keyserver = "hkps://keys.example.org".parse().unwrap();
        let fp = authority();

        assert!(classify_recv("gpg: key 79BE3E4300411886: public key imported", &ks, &fp).is_ok());

        let err = classify_recv("gpg: keyserver receive failed: No keyserver available", &ks, &fp)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidKeyserver(_)));

        let err = classify_recv("gpg: keyserver receive failed: No data", &ks, &fp).unwrap_err();
        assert!(matches!(err, Error::NotFoundOnKeyserver(_)));

        let err = classify_recv("gpg: key \"ABAF\" not found on keyserver", &ks, &fp).unwrap_err();
        assert!(matches!(err, Error::NotFoundOnKeyserver(_)));
    }

    #[test]
    fn test_classify_listing_valid() {
        let key = classify_listing(SAMPLE_KEY_OUTPUT, "", &authority()).unwrap();
        assert_eq!(key.uid, "Jane Member <jane@example.org>");
    }

    #[test]
    fn test_classify_listing_missing() {
        let err = classify_listing(
            "",
            "gpg: error reading key: No public key",
            &authority(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFoundInKeyring(_)));

        // Listed output without the requested key fails closed.
        let other: Fingerprint = "6645B0A8C7005E78DB1D7864F99FFE0FEAE999BC".parse().unwrap();
        let err = classify_listing(SAMPLE_KEY_OUTPUT, "", &other).unwrap_err();
        assert!(matches!(err, Error::NotFoundInKeyring(_)));
    }

    #[test]
    fn test_classify_listing_revoked_and_expired() {
        let revoked = r#"pub:r:4096:1:79BE3E4300411886:1400000000:::-:::scSC::::::23::0:
fpr:::::::::ABAF11C65A2970B130ABE3C479BE3E4300411886:"#;
        let err = classify_listing(revoked, "", &authority()).unwrap_err();
        assert!(matches!(err, Error::RevokedKey(_)));

        let expired = r#"pub:e:4096:1:79BE3E4300411886:1400000000:1500000000::-:::scSC::::::23::0:
fpr:::::::::ABAF11C65A2970B130ABE3C479BE3E4300411886:"#;
        let err = classify_listing(expired, "", &authority()).unwrap_err();
        assert!(matches!(err, Error::ExpiredKey(_)));
    }

    const GOOD_GPG2: &str = "gpg: Signature made Tue 08 Oct 2024 10:00:00 AM UTC
gpg:                using RSA key 0x79BE3E4300411886
gpg: Good signature from \"Keylist Authority <authority@example.org>\" [unknown]";

    #[test]
    fn test_verify_good_signature() {
        assert!(classify_verify(GOOD_GPG2, true, &authority()).is_ok());
    }

    #[test]
    fn test_verify_good_signature_full_fingerprint() {
        let stderr = format!(
            "gpg: Signature made Tue 08 Oct 2024 10:00:00 AM UTC\n\
             gpg:                using EDDSA key {AUTHORITY}\n\
             gpg: Good signature from \"Keylist Authority\" [full]"
        );
        assert!(classify_verify(&stderr, true, &authority()).is_ok());
    }

    #[test]
    fn test_verify_good_signature_gpg1_format() {
        let stderr = "gpg: Signature made Tue Oct  8 10:00:00 2024 UTC using RSA key ID 0x79be3e4300411886
gpg: Good signature from \"Keylist Authority <authority@example.org>\"";
        assert!(classify_verify(stderr, true, &authority()).is_ok());
    }

    #[test]
    fn test_verify_bad_signature() {
        let stderr = "gpg: Signature made Tue 08 Oct 2024 10:00:00 AM UTC
gpg:                using RSA key 0x79BE3E4300411886
gpg: BAD signature from \"Keylist Authority <authority@example.org>\" [unknown]";
        assert!(matches!(
            classify_verify(stderr, false, &authority()),
            Err(Error::BadSignature)
        ));
    }

    #[test]
    fn test_verify_bad_signature_wins_over_wrong_key() {
        let stderr = "gpg: Signature made Tue 08 Oct 2024 10:00:00 AM UTC
gpg:                using RSA key 0x1111222233334444
gpg: BAD signature from \"Somebody Else\" [unknown]
gpg: Good signature from \"Somebody Else\" [unknown]";
        assert!(matches!(
            classify_verify(stderr, false, &authority()),
            Err(Error::BadSignature)
        ));
    }

    #[test]
    fn test_verify_no_public_key() {
        let stderr = "gpg: Signature made Tue 08 Oct 2024 10:00:00 AM UTC
gpg:                using RSA key 0x79BE3E4300411886
gpg: Can't check signature: No public key";
        assert!(matches!(
            classify_verify(stderr, false, &authority()),
            Err(Error::VerificationError(_))
        ));
    }

    #[test]
    fn test_verify_no_data() {
        let err = classify_verify("gpg: no valid OpenPGP data found.", false, &authority());
        assert!(matches!(err, Err(Error::VerificationError(_))));

        let err = classify_verify("gpg: the signature could not be verified.", false, &authority());
        assert!(matches!(err, Err(Error::VerificationError(_))));
    }

    #[test]
    fn test_verify_empty_output_fails_closed() {
        assert!(matches!(
            classify_verify("", true, &authority()),
            Err(Error::VerificationError(_))
        ));
    }

    #[test]
    fn test_verify_revoked_signer() {
        let stderr = format!(
            "{GOOD_GPG2}\ngpg: WARNING: This key has been revoked by its owner!"
        );
        assert!(matches!(
            classify_verify(&stderr, true, &authority()),
            Err(Error::RevokedKey(_))
        ));
    }

    #[test]
    fn test_verify_wrong_key() {
        let stderr = "gpg: Signature made Tue 08 Oct 2024 10:00:00 AM UTC
gpg:                using RSA key 0x1111222233334444
gpg: Good signature from \"Somebody Else\" [unknown]";
        match classify_verify(stderr, true, &authority()) {
            Err(Error::SignedWithWrongKey { expected, actual }) => {
                assert_eq!(expected, AUTHORITY);
                assert_eq!(actual, "1111222233334444");
            }
            other => panic!("expected SignedWithWrongKey, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_unattributable_signer_fails_closed() {
        let stderr = "gpg: Signature made Tue 08 Oct 2024 10:00:00 AM UTC
gpg: Good signature from \"Keylist Authority\" [unknown]";
        assert!(matches!(
            classify_verify(stderr, true, &authority()),
            Err(Error::VerificationError(_))
        ));
    }

    #[test]
    fn test_verify_failed_exit_status() {
        assert!(matches!(
            classify_verify(GOOD_GPG2, false, &authority()),
            Err(Error::VerificationError(_))
        ));
    }

    #[test]
    fn test_parse_timestamp() {
        use chrono::Datelike;
        assert!(parse_timestamp("not_a_number").is_none());
        assert!(parse_timestamp("").is_none());

        let d = parse_timestamp("1609459200").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2021, 1, 1));
    }
}
