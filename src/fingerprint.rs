use std::fmt;

use url::Url;

use crate::error::{Error, Result};

const FINGERPRINT_LEN: usize = 40;
const KEYID_LEN: usize = 16;
const DEFAULT_KEYSERVER_SCHEME: &str = "hkps";
const KEYSERVER_SCHEMES: &[&str] = &["hkps", "hkp", "https", "http", "ldap", "ldaps"];

/// A full 40 hex digit OpenPGP v4 fingerprint, uppercase and without separators.
///
/// The only way to obtain one is through [`normalize_fingerprint`] (or
/// [`str::parse`]), so holding a `Fingerprint` means the value is safe to pass
/// to gpg.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 16 hex digit long key ID (the fingerprint's low 64 bits).
    pub fn keyid(&self) -> KeyId {
        fingerprint_to_keyid(self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        normalize_fingerprint(s)
    }
}

/// A 16 hex digit long key ID, uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyId(String);

impl KeyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A keyserver URI with an explicit scheme and no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyserver(String);

impl Keyserver {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Keyserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Keyserver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        normalize_keyserver(s)
    }
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c.is_ascii_punctuation()
}

fn strip_separators(s: &str) -> String {
    s.chars().filter(|c| !is_separator(*c)).collect()
}

/// Returns true if `s`, once whitespace and punctuation separators are
/// removed, is exactly 40 hexadecimal characters.
pub fn validate_fingerprint(s: &str) -> bool {
    let stripped = strip_separators(s);
    stripped.len() == FINGERPRINT_LEN && stripped.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validates a fingerprint before passing it to a subprocess.
///
/// Accepted formats:
/// - 40 hex characters, any case
/// - The same grouped by whitespace or punctuation, e.g.
///   `ABAF 11C6 5A29 70B1 30AB  E3C4 79BE 3E43 0041 1886`
///
/// Short and long key IDs are rejected, as is a `0x` prefix.
pub fn normalize_fingerprint(s: &str) -> Result<Fingerprint> {
    let stripped = strip_separators(s);

    if stripped.is_empty() {
        return Err(Error::InvalidFingerprint {
            fingerprint: s.to_string(),
            reason: "fingerprint cannot be empty".to_string(),
        });
    }

    if !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidFingerprint {
            fingerprint: s.to_string(),
            reason: "fingerprint must contain only hexadecimal characters".to_string(),
        });
    }

    if stripped.len() != FINGERPRINT_LEN {
        return Err(Error::InvalidFingerprint {
            fingerprint: s.to_string(),
            reason: format!(
                "fingerprint must be {} hex characters (got {})",
                FINGERPRINT_LEN,
                stripped.len()
            ),
        });
    }

    Ok(Fingerprint(stripped.to_uppercase()))
}

pub fn fingerprint_to_keyid(fp: &Fingerprint) -> KeyId {
    KeyId(fp.0[FINGERPRINT_LEN - KEYID_LEN..].to_string())
}

/// Normalizes a keyserver URI.
///
/// A missing scheme defaults to `hkps://` and trailing slashes are removed.
/// Only the syntax is checked; whether the server answers is discovered
/// when it is used.
pub fn normalize_keyserver(uri: &str) -> Result<Keyserver> {
    let trimmed = uri.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(Error::InvalidKeyserver(uri.to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{DEFAULT_KEYSERVER_SCHEME}://{trimmed}")
    };
    let normalized = with_scheme.trim_end_matches('/').to_string();

    let parsed = Url::parse(&normalized).map_err(|_| Error::InvalidKeyserver(uri.to_string()))?;
    if !KEYSERVER_SCHEMES.contains(&parsed.scheme()) {
        return Err(Error::InvalidKeyserver(uri.to_string()));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(Error::InvalidKeyserver(uri.to_string())),
    }

    Ok(Keyserver(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: &str = "ABAF11C65A2970B130ABE3C479BE3E4300411886";

    #[test]
    fn test_valid_fingerprint() {
        assert!(validate_fingerprint(FP));
        assert_eq!(normalize_fingerprint(FP).unwrap().as_str(), FP);
    }

    #[test]
    fn test_fingerprint_lowercase_normalized() {
        let fp = normalize_fingerprint(&FP.to_lowercase()).unwrap();
        assert_eq!(fp.as_str(), FP);
    }

    #[test]
    fn test_fingerprint_with_separators() {
        let grouped = "ABAF 11C6 5A29 70B1 30AB  E3C4 79BE 3E43 0041 1886";
        assert!(validate_fingerprint(grouped));
        assert_eq!(normalize_fingerprint(grouped).unwrap().as_str(), FP);

        let colons = "ab:af:11:c6:5a:29:70:b1:30:ab:e3:c4:79:be:3e:43:00:41:18:86";
        assert_eq!(normalize_fingerprint(colons).unwrap().as_str(), FP);

        let padded = format!("\t{FP}\n");
        assert_eq!(normalize_fingerprint(&padded).unwrap().as_str(), FP);
    }

    #[test]
    fn test_normalize_idempotent() {
        for input in [
            FP.to_string(),
            FP.to_lowercase(),
            "abaf 11C6 5a29 70B1 30ab E3C4 79be 3E43 0041 1886".to_string(),
        ] {
            let once = normalize_fingerprint(&input).unwrap();
            let twice = normalize_fingerprint(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_invalid_empty() {
        assert!(!validate_fingerprint(""));
        let err = normalize_fingerprint("").unwrap_err();
        assert!(matches!(err, Error::InvalidFingerprint { .. }));

        let err = normalize_fingerprint(" : ").unwrap_err();
        assert!(matches!(err, Error::InvalidFingerprint { .. }));
    }

    #[test]
    fn test_invalid_wrong_length() {
        let too_long = format!("{FP}0");
        for input in ["DEADBEEF", "786C63F330D7CB92", &FP[..39], too_long.as_str()] {
            assert!(!validate_fingerprint(input), "{input}");
            let err = normalize_fingerprint(input).unwrap_err();
            assert!(matches!(err, Error::InvalidFingerprint { .. }));
        }
    }

    #[test]
    fn test_invalid_non_hex() {
        let bad = format!("{}G", &FP[..39]);
        assert!(!validate_fingerprint(&bad));
        let err = normalize_fingerprint(&bad).unwrap_err();
        assert!(matches!(err, Error::InvalidFingerprint { .. }));

        let prefixed = format!("0x{FP}");
        assert!(!validate_fingerprint(&prefixed));
        assert!(normalize_fingerprint(&prefixed).is_err());
    }

    #[test]
    fn test_command_injection_rejected() {
        for input in ["$(whoami)", "`id`", "ABAF;rm -rf /", "--delete-keys"] {
            assert!(normalize_fingerprint(input).is_err(), "{input}");
        }
    }

    #[test]
    fn test_fingerprint_to_keyid() {
        let fp = normalize_fingerprint(FP).unwrap();
        assert_eq!(fingerprint_to_keyid(&fp).as_str(), "79BE3E4300411886");
        assert_eq!(fp.keyid(), fingerprint_to_keyid(&fp));
    }

    #[test]
    fn test_keyserver_default_scheme() {
        let ks = normalize_keyserver("keys.openpgp.org").unwrap();
        assert_eq!(ks.as_str(), "hkps://keys.openpgp.org");
    }

    #[test]
    fn test_keyserver_trailing_slash() {
        let ks = normalize_keyserver("hkps://keyserver.ubuntu.com/").unwrap();
        assert_eq!(ks.as_str(), "hkps://keyserver.ubuntu.com");

        let ks = normalize_keyserver("https://keys.example.org:8443//").unwrap();
        assert_eq!(ks.as_str(), "https://keys.example.org:8443");
    }

    #[test]
    fn test_keyserver_keeps_explicit_scheme() {
        let ks = normalize_keyserver("hkp://pool.sks-keyservers.net").unwrap();
        assert_eq!(ks.as_str(), "hkp://pool.sks-keyservers.net");
    }

    #[test]
    fn test_keyserver_invalid() {
        for input in ["", "   ", "hkps://", "ftp://keys.example.org", "keys example org"] {
            let err = normalize_keyserver(input).unwrap_err();
            assert!(matches!(err, Error::InvalidKeyserver(_)), "{input}");
        }
    }
}
