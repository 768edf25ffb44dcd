//! CloudAPI request signing
//!
//! CloudAPI authenticates every request with an HTTP Signature over the
//! `date` header, made with the account's SSH key (RSA-SHA256).
//!
//! Keys are found through their public half: the profile's key id is a
//! `SHA256:` or MD5 fingerprint, and the `*.pub` file in `~/.ssh` with that
//! fingerprint names the private key. Private keys may be in OpenSSH format
//! (the `ssh-keygen` default) or PEM (PKCS#1/PKCS#8).

use crate::config::{KEY_PATH_VAR, Profile};
use crate::error::{InventoryError, Result};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha256;
use ssh_key::{HashAlg, PrivateKey, PublicKey};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key file tried when nothing better matches
const DEFAULT_KEY_FILE: &str = "id_rsa";

/// Signs CloudAPI requests for one profile
pub struct RequestSigner {
    key_id: String,
    key: SigningKey<Sha256>,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// Create a signer from an already loaded key
    pub fn new(profile: &Profile, key: RsaPrivateKey) -> Self {
        Self {
            key_id: key_id_path(profile),
            key: SigningKey::<Sha256>::new(key),
        }
    }

    /// Locate and load the profile's private key
    pub fn load(profile: &Profile, ssh_dir: &Path) -> Result<Self> {
        let explicit = std::env::var_os(KEY_PATH_VAR).map(PathBuf::from);
        let path = resolve_key_path(&profile.key_id, ssh_dir, explicit)?;
        debug!(profile = %profile.name, key = %path.display(), "Loading signing key");

        let text = std::fs::read_to_string(&path)?;
        let key = parse_private_key(&text)
            .map_err(|e| InventoryError::auth(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(profile, key))
    }

    /// `Authorization` header value for a request carrying `date`
    pub fn authorization(&self, date: &str) -> Result<String> {
        let signature = self
            .key
            .try_sign(signing_string(date).as_bytes())
            .map_err(|e| InventoryError::auth(e.to_string()))?;
        Ok(authorization_header(
            &self.key_id,
            &BASE64_STANDARD.encode(signature.to_bytes()),
        ))
    }
}

/// `/<account>/keys/<id>`, or `/<account>/users/<user>/keys/<id>` for sub-users
pub fn key_id_path(profile: &Profile) -> String {
    match &profile.user {
        Some(user) => format!("/{}/users/{}/keys/{}", profile.account, user, profile.key_id),
        None => format!("/{}/keys/{}", profile.account, profile.key_id),
    }
}

/// The string that gets signed
pub fn signing_string(date: &str) -> String {
    format!("date: {}", date)
}

/// Format the `Authorization` header
pub fn authorization_header(key_id: &str, signature_b64: &str) -> String {
    format!(
        "Signature keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"date\",signature=\"{}\"",
        key_id, signature_b64
    )
}

/// RFC 1123 date as used in the `date` header
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `SHA256:` fingerprint of an OpenSSH public key line
pub fn sha256_fingerprint(public_key_line: &str) -> Option<String> {
    let key = PublicKey::from_openssh(public_key_line.trim()).ok()?;
    Some(key.fingerprint(HashAlg::Sha256).to_string())
}

/// MD5 fingerprint (`aa:bb:..`) of an OpenSSH public key line
pub fn md5_fingerprint(public_key_line: &str) -> Option<String> {
    let blob = public_key_line.split_whitespace().nth(1)?;
    let bytes = BASE64_STANDARD.decode(blob).ok()?;
    let hex: Vec<String> = Md5::digest(&bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    Some(hex.join(":"))
}

/// Whether a public key line has the fingerprint `key_id`
///
/// `key_id` is either `SHA256:<base64>` or an MD5 fingerprint, with or
/// without the `MD5:` prefix.
pub fn fingerprint_matches(key_id: &str, public_key_line: &str) -> bool {
    if key_id.starts_with("SHA256:") {
        return sha256_fingerprint(public_key_line).as_deref() == Some(key_id);
    }
    let wanted = key_id.strip_prefix("MD5:").unwrap_or(key_id);
    md5_fingerprint(public_key_line).is_some_and(|fp| fp.eq_ignore_ascii_case(wanted))
}

/// Pick the private key file for a key id
///
/// An explicit path wins. Otherwise the `*.pub` file in `ssh_dir` whose
/// fingerprint equals `key_id` selects its private half, and `id_rsa` is
/// the last resort.
pub fn resolve_key_path(key_id: &str, ssh_dir: &Path, explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    if let Ok(entries) = std::fs::read_dir(ssh_dir) {
        let mut pubs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "pub"))
            .collect();
        pubs.sort();

        for pub_path in pubs {
            let Ok(line) = std::fs::read_to_string(&pub_path) else {
                continue;
            };
            if fingerprint_matches(key_id, &line) {
                let private = pub_path.with_extension("");
                if private.is_file() {
                    return Ok(private);
                }
            }
        }
    }

    let fallback = ssh_dir.join(DEFAULT_KEY_FILE);
    if fallback.is_file() {
        debug!(key_id = %key_id, "No public key matches, trying {}", DEFAULT_KEY_FILE);
        Ok(fallback)
    } else {
        Err(InventoryError::auth(format!(
            "no private key found for {} in {}",
            key_id,
            ssh_dir.display()
        )))
    }
}

/// Parse an unencrypted RSA private key, OpenSSH format first, then PEM
fn parse_private_key(text: &str) -> std::result::Result<RsaPrivateKey, String> {
    if let Ok(key) = PrivateKey::from_openssh(text) {
        if key.is_encrypted() {
            return Err("passphrase-protected keys are not supported".to_string());
        }
        let rsa = key
            .key_data()
            .rsa()
            .ok_or_else(|| format!("{} key, RSA required", key.algorithm()))?;
        return RsaPrivateKey::try_from(rsa).map_err(|e| e.to_string());
    }

    RsaPrivateKey::from_pkcs1_pem(text)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(text))
        .map_err(|e| format!("unsupported private key (OpenSSH or PEM RSA required): {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rsa::RsaPublicKey;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    const OPENSSH_KEY: &str = include_str!("../testdata/id_rsa_openssh");
    const OPENSSH_PUB: &str = include_str!("../testdata/id_rsa_openssh.pub");
    const OPENSSH_SHA256: &str = "SHA256:Gfr2TyIbV/JBb1bg6niv7l/v/uuMdFUNlKkcmXQMKdQ";
    const OPENSSH_MD5: &str = "f4:92:b2:bb:f5:0c:ce:e9:fc:48:a4:a4:3d:fc:fb:fe";
    const PEM_KEY: &str = include_str!("../testdata/id_rsa_pem");
    const PEM_PUB: &str = include_str!("../testdata/id_rsa_pem.pub");
    const ED25519_KEY: &str = include_str!("../testdata/id_ed25519");

    #[test]
    fn test_key_id_path() {
        let mut profile = Profile::new("prod", "https://u", "ops", "SHA256:abc");
        assert_eq!(key_id_path(&profile), "/ops/keys/SHA256:abc");

        profile.user = Some("deploy".into());
        assert_eq!(key_id_path(&profile), "/ops/users/deploy/keys/SHA256:abc");
    }

    #[test]
    fn test_authorization_header_format() {
        let header = authorization_header("/ops/keys/SHA256:abc", "c2ln");
        assert_eq!(
            header,
            "Signature keyId=\"/ops/keys/SHA256:abc\",algorithm=\"rsa-sha256\",\
             headers=\"date\",signature=\"c2ln\""
        );
        assert_eq!(
            signing_string("Tue, 01 Jun 2021 10:00:00 GMT"),
            "date: Tue, 01 Jun 2021 10:00:00 GMT"
        );
    }

    #[test]
    fn test_http_date() {
        let t = Utc.with_ymd_and_hms(2021, 6, 1, 10, 0, 0).unwrap();
        assert_eq!(http_date(t), "Tue, 01 Jun 2021 10:00:00 GMT");
    }

    #[test]
    fn test_fingerprints() {
        assert_eq!(sha256_fingerprint(OPENSSH_PUB).as_deref(), Some(OPENSSH_SHA256));
        assert_eq!(md5_fingerprint(OPENSSH_PUB).as_deref(), Some(OPENSSH_MD5));
        assert_eq!(sha256_fingerprint("garbage"), None);

        assert!(fingerprint_matches(OPENSSH_SHA256, OPENSSH_PUB));
        assert!(fingerprint_matches(OPENSSH_MD5, OPENSSH_PUB));
        assert!(fingerprint_matches(&format!("MD5:{}", OPENSSH_MD5.to_uppercase()), OPENSSH_PUB));
        assert!(!fingerprint_matches(OPENSSH_SHA256, PEM_PUB));
        assert!(!fingerprint_matches(OPENSSH_MD5, PEM_PUB));
    }

    #[test]
    fn test_resolve_key_path() {
        let ssh = tempfile::tempdir().unwrap();
        std::fs::write(ssh.path().join("work.pub"), OPENSSH_PUB).unwrap();
        std::fs::write(ssh.path().join("work"), OPENSSH_KEY).unwrap();
        std::fs::write(ssh.path().join("ci.pub"), PEM_PUB).unwrap();
        std::fs::write(ssh.path().join("ci"), PEM_KEY).unwrap();

        assert_eq!(
            resolve_key_path(OPENSSH_SHA256, ssh.path(), None).unwrap(),
            ssh.path().join("work")
        );
        assert_eq!(
            resolve_key_path(OPENSSH_MD5, ssh.path(), None).unwrap(),
            ssh.path().join("work")
        );
        let ci = sha256_fingerprint(PEM_PUB).unwrap();
        assert_eq!(resolve_key_path(&ci, ssh.path(), None).unwrap(), ssh.path().join("ci"));

        // No match and no id_rsa
        assert!(resolve_key_path("SHA256:other", ssh.path(), None).is_err());

        std::fs::write(ssh.path().join("id_rsa"), "private").unwrap();
        assert_eq!(
            resolve_key_path("aa:bb:cc", ssh.path(), None).unwrap(),
            ssh.path().join("id_rsa")
        );

        let explicit = PathBuf::from("/keys/ci");
        assert_eq!(
            resolve_key_path(OPENSSH_SHA256, ssh.path(), Some(explicit.clone())).unwrap(),
            explicit
        );
    }

    #[test]
    fn test_parse_openssh_and_pem_keys() {
        tokio_test::assert_ok!(parse_private_key(OPENSSH_KEY));
        tokio_test::assert_ok!(parse_private_key(PEM_KEY));

        let err = parse_private_key(ED25519_KEY).unwrap_err();
        assert!(err.contains("RSA required"), "{}", err);
        assert!(parse_private_key("not a key").is_err());
    }

    #[test]
    fn test_load_openssh_key_and_sign() {
        let ssh = tempfile::tempdir().unwrap();
        std::fs::write(ssh.path().join("work.pub"), OPENSSH_PUB).unwrap();
        std::fs::write(ssh.path().join("work"), OPENSSH_KEY).unwrap();

        let profile = Profile::new("prod", "https://u", "ops", OPENSSH_MD5);
        let signer = RequestSigner::load(&profile, ssh.path()).unwrap();

        let date = "Tue, 01 Jun 2021 10:00:00 GMT";
        let header = signer.authorization(date).unwrap();
        let prefix = format!(
            "Signature keyId=\"/ops/keys/{}\",algorithm=\"rsa-sha256\",headers=\"date\",signature=\"",
            OPENSSH_MD5
        );
        assert!(header.starts_with(&prefix), "{}", header);

        let b64 = header[prefix.len()..].trim_end_matches('"');
        let signature = Signature::try_from(BASE64_STANDARD.decode(b64).unwrap().as_slice()).unwrap();
        let public = RsaPublicKey::from(&parse_private_key(OPENSSH_KEY).unwrap());
        let verifier = VerifyingKey::<Sha256>::new(public);
        tokio_test::assert_ok!(verifier.verify(signing_string(date).as_bytes(), &signature));
    }
}
