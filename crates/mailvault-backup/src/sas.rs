//! Service shared-access signatures for Blob storage.
//!
//! # Design
//! - Tokens are minted per request or per run and never cached.
//! - The string-to-sign follows the service SAS layout used from version
//!   2018-11-09 until encryption scopes were added; protocol and IP
//!   restrictions are left empty so emulators on plain HTTP keep working.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::error::StorageError;

/// Service version named in every token and request.
pub const SAS_VERSION: &str = "2020-10-02";

/// What a token grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SasScope<'a> {
    /// The whole container (listing).
    Container,
    /// One blob.
    Blob(&'a str),
}

/// Parameters for one token.
#[derive(Debug, Clone, Copy)]
pub struct SasGrant<'a> {
    /// Target container.
    pub container: &'a str,
    /// Container or blob scope.
    pub scope: SasScope<'a>,
    /// Permission letters in canonical order (e.g. `cw`, `l`, `d`).
    pub permissions: &'a str,
    /// Start of validity.
    pub start: DateTime<Utc>,
    /// End of validity.
    pub expiry: DateTime<Utc>,
}

/// Signed query parameters ready to append to a request URL.
#[derive(Clone, PartialEq, Eq)]
pub struct SasToken {
    pairs: Vec<(&'static str, String)>,
    expires_at: DateTime<Utc>,
}

impl SasToken {
    /// Append the token to `url`'s query string.
    pub fn apply(&self, url: &mut Url) {
        let mut query = url.query_pairs_mut();
        for (key, value) in &self.pairs {
            query.append_pair(key, value);
        }
    }

    /// Expiry of the grant.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for SasToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SasToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Signs tokens with a storage account key.
#[derive(Clone)]
pub struct SasSigner {
    account: String,
    key: Vec<u8>,
}

impl fmt::Debug for SasSigner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SasSigner")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

fn sas_time(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

impl SasSigner {
    /// Create a signer from the account name and its base64 key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] when the key is not base64.
    pub fn new(account: impl Into<String>, base64_key: &str) -> Result<Self, StorageError> {
        let key = STANDARD
            .decode(base64_key.trim())
            .map_err(|source| StorageError::InvalidKey { source })?;
        Ok(Self {
            account: account.into(),
            key,
        })
    }

    /// Account the signer belongs to.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    pub(crate) fn string_to_sign(&self, grant: &SasGrant<'_>) -> String {
        let (resource, kind) = match grant.scope {
            SasScope::Container => (format!("/blob/{}/{}", self.account, grant.container), "c"),
            SasScope::Blob(name) => (
                format!("/blob/{}/{}/{}", self.account, grant.container, name),
                "b",
            ),
        };
        [
            grant.permissions,
            sas_time(grant.start).as_str(),
            sas_time(grant.expiry).as_str(),
            resource.as_str(),
            "",
            "",
            "",
            SAS_VERSION,
            kind,
            "",
            "",
            "",
            "",
            "",
            "",
        ]
        .join("\n")
    }

    /// Sign `grant`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Signing`] if the MAC cannot be initialised.
    pub fn sign(&self, grant: &SasGrant<'_>) -> Result<SasToken, StorageError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).map_err(|_| {
            StorageError::Signing {
                operation: "sas.sign",
            }
        })?;
        mac.update(self.string_to_sign(grant).as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        let resource = match grant.scope {
            SasScope::Container => "c",
            SasScope::Blob(_) => "b",
        };
        Ok(SasToken {
            pairs: vec![
                ("sv", SAS_VERSION.to_string()),
                ("st", sas_time(grant.start)),
                ("se", sas_time(grant.expiry)),
                ("sr", resource.to_string()),
                ("sp", grant.permissions.to_string()),
                ("sig", signature),
            ],
            expires_at: grant.expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn grant(scope: SasScope<'_>) -> SasGrant<'_> {
        SasGrant {
            container: "mail-backup",
            scope,
            permissions: "cw",
            start: Utc
                .with_ymd_and_hms(2024, 3, 9, 5, 25, 0)
                .single()
                .expect("valid"),
            expiry: Utc
                .with_ymd_and_hms(2024, 3, 9, 7, 30, 0)
                .single()
                .expect("valid"),
        }
    }

    #[test]
    fn rejects_non_base64_keys() {
        assert!(matches!(
            SasSigner::new("acct", "not base64!"),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn string_to_sign_has_service_layout() -> Result<(), StorageError> {
        let signer = SasSigner::new("acct", "c2VjcmV0")?;
        let text = signer.string_to_sign(&grant(SasScope::Blob("2024-03-09/a.tar")));
        let lines: Vec<_> = text.split('\n').collect();
        assert_eq!(lines.len(), 15);
        assert_eq!(lines[0], "cw");
        assert_eq!(lines[1], "2024-03-09T05:25:00Z");
        assert_eq!(lines[2], "2024-03-09T07:30:00Z");
        assert_eq!(lines[3], "/blob/acct/mail-backup/2024-03-09/a.tar");
        assert_eq!(lines[7], SAS_VERSION);
        assert_eq!(lines[8], "b");

        let container = signer.string_to_sign(&grant(SasScope::Container));
        assert!(container.contains("\n/blob/acct/mail-backup\n"));
        Ok(())
    }

    #[test]
    fn signature_matches_independent_hmac() -> Result<(), Box<dyn std::error::Error>> {
        let signer = SasSigner::new("acct", "c2VjcmV0")?;
        let grant = grant(SasScope::Blob("2024-03-09/a.tar"));
        let token = signer.sign(&grant)?;

        let mut mac = Hmac::<Sha256>::new_from_slice(b"secret").map_err(|_| "hmac key")?;
        mac.update(signer.string_to_sign(&grant).as_bytes());
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        let mut url = Url::parse("https://acct.blob.core.windows.net/mail-backup/a.tar")?;
        token.apply(&mut url);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("sig".to_string(), expected)));
        assert!(pairs.contains(&("sp".to_string(), "cw".to_string())));
        assert!(pairs.contains(&("sr".to_string(), "b".to_string())));
        assert_eq!(token.expires_at(), grant.expiry);
        assert!(!format!("{token:?}").contains("sig"));
        Ok(())
    }
}
