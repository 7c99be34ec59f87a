use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported reading sources.
///
/// Each source is synced through its own adapter and, for the web services,
/// its own rate limiter and credential.
///
/// # Examples
///
/// ```
/// use core_auth::SourceKind;
///
/// let source = SourceKind::WeRead;
/// assert_eq!(source.as_str(), "weRead");
/// assert!(source.requires_auth());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    /// Local e-reader annotation database
    #[serde(rename = "appleBooks")]
    AppleBooks,
    /// Local bookmarking app database
    #[serde(rename = "goodLinks")]
    GoodLinks,
    /// Authenticated web reading service (cookie session)
    #[serde(rename = "weRead")]
    WeRead,
    /// Authenticated web reading service (cookie session)
    #[serde(rename = "dedao")]
    Dedao,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::AppleBooks,
        SourceKind::GoodLinks,
        SourceKind::WeRead,
        SourceKind::Dedao,
    ];

    /// Stable key used in job keys, storage keys and settings.
    ///
    /// ```
    /// use core_auth::SourceKind;
    ///
    /// assert_eq!(SourceKind::GoodLinks.as_str(), "goodLinks");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::AppleBooks => "appleBooks",
            SourceKind::GoodLinks => "goodLinks",
            SourceKind::WeRead => "weRead",
            SourceKind::Dedao => "dedao",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::AppleBooks => "Apple Books",
            SourceKind::GoodLinks => "GoodLinks",
            SourceKind::WeRead => "WeRead",
            SourceKind::Dedao => "Dedao",
        }
    }

    /// Parse a source key, case-insensitively.
    ///
    /// ```
    /// use core_auth::SourceKind;
    ///
    /// assert_eq!(SourceKind::parse("weread"), Some(SourceKind::WeRead));
    /// assert_eq!(SourceKind::parse("kindle"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "applebooks" | "apple_books" => Some(SourceKind::AppleBooks),
            "goodlinks" | "good_links" => Some(SourceKind::GoodLinks),
            "weread" | "we_read" => Some(SourceKind::WeRead),
            "dedao" => Some(SourceKind::Dedao),
            _ => None,
        }
    }

    /// Whether the source is a web service that needs a session credential.
    pub fn requires_auth(&self) -> bool {
        self.is_remote()
    }

    /// Whether reads go over the network. Local database sources are not
    /// request-paced.
    pub fn is_remote(&self) -> bool {
        matches!(self, SourceKind::WeRead | SourceKind::Dedao)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session credential for an authenticated source (cookie header or token).
///
/// # Security
///
/// The secret is never logged; the `Debug` implementation redacts it.
///
/// ```
/// use core_auth::Credential;
///
/// let credential = Credential::new("wr_skey=abc; wr_vid=1");
/// assert!(!format!("{:?}", credential).contains("wr_skey"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
    obtained_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            obtained_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn from_parts(
        secret: String,
        obtained_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            secret,
            obtained_at,
            expires_at,
        }
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Credentials without a known expiry are treated as valid until the
    /// remote side rejects them.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"[REDACTED]")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_source_kind_roundtrip() {
        for source in SourceKind::ALL {
            assert_eq!(SourceKind::parse(source.as_str()), Some(source));
        }
    }

    #[test]
    fn test_source_kind_serde_uses_keys() {
        let json = serde_json::to_string(&SourceKind::AppleBooks).unwrap();
        assert_eq!(json, "\"appleBooks\"");
        let parsed: SourceKind = serde_json::from_str("\"dedao\"").unwrap();
        assert_eq!(parsed, SourceKind::Dedao);
    }

    #[test]
    fn test_only_web_sources_require_auth() {
        assert!(!SourceKind::AppleBooks.requires_auth());
        assert!(!SourceKind::GoodLinks.requires_auth());
        assert!(SourceKind::WeRead.requires_auth());
        assert!(SourceKind::Dedao.requires_auth());
    }

    #[test]
    fn test_credential_expiry() {
        let now = Utc::now();
        let open_ended = Credential::new("cookie");
        assert!(!open_ended.is_expired_at(now + Duration::days(365)));

        let bounded = Credential::new("cookie").with_expires_at(now + Duration::hours(1));
        assert!(!bounded.is_expired_at(now));
        assert!(bounded.is_expired_at(now + Duration::hours(2)));
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let credential = Credential::new("token=super-secret");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret"));
    }
}
