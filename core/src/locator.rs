//! Shareable references to a secret: `origin/id#key`.
//!
//! The id is the only part a client ever sends to the server. The key rides in
//! the URL fragment, which HTTP clients strip before issuing a request.

use std::fmt;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("could not find the secret id in the secret link")]
    MissingId,

    #[error("invalid share origin: {0}")]
    InvalidOrigin(String),
}

/// A complete locator, as produced by the creation flow.
#[derive(Clone, PartialEq, Eq)]
pub struct Locator {
    origin: String,
    id: String,
    key: String,
}

impl Locator {
    /// Build a locator under `origin`. A trailing slash on the origin is ignored.
    pub fn new(
        origin: &str,
        id: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, LocatorError> {
        let parsed =
            Url::parse(origin).map_err(|e| LocatorError::InvalidOrigin(e.to_string()))?;
        let has_suffix = parsed.query().is_some() || parsed.fragment().is_some();
        if parsed.cannot_be_a_base() || has_suffix {
            return Err(LocatorError::InvalidOrigin(origin.to_string()));
        }

        Ok(Self {
            origin: origin.trim_end_matches('/').to_string(),
            id: id.into(),
            key: key.into(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The retrieval-side view of this locator.
    #[must_use]
    pub fn to_partial(&self) -> PartialLocator {
        PartialLocator {
            id: self.id.clone(),
            key: Some(self.key.clone()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.origin, self.id, self.key)
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locator")
            .field("origin", &self.origin)
            .field("id", &self.id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// What a reader holds: an id, and a key if the fragment survived.
#[derive(Clone, PartialEq, Eq)]
pub struct PartialLocator {
    pub id: String,
    pub key: Option<String>,
}

impl PartialLocator {
    /// Parse a full link, a link without fragment, or a bare id (`id` or `id#key`).
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let input = input.trim();

        if let Some(url) = Url::parse(input).ok().filter(|u| !u.cannot_be_a_base()) {
            let id = url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .ok_or(LocatorError::MissingId)?;

            return Ok(Self {
                id: id.to_string(),
                key: url.fragment().and_then(non_empty),
            });
        }

        let (path, fragment) = match input.split_once('#') {
            Some((path, fragment)) => (path, non_empty(fragment)),
            None => (input, None),
        };

        let id = path
            .split('/')
            .filter(|s| !s.is_empty())
            .last()
            .ok_or(LocatorError::MissingId)?;

        Ok(Self {
            id: id.to_string(),
            key: fragment,
        })
    }
}

impl fmt::Debug for PartialLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialLocator")
            .field("id", &self.id)
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_origin_id_and_fragment() {
        let locator = Locator::new("https://ember.example/", "01ABC", "K3y").unwrap();
        assert_eq!(locator.to_string(), "https://ember.example/01ABC#K3y");
    }

    #[test]
    fn origin_rejects_garbage() {
        assert!(Locator::new("not a url", "id", "key").is_err());
        assert!(Locator::new("https://h/#frag", "id", "key").is_err());
    }

    #[test]
    fn origin_with_query_is_rejected() {
        assert!(matches!(
            Locator::new("https://h/?q=1", "id", "key"),
            Err(LocatorError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn parse_full_link() {
        let parsed = PartialLocator::parse("https://ember.example/01ABC#K3y").unwrap();
        assert_eq!(parsed.id, "01ABC");
        assert_eq!(parsed.key.as_deref(), Some("K3y"));
    }

    #[test]
    fn parse_link_under_a_path_prefix() {
        let parsed = PartialLocator::parse("http://127.0.0.1:8080/s/01ABC/#K").unwrap();
        assert_eq!(parsed.id, "01ABC");
        assert_eq!(parsed.key.as_deref(), Some("K"));
    }

    #[test]
    fn parse_without_fragment_or_with_empty_one() {
        let parsed = PartialLocator::parse("https://ember.example/01ABC").unwrap();
        assert_eq!(parsed.key, None);

        let parsed = PartialLocator::parse("https://ember.example/01ABC#").unwrap();
        assert_eq!(parsed.key, None);
    }

    #[test]
    fn parse_bare_id() {
        let parsed = PartialLocator::parse("01ABC#K").unwrap();
        assert_eq!(parsed.id, "01ABC");
        assert_eq!(parsed.key.as_deref(), Some("K"));

        let parsed = PartialLocator::parse("01ABC").unwrap();
        assert_eq!(parsed.key, None);
    }

    #[test]
    fn parse_rejects_missing_id() {
        assert_eq!(
            PartialLocator::parse("https://ember.example/#K"),
            Err(LocatorError::MissingId)
        );
        assert_eq!(PartialLocator::parse("#K"), Err(LocatorError::MissingId));
    }

    #[test]
    fn created_locator_parses_back() {
        let locator = Locator::new("https://ember.example", "01ABC", "K3y").unwrap();
        let parsed = PartialLocator::parse(&locator.to_string()).unwrap();
        assert_eq!(parsed, locator.to_partial());
    }

    #[test]
    fn debug_hides_key() {
        let locator = Locator::new("https://ember.example", "01ABC", "K3y").unwrap();
        assert!(!format!("{locator:?}").contains("K3y"));
    }
}
