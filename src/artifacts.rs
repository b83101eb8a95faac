//! Callback artifact extraction.
//!
//! The provider may deliver the reset credential in the query string
//! (`?code=...`), in the fragment (`#token_hash=...&type=recovery`), or report
//! a failure the same way (`#error=access_denied&error_code=otp_expired`).
//! Every entry point reads those through [`CallbackArtifacts`].

use std::borrow::Cow;

use url::Url;
use url::form_urlencoded;

use crate::types::OtpType;

/// Parameter names consumed by the callback flow. Stripped after settlement.
pub const CONSUMED_PARAMS: [&str; 7] = [
    "code",
    "token_hash",
    "token",
    "type",
    "error",
    "error_code",
    "error_description",
];

/// Error reported by the identity provider in the redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError {
    /// The `error` parameter (e.g. `access_denied`).
    pub error: String,
    /// The `error_code` parameter (e.g. `otp_expired`).
    pub code: Option<String>,
    /// The decoded `error_description` parameter.
    pub description: Option<String>,
}

/// Candidate credentials parsed once from the landing URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackArtifacts {
    pub code: Option<String>,
    pub token_hash: Option<String>,
    pub otp_type: Option<String>,
    pub error: Option<CallbackError>,
    /// Whether the URL carried any fragment parameters at all.
    pub has_fragment_params: bool,
}

impl CallbackArtifacts {
    /// Reads artifacts from the query string and fragment of `url`.
    ///
    /// A non-empty query value wins over the fragment value of the same name.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let query: Vec<(Cow<'_, str>, Cow<'_, str>)> = url.query_pairs().collect();
        let fragment: Vec<(Cow<'_, str>, Cow<'_, str>)> = url
            .fragment()
            .map(|f| form_urlencoded::parse(f.as_bytes()).collect())
            .unwrap_or_default();

        let lookup = |names: &[&str]| -> Option<String> {
            [&query, &fragment].into_iter().find_map(|pairs| {
                names
                    .iter()
                    .find_map(|name| first_non_empty(pairs, name))
            })
        };

        let error = lookup(&["error"]).map(|error| CallbackError {
            error,
            code: lookup(&["error_code"]),
            description: lookup(&["error_description"]),
        });

        Self {
            code: lookup(&["code"]),
            token_hash: lookup(&["token_hash", "token"]),
            otp_type: lookup(&["type"]),
            error,
            has_fragment_params: fragment.iter().any(|(k, _)| !k.is_empty()),
        }
    }

    /// Parses `raw` as an absolute URL and extracts its artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`](crate::Error::InvalidUrl) if `raw` is not a URL.
    pub fn parse(raw: &str) -> Result<Self, crate::Error> {
        let url = Url::parse(raw)?;
        Ok(Self::from_url(&url))
    }

    /// The `type` parameter as a known OTP type.
    #[must_use]
    pub fn parsed_type(&self) -> Option<OtpType> {
        self.otp_type.as_deref().and_then(OtpType::parse)
    }

    /// `token_hash`, but only when it is paired with `type` equal to `expected`.
    #[must_use]
    pub fn token_hash_for(&self, expected: OtpType) -> Option<&str> {
        match self.parsed_type() {
            Some(ty) if ty == expected => self.token_hash.as_deref(),
            _ => None,
        }
    }

    /// Whether any credential or error was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_none()
            && self.token_hash.is_none()
            && self.error.is_none()
            && !self.has_fragment_params
    }
}

fn first_non_empty(pairs: &[(Cow<'_, str>, Cow<'_, str>)], name: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.clone().into_owned())
}

/// Returns `url` with the consumed parameters and the whole fragment removed.
///
/// Unrelated query parameters are kept in their original order.
#[must_use]
pub fn strip_consumed(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !CONSUMED_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut cleaned = url.clone();
    cleaned.set_fragment(None);
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    cleaned
}
