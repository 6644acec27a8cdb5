use serde::{Deserialize, Serialize};
use url::Url;

/// Minister verification shown next to a user's progress.
///
/// Read-only projection of a profile record; it never affects step access.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MinisterStatus {
    pub is_minister: bool,
    #[serde(default)]
    pub minister_name: Option<String>,
    #[serde(default)]
    pub certificate_url: Option<Url>,
}

impl MinisterStatus {
    /// Status used when no verification is on record or the lookup failed.
    #[must_use]
    pub fn unverified() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn verified(name: impl Into<String>, certificate_url: Option<Url>) -> Self {
        let name = name.into();
        let name = name.trim();
        Self {
            is_minister: true,
            minister_name: (!name.is_empty()).then(|| name.to_owned()),
            certificate_url,
        }
    }
}
