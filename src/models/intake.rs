use serde::Deserialize;

/// Query parameters the intake route can carry. `title`/`text`/`url` form
/// the direct-value fallback path; `shareId` correlates a redirect with a
/// record the interceptor stored earlier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntakeParams {
    pub title: Option<String>,
    pub text: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "shareId")]
    pub share_id: Option<String>,
}

impl IntakeParams {
    /// True when any direct-value parameter is present (the synchronous
    /// retrieval path, no worker round trip needed).
    pub fn has_direct_values(&self) -> bool {
        self.title.is_some() || self.text.is_some() || self.url.is_some()
    }
}
