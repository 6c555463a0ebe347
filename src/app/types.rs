use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Placeholder stored in every field that has not been resolved yet.
pub const SENTINEL: &str = "N/A";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    DetailUrl,
    Rating,
    Certifications,
    PhoneNumber,
    AboutText,
    AnalysisText,
}

impl Field {
    /// Column order of the row-store.
    pub const ALL: [Field; 7] = [
        Field::Name,
        Field::DetailUrl,
        Field::Rating,
        Field::Certifications,
        Field::PhoneNumber,
        Field::AboutText,
        Field::AnalysisText,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::DetailUrl => "detail_url",
            Field::Rating => "rating",
            Field::Certifications => "certifications",
            Field::PhoneNumber => "phone_number",
            Field::AboutText => "about_text",
            Field::AnalysisText => "analysis_text",
        }
    }
}

/// One contractor row. Field order matches [`Field::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default = "sentinel", deserialize_with = "cell")]
    pub name: String,
    #[serde(default = "sentinel", alias = "page_link", deserialize_with = "cell")]
    pub detail_url: String,
    #[serde(default = "sentinel", alias = "rating_stars", deserialize_with = "cell")]
    pub rating: String,
    #[serde(default = "sentinel", deserialize_with = "cell")]
    pub certifications: String,
    #[serde(default = "sentinel", deserialize_with = "cell")]
    pub phone_number: String,
    #[serde(default = "sentinel", alias = "about_section", deserialize_with = "cell")]
    pub about_text: String,
    #[serde(default = "sentinel", alias = "gpt_analysis", deserialize_with = "cell")]
    pub analysis_text: String,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            name: sentinel(),
            detail_url: sentinel(),
            rating: sentinel(),
            certifications: sentinel(),
            phone_number: sentinel(),
            about_text: sentinel(),
            analysis_text: sentinel(),
        }
    }
}

impl Record {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::DetailUrl => &self.detail_url,
            Field::Rating => &self.rating,
            Field::Certifications => &self.certifications,
            Field::PhoneNumber => &self.phone_number,
            Field::AboutText => &self.about_text,
            Field::AnalysisText => &self.analysis_text,
        }
    }

    /// Stores `value`, collapsing blank input to [`SENTINEL`].
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = normalize_cell(Some(value.into()));
        match field {
            Field::Name => self.name = value,
            Field::DetailUrl => self.detail_url = value,
            Field::Rating => self.rating = value,
            Field::Certifications => self.certifications = value,
            Field::PhoneNumber => self.phone_number = value,
            Field::AboutText => self.about_text = value,
            Field::AnalysisText => self.analysis_text = value,
        }
    }

    pub fn is_resolved(&self, field: Field) -> bool {
        is_resolved_value(self.get(field))
    }

    pub fn normalize(&mut self) {
        for field in Field::ALL {
            let value = self.get(field).to_string();
            self.set(field, value);
        }
    }
}

/// A value counts as resolved when it is neither blank nor the sentinel.
///
/// A real value that happens to read `N/A` is indistinguishable from an
/// unresolved one.
pub fn is_resolved_value(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && trimmed != SENTINEL
}

fn sentinel() -> String {
    SENTINEL.to_string()
}

fn normalize_cell(raw: Option<String>) -> String {
    match raw {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => sentinel(),
    }
}

fn cell<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(normalize_cell)
}

/// Upper bounds and fixed delays used by the browser-driven stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Bound on waiting for `document.readyState == "complete"`.
    pub ready_timeout: Duration,
    /// Fixed pause after the document is ready, for client-side rendering.
    pub settle: Duration,
    /// Pause between failed navigation attempts.
    pub retry_backoff: Duration,
    pub element_timeout: Duration,
    /// Bound on the listing container appearing.
    pub listing_timeout: Duration,
    pub next_page_settle: Duration,
    pub overlay_timeout: Duration,
    pub overlay_settle: Duration,
    pub poll_interval: Duration,
    pub page_load_timeout: Duration,
    pub script_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            settle: Duration::from_secs(3),
            retry_backoff: Duration::from_secs(5),
            element_timeout: Duration::from_secs(10),
            listing_timeout: Duration::from_secs(30),
            next_page_settle: Duration::from_secs(5),
            overlay_timeout: Duration::from_secs(5),
            overlay_settle: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
            page_load_timeout: Duration::from_secs(60),
            script_timeout: Duration::from_secs(30),
        }
    }
}
