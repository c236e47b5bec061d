use crate::config::MergeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Body is already rich text and is sent as-is.
    #[default]
    Html,
    Markdown,
    Text,
}

/// Subject and body slots plus the settings that go with them.
#[derive(Debug, Clone, PartialEq, Default, serde::Deserialize, serde::Serialize)]
pub struct Template {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub body_format: Option<BodyFormat>,
    pub stylesheet: Option<String>,
    pub style: Option<String>,
    #[serde(default, flatten)]
    pub config: MergeConfig,
}

impl Template {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn effective_body_format(&self) -> BodyFormat {
        self.body_format.unwrap_or_default()
    }
}
