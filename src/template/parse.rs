use std::path::Path;

use crate::template::types::Template;

pub fn parse_template(path: &Path) -> crate::Result<Template> {
    let content = std::fs::read_to_string(path).map_err(|source| crate::MergeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| crate::MergeError::TemplateParseYaml {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_template_str(content: &str) -> crate::Result<Template> {
    serde_yaml::from_str(content).map_err(|source| crate::MergeError::TemplateParseYaml {
        path: std::path::PathBuf::from("<string>"),
        source,
    })
}
