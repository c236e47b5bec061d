use crate::template::types::Template;

/// Refuse templates that cannot produce a meaningful email.
pub fn validate_template(template: &Template) -> crate::Result<()> {
    template.config.delimiters.validate()?;
    if template.subject.trim().is_empty() && template.body.trim().is_empty() {
        return Err(crate::MergeError::EmptyTemplate);
    }
    Ok(())
}
