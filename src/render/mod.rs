use std::path::Path;

use regex::{Captures, Regex, RegexBuilder};

use crate::config::Delimiters;
use crate::data::FieldMap;
use crate::template::{BodyFormat, Template};
use crate::MergeError;

/// The rendered output for one data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    /// `None` when the body format is `Text`.
    pub html_body: Option<String>,
    /// Always present.
    pub text_body: String,
}

/// Placeholder substitution compiled for one header row.
///
/// All tokens are found in a single left-to-right pass, so a value that
/// itself looks like a token is inserted literally and never expanded.
#[derive(Debug, Clone)]
pub struct Renderer {
    pattern: Option<Regex>,
}

impl Renderer {
    pub fn new<S: AsRef<str>>(headers: &[S], delimiters: &Delimiters) -> crate::Result<Self> {
        delimiters.validate()?;
        if headers.is_empty() {
            return Ok(Self { pattern: None });
        }

        // Longest names first so `[[AB]]` is never shadowed by `[[A]]`.
        let mut names: Vec<&str> = headers.iter().map(AsRef::as_ref).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        names.dedup();

        let alternation = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let source = format!(
            "{}({}){}",
            regex::escape(&delimiters.open),
            alternation,
            regex::escape(&delimiters.close)
        );
        let pattern = RegexBuilder::new(&source)
            .size_limit(64 * (1 << 20))
            .build()
            .map_err(|e| MergeError::PlaceholderPattern {
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Replace every known token in `template` with its value from `fields`.
    ///
    /// Tokens naming a header absent from `fields` stay verbatim. Values are
    /// inserted without any escaping.
    pub fn render(&self, template: &str, fields: &FieldMap) -> String {
        let Some(pattern) = &self.pattern else {
            return template.to_string();
        };
        pattern
            .replace_all(template, |caps: &Captures<'_>| {
                fields
                    .get(&caps[1])
                    .map(str::to_string)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Substitute `fields` into `template` using `delimiters`.
///
/// Convenience over [`Renderer`] for a single string; callers rendering many
/// rows should build the `Renderer` once.
pub fn render(template: &str, fields: &FieldMap, delimiters: &Delimiters) -> crate::Result<String> {
    let headers: Vec<&str> = fields.iter().map(|(h, _)| h).collect();
    Ok(Renderer::new(&headers, delimiters)?.render(template, fields))
}

/// Render subject and body for one row and shape the body per its format.
///
/// `css` comes from [`resolve_css`], resolved once per run.
pub fn render_row(
    renderer: &Renderer,
    template: &Template,
    fields: &FieldMap,
    to: &str,
    css: Option<&str>,
) -> crate::Result<RenderedEmail> {
    let subject = renderer.render(&template.subject, fields);
    let rendered_body = renderer.render(&template.body, fields);

    let (html_body, text_body) = match template.effective_body_format() {
        BodyFormat::Markdown => {
            let html = markdown_to_html(&rendered_body);
            let html = apply_css(&html, css)?;
            let text = strip_html(&html);
            (Some(html), text)
        }
        BodyFormat::Html => {
            let html = apply_css(&rendered_body, css)?;
            let text = strip_html(&html);
            (Some(html), text)
        }
        BodyFormat::Text => (None, rendered_body),
    };

    Ok(RenderedEmail {
        to: to.trim().to_string(),
        subject,
        html_body,
        text_body,
    })
}

fn markdown_to_html(markdown: &str) -> String {
    let mut options = comrak::Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.render.r#unsafe = true;
    comrak::markdown_to_html(markdown, &options)
}

/// Load the template's CSS: inline `style` wins over a `stylesheet` file.
pub fn resolve_css(template: &Template, template_dir: &Path) -> crate::Result<Option<String>> {
    if template.effective_body_format() == BodyFormat::Text {
        return Ok(None);
    }
    if let Some(inline_css) = &template.style {
        return Ok(Some(inline_css.clone()));
    }
    if let Some(stylesheet_path) = &template.stylesheet {
        let full_path = template_dir.join(stylesheet_path);
        let css = std::fs::read_to_string(&full_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MergeError::StylesheetNotFound {
                    path: full_path.clone(),
                }
            } else {
                MergeError::Io {
                    path: full_path.clone(),
                    source: e,
                }
            }
        })?;
        return Ok(Some(css));
    }
    Ok(None)
}

fn apply_css(html: &str, css: Option<&str>) -> crate::Result<String> {
    let Some(css_str) = css else {
        return Ok(html.to_string());
    };
    let inliner = css_inline::CSSInliner::options()
        .load_remote_stylesheets(false)
        .build();
    // inline_fragment only styles the first top-level element, so wrap.
    let wrapped = format!("<div>{html}</div>");
    let inlined = inliner
        .inline_fragment(&wrapped, css_str)
        .map_err(|e| MergeError::CssInline {
            reason: e.to_string(),
        })?;
    let inner = if inlined.starts_with("<div") {
        let start = inlined.find('>').map(|i| i + 1).unwrap_or(0);
        let end = inlined.rfind("</div>").unwrap_or(inlined.len());
        &inlined[start..end]
    } else {
        &inlined
    };
    Ok(inner.to_string())
}

fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
}
