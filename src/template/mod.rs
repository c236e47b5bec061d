mod parse;
mod placeholders;
mod types;
mod validate;

pub use parse::{parse_template, parse_template_str};
pub use placeholders::{extract_placeholders, unknown_placeholders};
pub use types::{BodyFormat, Template};
pub use validate::validate_template;
