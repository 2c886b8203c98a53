//! Text helpers shared by services: Markdown rendering, column padding and
//! `%{var}` templates.

use pulldown_cmark::{html, Options, Parser};
use std::collections::HashMap;

/// Render Markdown to an HTML fragment.
pub fn markdown_render(input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(input, options);
    let mut out = String::with_capacity(input.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out.trim_end().to_string()
}

/// Pad `value` with spaces on the right to `width` characters.
///
/// Values already at or past `width` are returned unchanged.
pub fn pad_to_width(value: &str, width: usize) -> String {
    let mut out = String::from(value);
    let mut len = value.chars().count();
    while len < width {
        out.push(' ');
        len += 1;
    }
    out
}

/// Substitute `%{name}` placeholders. Unknown placeholders are left as-is.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("%{");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
