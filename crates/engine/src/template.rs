//! `{{name}}` placeholder rendering for stored notification templates.

use herald_common::types::NotificationTemplate;

/// Title and body produced from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub title: Option<String>,
    pub body: String,
}

/// Substitute `{{name}}` placeholders from a JSON object of parameters.
///
/// String values are inserted verbatim, any other JSON value as its JSON
/// text. Unknown placeholders render as the empty string. An unterminated
/// `{{` is kept as literal text.
pub fn render(template: &str, params: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = after_open[..end].trim();
        match params.get(name) {
            Some(serde_json::Value::String(s)) => out.push_str(s),
            Some(serde_json::Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

pub fn render_template(
    template: &NotificationTemplate,
    params: &serde_json::Value,
) -> RenderedContent {
    RenderedContent {
        title: template.title_template.as_deref().map(|t| render(t, params)),
        body: render(&template.body_template, params),
    }
}
