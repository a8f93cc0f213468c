//! Email template rendering
//!
//! Templates reference variables as `@@name@@`. Rendering substitutes supplied
//! variables in both subject and body; a placeholder naming a variable that was not
//! supplied is an error rather than being left in the output. Values are
//! HTML-escaped in the body only; the subject is plain text.

use std::collections::HashMap;

use crate::core::db::models::EmailTemplate;

/// Template used for account confirmation links
pub const ACCOUNT_CONFIRMATION: &str = "account_confirmation";
/// Template used for password reset links
pub const PASSWORD_RESET: &str = "password_reset";

/// Template rendering errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Template '{template}' references unknown variable '{variable}'")]
    UnknownVariable { template: String, variable: String },
}

/// Subject and HTML body ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

/// Render `template` with `variables`
pub fn render(
    template: &EmailTemplate,
    variables: &[(&str, &str)],
) -> Result<RenderedEmail, TemplateError> {
    let vars: HashMap<&str, &str> = variables.iter().copied().collect();

    Ok(RenderedEmail {
        subject: substitute(&template.name, &template.subject, &vars, false)?,
        html_body: substitute(&template.name, &template.html_body, &vars, true)?,
    })
}

/// Escape the characters that are significant in HTML text and attribute values
fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn is_variable_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn substitute(
    template_name: &str,
    text: &str,
    vars: &HashMap<&str, &str>,
    html_escape: bool,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("@@") {
        let after_open = &rest[start + 2..];
        let Some(len) = after_open.find("@@") else {
            break;
        };
        let name = &after_open[..len];

        if !is_variable_name(name) {
            // Not a placeholder; keep the first "@@" and rescan from the second
            out.push_str(&rest[..start + 2]);
            rest = after_open;
            continue;
        }

        let value = vars
            .get(name)
            .ok_or_else(|| TemplateError::UnknownVariable {
                template: template_name.to_string(),
                variable: name.to_string(),
            })?;
        out.push_str(&rest[..start]);
        if html_escape {
            out.push_str(&escape_html(value));
        } else {
            out.push_str(value);
        }
        rest = &after_open[len + 2..];
    }

    out.push_str(rest);
    Ok(out)
}
