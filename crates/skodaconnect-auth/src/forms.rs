//! Hidden-form extraction from the identity provider's login pages.
//!
//! The e-mail and password pages each carry a form with a known `id` whose
//! hidden inputs (CSRF token, relay state, HMAC, ...) must be posted back
//! verbatim together with the credential. We only need the form's `action`
//! and its hidden `name`/`value` pairs, so a small regex scanner is enough.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AuthError, Result};

/// `id` of the form on the e-mail entry page.
pub const EMAIL_FORM_ID: &str = "emailPasswordForm";

/// `id` of the form on the password entry page.
pub const PASSWORD_FORM_ID: &str = "credentialsForm";

static FORM_OPEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<form\b([^>]*)>").ok());

static FORM_CLOSE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)</form\s*>").ok());

static INPUT_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b([^>]*)>").ok());

static ATTRIBUTE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .ok()
});

/// A login form recovered from an HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenForm {
    /// The form's `action` attribute, usually a path relative to the issuer.
    pub action: String,
    /// Hidden inputs in document order.
    pub fields: Vec<(String, String)>,
}

impl HiddenForm {
    /// The hidden fields plus one extra field, ready for form encoding.
    pub fn with_field(&self, name: &str, value: &str) -> Vec<(String, String)> {
        let mut fields = self.fields.clone();
        fields.retain(|(existing, _)| existing != name);
        fields.push((name.to_string(), value.to_string()));
        fields
    }

    /// Resolve the action against the issuer.
    ///
    /// Absolute actions are returned unchanged; relative ones are appended to
    /// the issuer string as the identity provider expects.
    pub fn submission_url(&self, issuer: &str) -> String {
        if self.action.contains("://") {
            self.action.clone()
        } else {
            format!("{issuer}{}", self.action)
        }
    }
}

/// Find the form with the given `id` and collect its hidden inputs.
///
/// # Errors
///
/// Returns [`AuthError::FormParse`] if no form has that id or the form has
/// no `action`.
pub fn extract_hidden_form(html: &str, form_id: &str) -> Result<HiddenForm> {
    let (Some(form_open), Some(form_close), Some(input_tag), Some(attribute)) = (
        FORM_OPEN.as_ref(),
        FORM_CLOSE.as_ref(),
        INPUT_TAG.as_ref(),
        ATTRIBUTE.as_ref(),
    ) else {
        return Err(parse_error(form_id, "form patterns failed to compile"));
    };

    for open in form_open.captures_iter(html) {
        let (Some(tag), Some(attrs)) = (open.get(0), open.get(1)) else {
            continue;
        };
        let attrs = parse_attributes(attribute, attrs.as_str());
        if attr(&attrs, "id") != Some(form_id) {
            continue;
        }

        let action = attr(&attrs, "action")
            .filter(|a| !a.is_empty())
            .ok_or_else(|| parse_error(form_id, "form has no action"))?
            .to_string();

        let rest = &html[tag.end()..];
        let body = match form_close.find(rest) {
            Some(close) => &rest[..close.start()],
            None => rest,
        };

        let fields = input_tag
            .captures_iter(body)
            .filter_map(|input| {
                let attrs = parse_attributes(attribute, input.get(1)?.as_str());
                let kind = attr(&attrs, "type")?;
                if !kind.eq_ignore_ascii_case("hidden") {
                    return None;
                }
                let name = attr(&attrs, "name")?.to_string();
                let value = attr(&attrs, "value").unwrap_or_default().to_string();
                Some((name, value))
            })
            .collect();

        return Ok(HiddenForm { action, fields });
    }

    Err(parse_error(form_id, "form not found in page"))
}

fn parse_error(form_id: &str, reason: &str) -> AuthError {
    AuthError::FormParse {
        form: form_id.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_attributes(attribute: &Regex, raw: &str) -> Vec<(String, String)> {
    attribute
        .captures_iter(raw)
        .filter_map(|cap| {
            let name = cap.get(1)?.as_str().to_ascii_lowercase();
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .or_else(|| cap.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&#x2F;", "/")
        .replace("&#47;", "/")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
