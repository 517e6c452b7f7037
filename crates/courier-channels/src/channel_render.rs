//! Pure channel renderers with `{{ name }}` placeholder substitution.
//!
//! Bindings are validated against the template's declared variable schema
//! before anything renders; channel constraints (push truncation, WhatsApp
//! approved-slot shapes, in-app caps) are enforced here so adapters only ever
//! receive channel-ready content. Rendering never mutates the template.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use courier_contract::{
    is_http_url, is_scheme_url, validate_variable_bindings, Channel, EmailContent, InappContent,
    InboxAction, InboxMessageKind, MessageTemplate, PushContent, SmsContent, TemplateContent,
    WhatsappContent, WhatsappParameterKind, INAPP_MESSAGE_MAX_CHARS, INAPP_TITLE_MAX_CHARS,
    PUSH_BODY_MAX_CHARS, PUSH_TITLE_MAX_CHARS, SMS_BODY_MAX_CHARS,
};

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex compiles")
    })
}

fn bold_regex() -> &'static Regex {
    static BOLD: OnceLock<Regex> = OnceLock::new();
    BOLD.get_or_init(|| Regex::new(r"\*\*([^*]+)\*\*").expect("bold regex compiles"))
}

fn link_regex() -> &'static Regex {
    static LINK: OnceLock<Regex> = OnceLock::new();
    LINK.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("link regex compiles"))
}

/// Renders a bound variable for inline substitution.
fn placeholder_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

/// Substitutes every `{{ name }}` placeholder from the bindings.
///
/// Bindings were validated against the declared schema beforehand, so an
/// unresolvable placeholder can only name an absent optional variable; those
/// substitute to the empty string.
pub fn substitute_placeholders(text: &str, bindings: &BTreeMap<String, Value>) -> String {
    placeholder_regex()
        .replace_all(text, |captures: &regex::Captures<'_>| {
            bindings
                .get(&captures[1])
                .map(|value| placeholder_value(value))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Truncates to `max_chars`, reserving room for a trailing `...`.
fn truncate_with_ellipsis(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    (format!("{kept}..."), true)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Compiles the lightweight template markup to HTML.
///
/// Blank-line separated paragraphs, `**bold**`, and `[label](url)` links;
/// everything else is escaped text with in-paragraph line breaks.
fn markup_to_html(markup: &str) -> String {
    let mut paragraphs = Vec::new();
    for block in markup.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let escaped = escape_html(block);
        let bolded = bold_regex().replace_all(&escaped, "<strong>$1</strong>");
        let linked = link_regex().replace_all(&bolded, r#"<a href="$2">$1</a>"#);
        paragraphs.push(format!("<p>{}</p>", linked.replace('\n', "<br/>")));
    }
    paragraphs.join("\n")
}

/// Derives the plain-text fallback by stripping markup constructs.
fn strip_markup(markup: &str) -> String {
    let without_bold = bold_regex().replace_all(markup, "$1");
    let without_links = link_regex().replace_all(&without_bold, "$1 ($2)");
    without_links.trim().to_string()
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Channel-ready email payload.
pub struct RenderedEmail {
    pub subject: String,
    pub preheader: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Channel-ready push payload, post-truncation.
pub struct RenderedPush {
    pub title: String,
    pub body: String,
    pub click_action: Option<String>,
    pub deep_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// One filled approved-template slot; kind and currency code stay fixed.
pub struct RenderedWhatsappParameter {
    pub kind: WhatsappParameterKind,
    pub value: String,
    pub currency_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Channel-ready WhatsApp payload referencing the approved template.
pub struct RenderedWhatsapp {
    pub template_name: String,
    pub language: String,
    pub parameters: Vec<RenderedWhatsappParameter>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Channel-ready SMS payload.
pub struct RenderedSms {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Channel-ready in-app payload; also the inbox entry source.
pub struct RenderedInapp {
    pub title: String,
    pub message: String,
    pub kind: InboxMessageKind,
    pub action: Option<InboxAction>,
    pub expires_unix_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Validated, channel-ready content produced by one renderer call.
pub enum RenderedContent {
    Email(RenderedEmail),
    Push(RenderedPush),
    Whatsapp(RenderedWhatsapp),
    Sms(RenderedSms),
    Inapp(RenderedInapp),
}

impl RenderedContent {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Email(_) => Channel::Email,
            Self::Push(_) => Channel::Push,
            Self::Whatsapp(_) => Channel::Whatsapp,
            Self::Sms(_) => Channel::Sms,
            Self::Inapp(_) => Channel::Inapp,
        }
    }
}

pub fn render_email(
    content: &EmailContent,
    bindings: &BTreeMap<String, Value>,
) -> Result<RenderedEmail> {
    let subject = substitute_placeholders(&content.subject, bindings);
    if subject.trim().is_empty() {
        bail!("email subject is empty after substitution");
    }
    let markup = substitute_placeholders(&content.body_markup, bindings);
    let text_body = match &content.body_text {
        Some(text) => substitute_placeholders(text, bindings),
        None => strip_markup(&markup),
    };
    Ok(RenderedEmail {
        subject,
        preheader: substitute_placeholders(&content.preheader, bindings),
        html_body: markup_to_html(&markup),
        text_body,
    })
}

pub fn render_push(
    content: &PushContent,
    bindings: &BTreeMap<String, Value>,
) -> Result<RenderedPush> {
    let (title, title_truncated) = truncate_with_ellipsis(
        &substitute_placeholders(&content.title, bindings),
        PUSH_TITLE_MAX_CHARS,
    );
    if title_truncated {
        warn!(limit = PUSH_TITLE_MAX_CHARS, "push title truncated");
    }
    let (body, body_truncated) = truncate_with_ellipsis(
        &substitute_placeholders(&content.body, bindings),
        PUSH_BODY_MAX_CHARS,
    );
    if body_truncated {
        warn!(limit = PUSH_BODY_MAX_CHARS, "push body truncated");
    }

    let click_action = content
        .click_action
        .as_deref()
        .map(|raw| substitute_placeholders(raw, bindings));
    if let Some(url) = &click_action {
        if !is_http_url(url) {
            bail!("push click_action '{url}' is not a valid http(s) url after substitution");
        }
    }
    let deep_link = content
        .deep_link
        .as_deref()
        .map(|raw| substitute_placeholders(raw, bindings));
    if let Some(link) = &deep_link {
        if !is_scheme_url(link) {
            bail!("push deep_link '{link}' is not scheme://path shaped after substitution");
        }
    }

    Ok(RenderedPush {
        title,
        body,
        click_action,
        deep_link,
    })
}

/// Fills the approved WhatsApp template slots.
///
/// The provider-approved shape is preserved: slot count, kinds, and currency
/// codes come from the template; only the bound values vary.
pub fn render_whatsapp(
    content: &WhatsappContent,
    bindings: &BTreeMap<String, Value>,
) -> Result<RenderedWhatsapp> {
    let mut parameters = Vec::with_capacity(content.parameters.len());
    for parameter in &content.parameters {
        let value = bindings.get(&parameter.variable).with_context(|| {
            format!(
                "whatsapp slot '{}' has no bound variable '{}'",
                parameter.kind.as_str(),
                parameter.variable
            )
        })?;
        let rendered = match parameter.kind {
            WhatsappParameterKind::Text => placeholder_value(value),
            WhatsappParameterKind::Currency => {
                let amount = value.as_f64().with_context(|| {
                    format!(
                        "whatsapp currency slot '{}' requires a numeric value",
                        parameter.variable
                    )
                })?;
                format!("{amount:.2}")
            }
            WhatsappParameterKind::DateTime => {
                let raw = value.as_str().unwrap_or_default();
                DateTime::parse_from_rfc3339(raw).with_context(|| {
                    format!(
                        "whatsapp date_time slot '{}' requires an RFC 3339 value",
                        parameter.variable
                    )
                })?;
                raw.to_string()
            }
            WhatsappParameterKind::Media => {
                let url = value.as_str().unwrap_or_default().to_string();
                if !is_http_url(&url) {
                    bail!(
                        "whatsapp media slot '{}' requires an http(s) url",
                        parameter.variable
                    );
                }
                url
            }
        };
        parameters.push(RenderedWhatsappParameter {
            kind: parameter.kind,
            value: rendered,
            currency_code: parameter.currency_code.clone(),
        });
    }
    Ok(RenderedWhatsapp {
        template_name: content.template_name.clone(),
        language: content.language.clone(),
        parameters,
    })
}

pub fn render_sms(content: &SmsContent, bindings: &BTreeMap<String, Value>) -> Result<RenderedSms> {
    let body = substitute_placeholders(&content.body, bindings);
    if body.trim().is_empty() {
        bail!("sms body is empty after substitution");
    }
    let chars = body.chars().count();
    if chars > SMS_BODY_MAX_CHARS {
        bail!("sms body is {chars} chars after substitution, cap is {SMS_BODY_MAX_CHARS}");
    }
    Ok(RenderedSms { body })
}

pub fn render_inapp(
    content: &InappContent,
    bindings: &BTreeMap<String, Value>,
    now_unix_ms: u64,
) -> Result<RenderedInapp> {
    let title = substitute_placeholders(&content.title, bindings);
    if title.chars().count() > INAPP_TITLE_MAX_CHARS {
        bail!(
            "inapp title exceeds {INAPP_TITLE_MAX_CHARS} chars after substitution"
        );
    }
    let message = substitute_placeholders(&content.message, bindings);
    if message.chars().count() > INAPP_MESSAGE_MAX_CHARS {
        bail!(
            "inapp message exceeds {INAPP_MESSAGE_MAX_CHARS} chars after substitution"
        );
    }
    let action = match &content.action {
        Some(action) => {
            let url = substitute_placeholders(&action.url, bindings);
            if !is_http_url(&url) {
                bail!("inapp action url '{url}' is not a valid http(s) url after substitution");
            }
            Some(InboxAction {
                label: substitute_placeholders(&action.label, bindings),
                url,
            })
        }
        None => None,
    };
    Ok(RenderedInapp {
        title,
        message,
        kind: content.kind,
        action,
        expires_unix_ms: content
            .ttl_seconds
            .map(|ttl| now_unix_ms.saturating_add(ttl.saturating_mul(1_000))),
    })
}

/// Renders one channel of a template after validating the bindings against
/// the declared variable schema. Idempotent for identical inputs.
pub fn render_channel_content(
    template: &MessageTemplate,
    channel: Channel,
    bindings: &BTreeMap<String, Value>,
    now_unix_ms: u64,
) -> Result<RenderedContent> {
    validate_variable_bindings(&template.variables, bindings)
        .with_context(|| format!("invalid bindings for template '{}'", template.key))?;
    let block = template.content_for(channel).with_context(|| {
        format!(
            "template '{}' declares no {} content",
            template.key,
            channel.as_str()
        )
    })?;
    match block {
        TemplateContent::Email(content) => render_email(content, bindings).map(RenderedContent::Email),
        TemplateContent::Push(content) => render_push(content, bindings).map(RenderedContent::Push),
        TemplateContent::Whatsapp(content) => {
            render_whatsapp(content, bindings).map(RenderedContent::Whatsapp)
        }
        TemplateContent::Sms(content) => render_sms(content, bindings).map(RenderedContent::Sms),
        TemplateContent::Inapp(content) => {
            render_inapp(content, bindings, now_unix_ms).map(RenderedContent::Inapp)
        }
    }
}

/// Generic inbox entry used when a template declares no in-app content.
pub fn render_inbox_fallback(template: &MessageTemplate) -> RenderedInapp {
    RenderedInapp {
        title: template.name.clone(),
        message: format!("You have a new {} notification.", template.category.as_str()),
        kind: InboxMessageKind::Info,
        action: None,
        expires_unix_ms: None,
    }
}
