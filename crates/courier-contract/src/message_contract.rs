//! Core vocabulary and template schema for Courier messages.
//!
//! Templates are validated when registered, never at send time: every declared
//! channel must carry a content block that passes that channel's constraints,
//! and every declared variable must have a well-formed type. Variable bindings
//! are checked against the declared schema before any rendering happens.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum push notification title length accepted without truncation.
pub const PUSH_TITLE_MAX_CHARS: usize = 65;
/// Maximum push notification body length accepted without truncation.
pub const PUSH_BODY_MAX_CHARS: usize = 240;
/// Maximum in-app notification title length.
pub const INAPP_TITLE_MAX_CHARS: usize = 100;
/// Maximum in-app notification message length.
pub const INAPP_MESSAGE_MAX_CHARS: usize = 500;
/// Hard cap on SMS body length after substitution.
pub const SMS_BODY_MAX_CHARS: usize = 1_600;

/// Fixed fallback ordering applied when a recipient has no preferred channel.
pub const DEFAULT_CHANNEL_ORDER: [Channel; 5] = [
    Channel::Inapp,
    Channel::Push,
    Channel::Email,
    Channel::Whatsapp,
    Channel::Sms,
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `Channel` transports.
pub enum Channel {
    Email,
    Push,
    Whatsapp,
    Sms,
    Inapp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Push => "push",
            Self::Whatsapp => "whatsapp",
            Self::Sms => "sms",
            Self::Inapp => "inapp",
        }
    }

    /// Parses the snake_case wire token used in preference documents.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" => Some(Self::Email),
            "push" => Some(Self::Push),
            "whatsapp" => Some(Self::Whatsapp),
            "sms" => Some(Self::Sms),
            "inapp" | "in_app" => Some(Self::Inapp),
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageCategory` values.
pub enum MessageCategory {
    Onboarding,
    #[default]
    Transactional,
    Marketing,
    Health,
    Emergency,
}

impl MessageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Onboarding => "onboarding",
            Self::Transactional => "transactional",
            Self::Marketing => "marketing",
            Self::Health => "health",
            Self::Emergency => "emergency",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessagePriority` values.
pub enum MessagePriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl MessagePriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// Urgent sends bypass quiet-hours deferral.
    pub fn bypasses_quiet_hours(self) -> bool {
        matches!(self, Self::Urgent)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported in-app notification kinds.
pub enum InboxMessageKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Promotion,
}

impl InboxMessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Promotion => "promotion",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `VariableType` values for template variables.
pub enum VariableType {
    String,
    Number,
    Boolean,
    Date,
    Object,
}

impl VariableType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Object => "object",
        }
    }

    /// Returns true when `value` satisfies this declared type.
    ///
    /// Date variables are RFC 3339 strings so they survive JSON transport.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Date => value
                .as_str()
                .map(|raw| DateTime::parse_from_rfc3339(raw).is_ok())
                .unwrap_or(false),
            Self::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Declared template variable: name, type, required flag, optional rule.
pub struct VariableSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(default)]
    pub required: bool,
    /// Optional regex applied to string-typed values at bind time.
    #[serde(default)]
    pub validation: Option<String>,
}

impl VariableSpec {
    pub fn required(name: impl Into<String>, variable_type: VariableType) -> Self {
        Self {
            name: name.into(),
            variable_type,
            required: true,
            validation: None,
        }
    }

    pub fn optional(name: impl Into<String>, variable_type: VariableType) -> Self {
        Self {
            name: name.into(),
            variable_type,
            required: false,
            validation: None,
        }
    }
}

/// Validates caller-supplied bindings against the declared variable schema.
///
/// Missing required variables and type mismatches are rejected before any
/// rendering happens; undeclared bindings are rejected so typos surface
/// instead of silently substituting nothing.
pub fn validate_variable_bindings(
    specs: &[VariableSpec],
    bindings: &BTreeMap<String, Value>,
) -> Result<()> {
    for spec in specs {
        match bindings.get(&spec.name) {
            None if spec.required => {
                bail!("missing required template variable '{}'", spec.name)
            }
            None => {}
            Some(value) => {
                if !spec.variable_type.matches(value) {
                    bail!(
                        "template variable '{}' does not match declared type {}",
                        spec.name,
                        spec.variable_type.as_str()
                    );
                }
                if let (Some(pattern), Some(text)) = (&spec.validation, value.as_str()) {
                    let rule = Regex::new(pattern).with_context(|| {
                        format!("variable '{}' has an invalid validation rule", spec.name)
                    })?;
                    if !rule.is_match(text) {
                        bail!(
                            "template variable '{}' fails validation rule '{pattern}'",
                            spec.name
                        );
                    }
                }
            }
        }
    }
    let declared: BTreeSet<&str> = specs.iter().map(|spec| spec.name.as_str()).collect();
    for name in bindings.keys() {
        if !declared.contains(name.as_str()) {
            bail!("template does not declare variable '{name}'");
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Email content block: lightweight markup body compiled to HTML at render.
pub struct EmailContent {
    pub subject: String,
    #[serde(default)]
    pub preheader: String,
    pub body_markup: String,
    /// Optional explicit plain-text fallback; derived from markup when empty.
    #[serde(default)]
    pub body_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Push content block. Over-length titles and bodies truncate at render.
pub struct PushContent {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub click_action: Option<String>,
    #[serde(default)]
    pub deep_link: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates WhatsApp approved-template parameter kinds.
pub enum WhatsappParameterKind {
    Text,
    Currency,
    DateTime,
    Media,
}

impl WhatsappParameterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Currency => "currency",
            Self::DateTime => "date_time",
            Self::Media => "media",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One approved parameter slot in a WhatsApp template.
///
/// Only the bound value may vary per send; kind and currency code are part of
/// the provider-approved shape and stay fixed.
pub struct WhatsappParameterSpec {
    pub kind: WhatsappParameterKind,
    /// Template variable whose bound value fills this slot.
    pub variable: String,
    #[serde(default)]
    pub currency_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// WhatsApp content block referencing a provider-approved named template.
pub struct WhatsappContent {
    pub template_name: String,
    #[serde(default = "default_whatsapp_language")]
    pub language: String,
    #[serde(default)]
    pub parameters: Vec<WhatsappParameterSpec>,
}

fn default_whatsapp_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// SMS content block: plain text with substitution, hard length cap.
pub struct SmsContent {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Optional call-to-action attached to an in-app notification.
pub struct InboxAction {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// In-app content block; also the source of the durable inbox entry.
pub struct InappContent {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub kind: InboxMessageKind,
    #[serde(default)]
    pub action: Option<InboxAction>,
    /// Seconds until the rendered inbox entry expires, when present.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "channel", rename_all = "snake_case")]
/// Channel-specific content block carried by a template.
pub enum TemplateContent {
    Email(EmailContent),
    Push(PushContent),
    Whatsapp(WhatsappContent),
    Sms(SmsContent),
    Inapp(InappContent),
}

impl TemplateContent {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Email(_) => Channel::Email,
            Self::Push(_) => Channel::Push,
            Self::Whatsapp(_) => Channel::Whatsapp,
            Self::Sms(_) => Channel::Sms,
            Self::Inapp(_) => Channel::Inapp,
        }
    }

    /// Convenience constructor for the common in-app block.
    pub fn inapp(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Inapp(InappContent {
            title: title.into(),
            message: message.into(),
            kind: InboxMessageKind::Info,
            action: None,
            ttl_seconds: None,
        })
    }

    /// Structural validation applied at template registration.
    ///
    /// Returns one message per violated constraint; an empty list means the
    /// block is acceptable for its channel.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            Self::Email(content) => {
                if content.subject.trim().is_empty() {
                    errors.push("email subject must not be empty".to_string());
                }
                if content.body_markup.trim().is_empty() {
                    errors.push("email body markup must not be empty".to_string());
                }
                if let Some(text) = &content.body_text {
                    if text.trim().is_empty() {
                        errors.push(
                            "email explicit text fallback must not be blank".to_string(),
                        );
                    }
                }
            }
            Self::Push(content) => {
                if content.title.trim().is_empty() {
                    errors.push("push title must not be empty".to_string());
                }
                if content.body.trim().is_empty() {
                    errors.push("push body must not be empty".to_string());
                }
                if let Some(click_action) = &content.click_action {
                    if !is_http_url(click_action) {
                        errors.push(format!("push click_action '{click_action}' is not a valid http(s) url"));
                    }
                }
                if let Some(deep_link) = &content.deep_link {
                    if !is_scheme_url(deep_link) {
                        errors.push(format!(
                            "push deep_link '{deep_link}' is not scheme://path shaped"
                        ));
                    }
                }
            }
            Self::Whatsapp(content) => {
                if content.template_name.trim().is_empty() {
                    errors.push("whatsapp template_name must not be empty".to_string());
                }
                if content.language.trim().is_empty() {
                    errors.push("whatsapp language must not be empty".to_string());
                }
                for (index, parameter) in content.parameters.iter().enumerate() {
                    if parameter.variable.trim().is_empty() {
                        errors.push(format!(
                            "whatsapp parameter index {index} has empty variable reference"
                        ));
                    }
                    match parameter.kind {
                        WhatsappParameterKind::Currency => {
                            let code_ok = parameter
                                .currency_code
                                .as_deref()
                                .map(|code| code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()))
                                .unwrap_or(false);
                            if !code_ok {
                                errors.push(format!(
                                    "whatsapp currency parameter index {index} requires an ISO currency_code"
                                ));
                            }
                        }
                        _ => {
                            if parameter.currency_code.is_some() {
                                errors.push(format!(
                                    "whatsapp parameter index {index} carries currency_code but is not a currency slot"
                                ));
                            }
                        }
                    }
                }
            }
            Self::Sms(content) => {
                if content.body.trim().is_empty() {
                    errors.push("sms body must not be empty".to_string());
                }
                if content.body.chars().count() > SMS_BODY_MAX_CHARS {
                    errors.push(format!(
                        "sms body exceeds {SMS_BODY_MAX_CHARS} chars before substitution"
                    ));
                }
            }
            Self::Inapp(content) => {
                if content.title.trim().is_empty() {
                    errors.push("inapp title must not be empty".to_string());
                }
                if content.title.chars().count() > INAPP_TITLE_MAX_CHARS {
                    errors.push(format!("inapp title exceeds {INAPP_TITLE_MAX_CHARS} chars"));
                }
                if content.message.trim().is_empty() {
                    errors.push("inapp message must not be empty".to_string());
                }
                if content.message.chars().count() > INAPP_MESSAGE_MAX_CHARS {
                    errors.push(format!(
                        "inapp message exceeds {INAPP_MESSAGE_MAX_CHARS} chars"
                    ));
                }
                if let Some(action) = &content.action {
                    if action.label.trim().is_empty() {
                        errors.push("inapp action requires a label".to_string());
                    }
                    if !is_http_url(&action.url) {
                        errors.push(format!(
                            "inapp action url '{}' is not a valid http(s) url",
                            action.url
                        ));
                    }
                }
                if content.ttl_seconds == Some(0) {
                    errors.push("inapp ttl_seconds must be positive when present".to_string());
                }
            }
        }
        errors
    }
}

/// Returns true for absolute `http`/`https` URLs with a non-empty host.
pub fn is_http_url(raw: &str) -> bool {
    let trimmed = raw.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));
    match rest {
        Some(rest) => !rest.is_empty() && !rest.starts_with('/'),
        None => false,
    }
}

/// Returns true for `scheme://` shaped deep links (`app://orders/42`).
pub fn is_scheme_url(raw: &str) -> bool {
    let trimmed = raw.trim();
    let Some(separator) = trimmed.find("://") else {
        return false;
    };
    let scheme = &trimmed[..separator];
    !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        && trimmed.len() > separator + 3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Versioned, reusable message definition with channel-specific content.
pub struct MessageTemplate {
    #[serde(default)]
    pub id: String,
    /// Unique logical name callers reference in requests.
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub category: MessageCategory,
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    #[serde(default)]
    pub content: BTreeMap<Channel, TemplateContent>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_template_version")]
    pub version: u32,
}

fn default_true() -> bool {
    true
}

fn default_template_version() -> u32 {
    1
}

impl MessageTemplate {
    pub fn builder(key: impl Into<String>, name: impl Into<String>) -> MessageTemplateBuilder {
        MessageTemplateBuilder::new(key, name)
    }

    /// Channels this template declares content for, in stable order.
    pub fn channels(&self) -> Vec<Channel> {
        self.content.keys().copied().collect()
    }

    pub fn content_for(&self, channel: Channel) -> Option<&TemplateContent> {
        self.content.get(&channel)
    }

    /// Registration-time validation; invalid templates never reach send time.
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            bail!("template key must not be empty");
        }
        if self.name.trim().is_empty() {
            bail!("template '{}' name must not be empty", self.key);
        }
        if self.version == 0 {
            bail!("template '{}' version must be at least 1", self.key);
        }
        if self.content.is_empty() {
            bail!("template '{}' must declare at least one channel", self.key);
        }
        for (channel, block) in &self.content {
            if block.channel() != *channel {
                bail!(
                    "template '{}' maps channel {} to a {} content block",
                    self.key,
                    channel.as_str(),
                    block.channel().as_str()
                );
            }
            let errors = block.validation_errors();
            if !errors.is_empty() {
                bail!(
                    "template '{}' channel {} content invalid: {}",
                    self.key,
                    channel.as_str(),
                    errors.join("; ")
                );
            }
        }
        let mut seen = BTreeSet::new();
        for variable in &self.variables {
            if variable.name.trim().is_empty() {
                bail!("template '{}' declares a variable with empty name", self.key);
            }
            if !seen.insert(variable.name.as_str()) {
                bail!(
                    "template '{}' declares duplicate variable '{}'",
                    self.key,
                    variable.name
                );
            }
            if let Some(pattern) = &variable.validation {
                Regex::new(pattern).with_context(|| {
                    format!(
                        "template '{}' variable '{}' has an invalid validation rule",
                        self.key, variable.name
                    )
                })?;
            }
        }
        for block in self.content.values() {
            if let TemplateContent::Whatsapp(content) = block {
                for parameter in &content.parameters {
                    if !seen.contains(parameter.variable.as_str()) {
                        bail!(
                            "template '{}' whatsapp parameter references undeclared variable '{}'",
                            self.key,
                            parameter.variable
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builder keeping template literals readable at call sites.
#[derive(Debug, Clone)]
pub struct MessageTemplateBuilder {
    template: MessageTemplate,
}

impl MessageTemplateBuilder {
    fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            template: MessageTemplate {
                id: format!("tpl-{key}"),
                key,
                name: name.into(),
                category: MessageCategory::Transactional,
                variables: Vec::new(),
                content: BTreeMap::new(),
                is_active: true,
                version: 1,
            },
        }
    }

    pub fn category(mut self, category: MessageCategory) -> Self {
        self.template.category = category;
        self
    }

    pub fn variable(mut self, spec: VariableSpec) -> Self {
        self.template.variables.push(spec);
        self
    }

    pub fn content(mut self, channel: Channel, block: TemplateContent) -> Self {
        self.template.content.insert(channel, block);
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.template.version = version;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.template.is_active = false;
        self
    }

    pub fn build(self) -> MessageTemplate {
        self.template
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
/// Caller input for one orchestrated send. Not persisted as-is.
pub struct MessageRequest {
    pub template_key: String,
    pub user_id: String,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Explicit channel override; defaults to the template's declared set.
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MessageRequest {
    pub fn new(template_key: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            template_key: template_key.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Recipient-local quiet-hours window, `HH:MM` on both ends.
pub struct QuietHoursWindow {
    pub start: String,
    pub end: String,
    /// IANA zone overriding the recipient zone when present.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Default for QuietHoursWindow {
    fn default() -> Self {
        Self {
            start: "22:00".to_string(),
            end: "08:00".to_string(),
            timezone: None,
        }
    }
}

impl QuietHoursWindow {
    pub fn parse_bounds(&self) -> Result<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(self.start.trim(), "%H:%M")
            .map_err(|_| anyhow::anyhow!("invalid quiet-hours start '{}'", self.start))?;
        let end = NaiveTime::parse_from_str(self.end.trim(), "%H:%M")
            .map_err(|_| anyhow::anyhow!("invalid quiet-hours end '{}'", self.end))?;
        Ok((start, end))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Per-channel destination resolved from a recipient's contact identifiers.
pub enum ChannelAddress {
    Email(String),
    PushTokens(Vec<String>),
    Phone(String),
    WhatsappNumber(String),
    Inbox { user_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
/// Resolved view of a user for messaging purposes.
pub struct MessageRecipient {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub push_tokens: Vec<String>,
    #[serde(default)]
    pub whatsapp_number: Option<String>,
    #[serde(default)]
    pub preferred_channel: Option<Channel>,
    /// IANA timezone name, e.g. `America/Sao_Paulo`. Empty falls back to UTC.
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub unsubscribed: BTreeSet<Channel>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHoursWindow>,
}

impl MessageRecipient {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Resolves the contact destination for a channel, when one exists.
    pub fn address_for(&self, channel: Channel) -> Option<ChannelAddress> {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        match channel {
            Channel::Email => non_blank(&self.email).map(ChannelAddress::Email),
            Channel::Sms => non_blank(&self.phone).map(ChannelAddress::Phone),
            Channel::Whatsapp => non_blank(&self.whatsapp_number).map(ChannelAddress::WhatsappNumber),
            Channel::Push => {
                let tokens: Vec<String> = self
                    .push_tokens
                    .iter()
                    .map(|token| token.trim().to_string())
                    .filter(|token| !token.is_empty())
                    .collect();
                if tokens.is_empty() {
                    None
                } else {
                    Some(ChannelAddress::PushTokens(tokens))
                }
            }
            Channel::Inapp => Some(ChannelAddress::Inbox {
                user_id: self.user_id.clone(),
            }),
        }
    }

    pub fn has_contact_for(&self, channel: Channel) -> bool {
        self.address_for(channel).is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates email delivery cadence preferences.
pub enum EmailFrequency {
    #[default]
    Immediate,
    Daily,
    Weekly,
}

impl EmailFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Per-channel preference entry. Defaults to fully open.
pub struct ChannelPreference {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `None` allows every category.
    #[serde(default)]
    pub allowed_categories: Option<Vec<MessageCategory>>,
}

impl Default for ChannelPreference {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_categories: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Marketing opt-in gates, independent per channel. Missing entry = opted in.
pub struct MarketingPreferences {
    #[serde(default)]
    pub channels: BTreeMap<Channel, bool>,
}

impl MarketingPreferences {
    pub fn allows(&self, channel: Channel) -> bool {
        self.channels.get(&channel).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Per-user notification preferences.
///
/// The absence of a stored document never blocks transactional or emergency
/// sends: every accessor treats missing entries as permissive.
pub struct NotificationPreferences {
    #[serde(default)]
    pub channels: BTreeMap<Channel, ChannelPreference>,
    #[serde(default)]
    pub email_frequency: EmailFrequency,
    #[serde(default)]
    pub marketing: MarketingPreferences,
}

impl NotificationPreferences {
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        self.channels
            .get(&channel)
            .map(|preference| preference.enabled)
            .unwrap_or(true)
    }

    pub fn category_allowed(&self, channel: Channel, category: MessageCategory) -> bool {
        if category == MessageCategory::Marketing && !self.marketing.allows(channel) {
            return false;
        }
        match self
            .channels
            .get(&channel)
            .and_then(|preference| preference.allowed_categories.as_ref())
        {
            Some(allowed) => allowed.contains(&category),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{json, Value};

    use super::{
        is_http_url, is_scheme_url, validate_variable_bindings, Channel, ChannelAddress,
        EmailContent, InappContent, InboxAction, InboxMessageKind, MessageCategory,
        MessageRecipient, MessageTemplate, NotificationPreferences, PushContent, TemplateContent,
        VariableSpec, VariableType, WhatsappContent, WhatsappParameterKind, WhatsappParameterSpec,
    };

    fn email_block() -> TemplateContent {
        TemplateContent::Email(EmailContent {
            subject: "Order {{ order_id }}".to_string(),
            preheader: String::new(),
            body_markup: "Thanks for your order, {{ name }}.".to_string(),
            body_text: None,
        })
    }

    #[test]
    fn unit_template_validate_rejects_empty_channel_set() {
        let template = MessageTemplate::builder("welcome", "Welcome").build();
        let error = template.validate().expect_err("no channels should fail");
        assert!(error.to_string().contains("at least one channel"));
    }

    #[test]
    fn unit_template_validate_rejects_mismatched_content_channel() {
        let template = MessageTemplate::builder("welcome", "Welcome")
            .content(Channel::Push, email_block())
            .build();
        let error = template.validate().expect_err("mismatch should fail");
        assert!(error.to_string().contains("email content block"));
    }

    #[test]
    fn unit_template_validate_rejects_invalid_push_click_action() {
        let template = MessageTemplate::builder("alert", "Alert")
            .content(
                Channel::Push,
                TemplateContent::Push(PushContent {
                    title: "Alert".to_string(),
                    body: "Check your account".to_string(),
                    click_action: Some("not-a-url".to_string()),
                    deep_link: None,
                }),
            )
            .build();
        let error = template.validate().expect_err("bad url should fail");
        assert!(error.to_string().contains("click_action"));
    }

    #[test]
    fn unit_template_validate_rejects_whatsapp_currency_without_code() {
        let template = MessageTemplate::builder("receipt", "Receipt")
            .variable(VariableSpec::required("amount", VariableType::Number))
            .content(
                Channel::Whatsapp,
                TemplateContent::Whatsapp(WhatsappContent {
                    template_name: "receipt_v2".to_string(),
                    language: "en".to_string(),
                    parameters: vec![WhatsappParameterSpec {
                        kind: WhatsappParameterKind::Currency,
                        variable: "amount".to_string(),
                        currency_code: None,
                    }],
                }),
            )
            .build();
        let error = template.validate().expect_err("missing code should fail");
        assert!(error.to_string().contains("currency_code"));
    }

    #[test]
    fn unit_template_validate_rejects_undeclared_whatsapp_variable() {
        let template = MessageTemplate::builder("receipt", "Receipt")
            .content(
                Channel::Whatsapp,
                TemplateContent::Whatsapp(WhatsappContent {
                    template_name: "receipt_v2".to_string(),
                    language: "en".to_string(),
                    parameters: vec![WhatsappParameterSpec {
                        kind: WhatsappParameterKind::Text,
                        variable: "ghost".to_string(),
                        currency_code: None,
                    }],
                }),
            )
            .build();
        let error = template.validate().expect_err("undeclared var should fail");
        assert!(error.to_string().contains("undeclared variable 'ghost'"));
    }

    #[test]
    fn unit_variable_bindings_reject_missing_required_and_type_mismatch() {
        let specs = vec![
            VariableSpec::required("order_id", VariableType::String),
            VariableSpec::optional("total", VariableType::Number),
        ];

        let error = validate_variable_bindings(&specs, &BTreeMap::new())
            .expect_err("missing required should fail");
        assert!(error.to_string().contains("order_id"));

        let bindings: BTreeMap<String, Value> = BTreeMap::from([
            ("order_id".to_string(), json!("ord-1")),
            ("total".to_string(), json!("not a number")),
        ]);
        let error =
            validate_variable_bindings(&specs, &bindings).expect_err("type mismatch should fail");
        assert!(error.to_string().contains("declared type number"));
    }

    #[test]
    fn unit_variable_bindings_apply_declared_validation_rules() {
        let mut spec = VariableSpec::required("phone", VariableType::String);
        spec.validation = Some(r"^\+[0-9]{7,15}$".to_string());
        let specs = vec![spec];

        let ok = BTreeMap::from([("phone".to_string(), json!("+15550100"))]);
        validate_variable_bindings(&specs, &ok).expect("matching value passes");

        let bad = BTreeMap::from([("phone".to_string(), json!("555-0100"))]);
        let error =
            validate_variable_bindings(&specs, &bad).expect_err("rule violation should fail");
        assert!(error.to_string().contains("validation rule"));
    }

    #[test]
    fn unit_variable_bindings_reject_undeclared_names() {
        let specs = vec![VariableSpec::optional("name", VariableType::String)];
        let bindings = BTreeMap::from([("typo".to_string(), json!("x"))]);
        let error =
            validate_variable_bindings(&specs, &bindings).expect_err("undeclared should fail");
        assert!(error.to_string().contains("'typo'"));
    }

    #[test]
    fn unit_date_variables_require_rfc3339_strings() {
        assert!(VariableType::Date.matches(&json!("2026-08-29T12:00:00Z")));
        assert!(!VariableType::Date.matches(&json!("yesterday")));
        assert!(!VariableType::Date.matches(&json!(1700000000)));
    }

    #[test]
    fn functional_recipient_address_resolution_covers_every_channel() {
        let mut recipient = MessageRecipient::new("user-1");
        recipient.email = Some("user@example.com".to_string());
        recipient.phone = Some("+15550100".to_string());
        recipient.whatsapp_number = Some("+15550100".to_string());
        recipient.push_tokens = vec!["tok-1".to_string(), " ".to_string()];

        assert_eq!(
            recipient.address_for(Channel::Email),
            Some(ChannelAddress::Email("user@example.com".to_string()))
        );
        assert_eq!(
            recipient.address_for(Channel::Push),
            Some(ChannelAddress::PushTokens(vec!["tok-1".to_string()]))
        );
        assert!(recipient.has_contact_for(Channel::Inapp));

        recipient.push_tokens.clear();
        assert!(!recipient.has_contact_for(Channel::Push));
    }

    #[test]
    fn functional_default_preferences_are_fully_permissive() {
        let preferences = NotificationPreferences::default();
        for channel in [
            Channel::Email,
            Channel::Push,
            Channel::Whatsapp,
            Channel::Sms,
            Channel::Inapp,
        ] {
            assert!(preferences.channel_enabled(channel));
            assert!(preferences.category_allowed(channel, MessageCategory::Marketing));
            assert!(preferences.category_allowed(channel, MessageCategory::Emergency));
        }
    }

    #[test]
    fn regression_marketing_gate_is_independent_of_enabled_flag() {
        let mut preferences = NotificationPreferences::default();
        preferences.marketing.channels.insert(Channel::Email, false);
        assert!(preferences.channel_enabled(Channel::Email));
        assert!(!preferences.category_allowed(Channel::Email, MessageCategory::Marketing));
        assert!(preferences.category_allowed(Channel::Email, MessageCategory::Transactional));
    }

    #[test]
    fn unit_url_shape_helpers_accept_expected_grammars() {
        assert!(is_http_url("https://example.com/orders/1"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("https:///missing-host"));
        assert!(is_scheme_url("app://orders/42"));
        assert!(!is_scheme_url("orders/42"));
        assert!(!is_scheme_url("://nothing"));
    }

    #[test]
    fn integration_template_contract_roundtrips_through_json() {
        let template = MessageTemplate::builder("order-confirmed", "Order confirmed")
            .category(MessageCategory::Transactional)
            .variable(VariableSpec::required("order_id", VariableType::String))
            .content(Channel::Email, email_block())
            .content(
                Channel::Inapp,
                TemplateContent::Inapp(InappContent {
                    title: "Order {{ order_id }} confirmed".to_string(),
                    message: "We received your order.".to_string(),
                    kind: InboxMessageKind::Success,
                    action: Some(InboxAction {
                        label: "View order".to_string(),
                        url: "https://example.com/orders/{{ order_id }}".to_string(),
                    }),
                    ttl_seconds: None,
                }),
            )
            .build();
        template.validate().expect("template should validate");

        let raw = serde_json::to_string(&template).expect("serialize");
        let restored: MessageTemplate = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(template, restored);
    }
}
