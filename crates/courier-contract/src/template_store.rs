//! In-memory versioned template registry.
//!
//! Registration is the only validation gate: a template that passes
//! `MessageTemplate::validate` and version monotonicity is stored; everything
//! else is rejected here so send-time code never sees a malformed template.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};

use crate::message_contract::MessageTemplate;

#[derive(Debug, Clone, Default)]
/// Shared template registry keyed by logical template key.
pub struct TemplateStore {
    templates: Arc<Mutex<BTreeMap<String, MessageTemplate>>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores a template.
    ///
    /// Re-registering an existing key requires a strictly greater version;
    /// stale or duplicate versions are rejected.
    pub fn register(&self, template: MessageTemplate) -> Result<()> {
        template
            .validate()
            .with_context(|| format!("rejecting template '{}'", template.key))?;
        let mut templates = self
            .templates
            .lock()
            .map_err(|_| anyhow::anyhow!("template store lock poisoned"))?;
        if let Some(existing) = templates.get(&template.key) {
            if template.version <= existing.version {
                bail!(
                    "template '{}' version {} does not supersede stored version {}",
                    template.key,
                    template.version,
                    existing.version
                );
            }
        }
        templates.insert(template.key.clone(), template);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<MessageTemplate> {
        self.templates
            .lock()
            .ok()
            .and_then(|templates| templates.get(key.trim()).cloned())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.templates.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
