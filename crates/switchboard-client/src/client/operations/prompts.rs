//! Prompt operations.

use std::collections::HashMap;

use serde_json::Value;
use switchboard_protocol::methods;
use switchboard_protocol::types::{GetPromptRequest, GetPromptResult, Prompt, PromptMessage};
use tracing::debug;

use crate::error::Result;
use crate::schema::{ArgValue, ArgumentSchema};

/// A rendered prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptOutcome {
    /// Description of the rendered prompt
    pub description: Option<String>,
    /// Rendered messages
    pub messages: Vec<PromptMessage>,
}

impl From<GetPromptResult> for PromptOutcome {
    fn from(result: GetPromptResult) -> Self {
        Self {
            description: result.description,
            messages: result.messages,
        }
    }
}

impl super::super::core::Client {
    /// Every prompt across all servers, under exposed names.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`](crate::Error::Connection) outside a client scope.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let namespace = self.require_namespace()?;
        Ok(namespace.prompts().iter().map(|e| e.item.clone()).collect())
    }

    /// One server's prompts exactly as it lists them.
    ///
    /// # Errors
    ///
    /// Unknown or disconnected server, or a failed listing.
    pub async fn list_prompts_raw(&self, server: &str) -> Result<Vec<Prompt>> {
        self.live_session(server)?.list_prompts().await
    }

    /// Render a prompt by exposed name.
    ///
    /// Prompt arguments travel as strings; other JSON values are serialized
    /// first. Missing required arguments fail before anything is sent.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`](crate::Error::Validation), an unroutable name,
    /// or a server or connection failure.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<PromptOutcome> {
        let namespace = self.namespace();
        let route = self
            .inner
            .aggregator
            .route_prompt(namespace.as_deref(), name)?;
        let arguments = arguments.unwrap_or(Value::Null);
        let coerced = match &route.schema {
            Some(schema) => schema.coerce(&arguments)?,
            None => ArgumentSchema::permissive().coerce(&arguments)?,
        };
        let session = self.live_session(&route.server)?;

        debug!(server = %route.server, prompt = %route.raw, "rendering prompt");
        let request = GetPromptRequest {
            name: route.raw,
            arguments: Some(stringify_arguments(&coerced)),
        };
        let value = session
            .request(
                methods::PROMPTS_GET,
                Some(serde_json::to_value(&request)?),
                self.inner.config.default_timeout,
                None,
            )
            .await?;
        let result: GetPromptResult = serde_json::from_value(value)?;
        Ok(result.into())
    }
}

fn stringify_arguments(arguments: &ArgValue) -> HashMap<String, String> {
    let ArgValue::Record(fields) = arguments else {
        return HashMap::new();
    };
    fields
        .iter()
        .map(|(name, value)| {
            let text = match value.to_json() {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (name.clone(), text)
        })
        .collect()
}
