// Raw queue messages and the QueueMessage contract.

use crate::error::ActionError;

use agent_common::ActionResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// Typed attribute attached to a queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttribute {
    pub data_type: String,
    pub string_value: Option<String>,
}

impl MessageAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: "String".to_string(),
            string_value: Some(value.into()),
        }
    }
}

/// One message as received from the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    /// Provider token needed to delete the message.
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, MessageAttribute>,
}

impl RawMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(name.into(), MessageAttribute::string(value));
        self
    }

    /// String value of the named attribute, if present.
    pub fn string_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|a| a.string_value.as_deref())
    }
}

/// A received message together with the ability to run the action it requests.
///
/// `process` is called at most once per instance, by the owning job.
#[async_trait]
pub trait QueueMessage: Send + Sync {
    fn message(&self) -> &RawMessage;

    async fn process(&self) -> Result<ActionResult, ActionError>;
}
