// ActionResult payload delivered to the control plane after an action ran.

use serde::{Deserialize, Serialize};

/// Outcome of one executed action.
///
/// Produced by a queue message's processing step and handed to the result
/// reporter unmodified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alert_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entity_type: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_type: String,
    pub is_successful: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_message: String,
}

impl ActionResult {
    /// Returns `true` if the action completed successfully.
    pub fn is_success(&self) -> bool {
        self.is_successful
    }

    /// Mark the result as failed with the given reason.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.is_successful = false;
        self.failure_message = message.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_skips_empty_fields() {
        let result = ActionResult {
            alert_id: "alert-1".into(),
            action: "Restart".into(),
            is_successful: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "alertId": "alert-1",
                "action": "Restart",
                "isSuccessful": true,
            })
        );
    }

    #[test]
    fn with_failure_sets_message() {
        let result = ActionResult {
            action: "Restart".into(),
            is_successful: true,
            ..Default::default()
        }
        .with_failure("exit code 2");
        assert!(!result.is_success());
        assert_eq!(result.failure_message, "exit code 2");
    }
}
