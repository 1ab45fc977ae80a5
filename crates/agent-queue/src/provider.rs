// QueueProvider contract: one logical queue endpoint.

use crate::error::QueueError;
use crate::message::RawMessage;

use async_trait::async_trait;

/// Read-only facts about a queue endpoint: its region and the owner account it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMetadata {
    region: String,
    owner_id: String,
}

impl QueueMetadata {
    pub fn new(region: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            owner_id: owner_id.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Empty when the transport does not know the owner.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

/// A queue endpoint shared by every job polled from it.
///
/// `delete_message` is called concurrently by many jobs; any serialization the
/// transport needs happens inside the implementation.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    fn metadata(&self) -> &QueueMetadata;

    async fn delete_message(&self, message: &RawMessage) -> Result<(), QueueError>;
}
