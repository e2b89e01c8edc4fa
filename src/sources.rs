//! The chat-source contract.
//!
//! A source lists conversations and yields their messages. Ingest calls it
//! once per conversation, checking for cancellation in between.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{SourceConversation, SourceMessage};

#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Short label recorded as the `source` of every imported message.
    fn name(&self) -> &str;

    /// Export entries the source dropped before delivery (service events,
    /// empty text).
    fn skipped_entries(&self) -> u64 {
        0
    }

    async fn conversations(&self) -> Result<Vec<SourceConversation>>;

    /// Messages of one conversation, oldest first. When `since` is set, only
    /// messages at or after that timestamp are required; returning more is
    /// harmless because message inserts are idempotent.
    async fn messages(&self, conversation_id: &str, since: Option<i64>) -> Result<Vec<SourceMessage>>;
}
