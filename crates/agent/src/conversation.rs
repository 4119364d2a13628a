//! Conversation log: two histories per session id (running/compacted and
//! full), stored in the agent's private tables. Messages are keyed by a
//! stable conversation id so streaming updates replace in place.

use db::agent_store::{
    AgentDb,
    entities::{compact_conversation, full_conversation},
};
use operations::client::MessageRole;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct ConversationMessage {
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

impl ConversationMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationHistories {
    pub running: Vec<ConversationMessage>,
    pub full: Vec<ConversationMessage>,
}

#[derive(Clone)]
pub struct ConversationLog {
    pool: DatabaseConnection,
}

impl ConversationLog {
    pub fn new(store: &AgentDb) -> Self {
        Self {
            pool: store.pool.clone(),
        }
    }

    /// Read both histories. When one store is empty the other is used for
    /// both (older sessions only wrote one table). A final pass removes any
    /// surviving duplicate ids, keeping the last occurrence.
    pub async fn get(&self, session_id: &str) -> Result<ConversationHistories, DbErr> {
        let running = self.read_compact(session_id).await?;
        let full = self.read_full(session_id).await?;
        let (running, full) = match (running.is_empty(), full.is_empty()) {
            (true, false) => (full.clone(), full),
            (false, true) => (running.clone(), running),
            _ => (running, full),
        };
        Ok(ConversationHistories {
            running: dedup_by_id(running),
            full: dedup_by_id(full),
        })
    }

    pub async fn set(
        &self,
        session_id: &str,
        histories: &ConversationHistories,
    ) -> Result<(), DbErr> {
        self.write_compact(session_id, &histories.running).await?;
        self.write_full(session_id, &histories.full).await?;
        Ok(())
    }

    /// Insert-or-replace by conversation id in both histories; an existing
    /// id means a streaming update of the same message.
    pub async fn add(
        &self,
        session_id: &str,
        message: ConversationMessage,
    ) -> Result<(), DbErr> {
        let mut histories = self.get(session_id).await?;
        upsert(&mut histories.running, message.clone());
        upsert(&mut histories.full, message);
        self.set(session_id, &histories).await
    }

    async fn read_full(&self, session_id: &str) -> Result<Vec<ConversationMessage>, DbErr> {
        let row = full_conversation::Entity::find_by_id(session_id.to_string())
            .one(&self.pool)
            .await?;
        Ok(row
            .map(|r| deserialize_messages(&r.messages))
            .unwrap_or_default())
    }

    async fn read_compact(&self, session_id: &str) -> Result<Vec<ConversationMessage>, DbErr> {
        let row = compact_conversation::Entity::find_by_id(session_id.to_string())
            .one(&self.pool)
            .await?;
        Ok(row
            .map(|r| deserialize_messages(&r.messages))
            .unwrap_or_default())
    }

    async fn write_full(
        &self,
        session_id: &str,
        messages: &[ConversationMessage],
    ) -> Result<(), DbErr> {
        let payload = serialize_messages(messages)?;
        let existing = full_conversation::Entity::find_by_id(session_id.to_string())
            .one(&self.pool)
            .await?;
        match existing {
            Some(model) => {
                let mut active: full_conversation::ActiveModel = model.into();
                active.messages = Set(payload);
                active.update(&self.pool).await?;
            }
            None => {
                let active = full_conversation::ActiveModel {
                    id: Set(session_id.to_string()),
                    messages: Set(payload),
                };
                active.insert(&self.pool).await?;
            }
        }
        Ok(())
    }

    async fn write_compact(
        &self,
        session_id: &str,
        messages: &[ConversationMessage],
    ) -> Result<(), DbErr> {
        let payload = serialize_messages(messages)?;
        let existing = compact_conversation::Entity::find_by_id(session_id.to_string())
            .one(&self.pool)
            .await?;
        match existing {
            Some(model) => {
                let mut active: compact_conversation::ActiveModel = model.into();
                active.messages = Set(payload);
                active.update(&self.pool).await?;
            }
            None => {
                let active = compact_conversation::ActiveModel {
                    id: Set(session_id.to_string()),
                    messages: Set(payload),
                };
                active.insert(&self.pool).await?;
            }
        }
        Ok(())
    }
}

fn serialize_messages(messages: &[ConversationMessage]) -> Result<String, DbErr> {
    serde_json::to_string(messages).map_err(|err| DbErr::Custom(err.to_string()))
}

fn deserialize_messages(raw: &str) -> Vec<ConversationMessage> {
    match serde_json::from_str(raw) {
        Ok(messages) => messages,
        Err(err) => {
            tracing::warn!("Dropping unreadable conversation history: {err}");
            Vec::new()
        }
    }
}

fn upsert(history: &mut Vec<ConversationMessage>, message: ConversationMessage) {
    match history
        .iter_mut()
        .find(|m| m.conversation_id == message.conversation_id)
    {
        Some(existing) => *existing = message,
        None => history.push(message),
    }
}

fn dedup_by_id(messages: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
    let mut out: Vec<ConversationMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        if let Some(existing) = out
            .iter_mut()
            .find(|m| m.conversation_id == message.conversation_id)
        {
            *existing = message;
        } else {
            out.push(message);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh_log() -> ConversationLog {
        let store = AgentDb::open_in_memory().await.unwrap();
        ConversationLog::new(&store)
    }

    #[tokio::test]
    async fn add_with_existing_id_replaces_in_place() {
        let log = fresh_log().await;
        log.add(
            "s1",
            ConversationMessage::new("c1", MessageRole::Assistant, "partial"),
        )
        .await
        .unwrap();
        log.add(
            "s1",
            ConversationMessage::new("c1", MessageRole::Assistant, "complete response"),
        )
        .await
        .unwrap();
        log.add("s1", ConversationMessage::new("c2", MessageRole::User, "hi"))
            .await
            .unwrap();

        let histories = log.get("s1").await.unwrap();
        assert_eq!(histories.running.len(), 2);
        assert_eq!(histories.running[0].content, "complete response");
        assert_eq!(histories.full.len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_the_non_empty_store() {
        let log = fresh_log().await;
        // Simulate an older session that only wrote the full history.
        log.write_full(
            "s2",
            &[ConversationMessage::new("c1", MessageRole::User, "hello")],
        )
        .await
        .unwrap();

        let histories = log.get("s2").await.unwrap();
        assert_eq!(histories.running.len(), 1);
        assert_eq!(histories.full.len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let log = fresh_log().await;
        log.add("a", ConversationMessage::new("c1", MessageRole::User, "1"))
            .await
            .unwrap();
        log.add("b", ConversationMessage::new("c1", MessageRole::User, "2"))
            .await
            .unwrap();
        assert_eq!(log.get("a").await.unwrap().full[0].content, "1");
        assert_eq!(log.get("b").await.unwrap().full[0].content, "2");
    }
}
