//! Chat list view model.
//!
//! A refresh pulls the bulk identifier page, fans out one metadata and one
//! most-recent-message fetch per conversation, and only then swaps the whole
//! summary sequence in. There is no incremental patching: any relevant
//! notification triggers a full refresh, so two refreshes in a row simply
//! replace each other.

use futures_util::future;

use crate::client::{ClientError, ClientHandle};
use crate::protocol::{Chat, Message, Update};

pub const CHAT_PAGE_LIMIT: i32 = 100;
const LAST_MESSAGE_LIMIT: i32 = 1;

#[derive(Clone, Debug)]
pub struct ChatSummary {
    pub chat: Chat,
    pub last_message: Option<Message>,
}

pub struct ChatList {
    client: ClientHandle,
    chats: Vec<ChatSummary>,
}

impl ChatList {
    pub fn new(client: ClientHandle) -> Self {
        Self {
            client,
            chats: Vec::new(),
        }
    }

    pub fn chats(&self) -> &[ChatSummary] {
        &self.chats
    }

    /// Rebuild the summary sequence from scratch. The new sequence is
    /// committed only after every per-conversation fetch has resolved.
    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        let page = self.client.get_chats(CHAT_PAGE_LIMIT).await?;
        let fetches = page
            .chat_ids
            .iter()
            .map(|&chat_id| fetch_summary(&self.client, chat_id));
        let summaries: Result<Vec<_>, _> = future::join_all(fetches).await.into_iter().collect();
        self.chats = summaries?;
        Ok(())
    }

    /// Notification kinds that invalidate the list wholesale.
    pub fn is_refresh_trigger(update: &Update) -> bool {
        matches!(
            update,
            Update::UpdateNewMessage { .. }
                | Update::UpdateChatLastMessage { .. }
                | Update::UpdateChatReadInbox { .. }
        )
    }
}

async fn fetch_summary(client: &ClientHandle, chat_id: i64) -> Result<ChatSummary, ClientError> {
    let chat = client.get_chat(chat_id).await?;
    let last_message = match client.get_chat_history(chat_id, LAST_MESSAGE_LIMIT).await {
        Ok(mut history) => {
            if history.messages.is_empty() {
                None
            } else {
                Some(history.messages.remove(0))
            }
        }
        Err(error) => {
            // One conversation's history failing must not sink the list.
            tracing::warn!(chat_id, %error, "last message fetch failed");
            None
        }
    };
    Ok(ChatSummary { chat, last_message })
}
