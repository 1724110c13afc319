//! Single-conversation view model.
//!
//! History is one fixed page reversed into chronological order; new
//! messages arrive through the update stream and are appended in arrival
//! order. Appends are de-duplicated by message id: a message delivered both
//! by the history fetch and by a notification racing it must show up once.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::client::{ClientError, ClientHandle};
use crate::protocol::{
    FileType, FormattedText, InputFile, InputMessageContent, Message, Update,
};

pub const HISTORY_PAGE_LIMIT: i32 = 50;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment not found: {0}")]
    Missing(PathBuf),
    #[error("attachment has no usable file name: {0}")]
    InvalidName(PathBuf),
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Video,
    Document,
}

impl AttachmentKind {
    fn file_type(self) -> FileType {
        match self {
            AttachmentKind::Photo => FileType::FileTypePhoto,
            AttachmentKind::Video => FileType::FileTypeVideo,
            AttachmentKind::Document => FileType::FileTypeDocument,
        }
    }

    fn into_content(self, file: InputFile, caption: FormattedText) -> InputMessageContent {
        match self {
            AttachmentKind::Photo => InputMessageContent::InputMessagePhoto {
                photo: file,
                caption,
            },
            AttachmentKind::Video => InputMessageContent::InputMessageVideo {
                video: file,
                caption,
            },
            AttachmentKind::Document => InputMessageContent::InputMessageDocument {
                document: file,
                caption,
            },
        }
    }
}

/// Images upload as photos, videos as videos, everything else as documents.
pub fn classify_attachment(path: &Path) -> AttachmentKind {
    let mime = mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string());
    match mime.as_deref() {
        Some(value) if value.starts_with("image/") => AttachmentKind::Photo,
        Some(value) if value.starts_with("video/") => AttachmentKind::Video,
        _ => AttachmentKind::Document,
    }
}

pub struct ChatView {
    client: ClientHandle,
    chat_id: i64,
    title: String,
    messages: Vec<Message>,
}

impl ChatView {
    pub fn new(client: ClientHandle, chat_id: i64, title: impl Into<String>) -> Self {
        Self {
            client,
            chat_id,
            title: title.into(),
            messages: Vec::new(),
        }
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Fetch the most recent page and store it oldest-first.
    pub async fn load_history(&mut self) -> Result<(), ClientError> {
        let mut history = self
            .client
            .get_chat_history(self.chat_id, HISTORY_PAGE_LIMIT)
            .await?;
        history.messages.reverse();
        self.messages = history.messages;
        Ok(())
    }

    /// Append a pushed message for this conversation. Returns the appended
    /// message, or `None` when the update is for another chat, not a new
    /// message, or already present.
    pub fn apply_update(&mut self, update: &Update) -> Option<&Message> {
        let Update::UpdateNewMessage { message } = update else {
            return None;
        };
        if message.chat_id != self.chat_id {
            return None;
        }
        if self.messages.iter().any(|known| known.id == message.id) {
            return None;
        }
        self.messages.push(message.clone());
        self.messages.last()
    }

    /// The echoed message arrives through the update stream like everyone
    /// else's; nothing is appended locally here.
    pub async fn send_text(&self, text: &str) -> Result<Message, ClientError> {
        self.client
            .send_message(
                self.chat_id,
                InputMessageContent::InputMessageText {
                    text: FormattedText::plain(text),
                },
            )
            .await
    }

    /// Upload the file, then send a message referencing the uploaded copy.
    /// Both steps go through the runtime; failure in either leaves the
    /// caller's draft untouched.
    pub async fn send_attachment(
        &self,
        path: &Path,
        caption: &str,
    ) -> Result<Message, AttachmentError> {
        if !path.is_file() {
            return Err(AttachmentError::Missing(path.to_path_buf()));
        }
        let local_path = path
            .to_str()
            .ok_or_else(|| AttachmentError::InvalidName(path.to_path_buf()))?;

        let kind = classify_attachment(path);
        let uploaded = self.client.upload_file(local_path, kind.file_type()).await?;

        let uploaded_path = if uploaded.local.path.is_empty() {
            local_path.to_string()
        } else {
            uploaded.local.path
        };
        let content = kind.into_content(
            InputFile::InputFileLocal {
                path: uploaded_path,
            },
            FormattedText::plain(caption),
        );
        Ok(self.client.send_message(self.chat_id, content).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing;
    use crate::client::ClientHandle;
    use serde_json::json;

    fn text_update(chat_id: i64, id: i64, body: &str) -> Update {
        serde_json::from_value(json!({
            "@type": "updateNewMessage",
            "message": {
                "id": id,
                "chat_id": chat_id,
                "is_outgoing": false,
                "date": 1700000000,
                "content": {
                    "@type": "messageText",
                    "text": { "@type": "formattedText", "text": body }
                }
            }
        }))
        .expect("test update shape")
    }

    #[tokio::test]
    async fn history_loads_in_chronological_order() {
        let (client, mut gateway) = testing::pair();
        let responder = tokio::spawn(async move {
            let (request, reply) = gateway.next_request().await.expect("history request");
            assert_eq!(request["@type"], "getChatHistory");
            assert_eq!(request["limit"], HISTORY_PAGE_LIMIT);
            assert_eq!(request["offset"], 0);
            // Newest first, the way the runtime returns pages.
            let _ = reply.send(Ok(json!({
                "messages": [
                    { "id": 3, "chat_id": 9, "date": 300 },
                    { "id": 2, "chat_id": 9, "date": 200 },
                    { "id": 1, "chat_id": 9, "date": 100 }
                ]
            })));
        });

        let mut view = ChatView::new(client, 9, "Nine");
        view.load_history().await.expect("history");

        let ids: Vec<i64> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        responder.await.expect("responder");
    }

    #[test]
    fn updates_append_only_for_this_chat() {
        let mut view = ChatView::new(ClientHandle::degraded(), 9, "Nine");

        assert!(view.apply_update(&text_update(9, 1, "hi")).is_some());
        assert!(view.apply_update(&text_update(4, 2, "elsewhere")).is_none());

        let ids: Vec<i64> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn duplicate_message_ids_are_dropped() {
        let mut view = ChatView::new(ClientHandle::degraded(), 9, "Nine");

        assert!(view.apply_update(&text_update(9, 5, "once")).is_some());
        // Same message delivered again, racing the history fetch.
        assert!(view.apply_update(&text_update(9, 5, "once")).is_none());
        assert!(view.apply_update(&text_update(9, 6, "twice")).is_some());

        let ids: Vec<i64> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 6]);
    }

    #[tokio::test]
    async fn failed_send_reports_once_and_keeps_state() {
        let client = testing::rejecting("Timeout");
        let mut view = ChatView::new(client, 9, "Nine");
        view.apply_update(&text_update(9, 1, "existing"));

        let error = view.send_text("draft text").await.expect_err("send fails");
        assert!(matches!(error, ClientError::Rpc { .. }));
        // One error per attempt, message sequence untouched.
        assert_eq!(view.messages().len(), 1);
    }

    #[tokio::test]
    async fn degraded_client_sends_resolve_empty() {
        let view = ChatView::new(ClientHandle::degraded(), 9, "Nine");
        let message = view.send_text("hello").await.expect("no-op send");
        assert_eq!(message.id, 0);
        assert!(view.messages().is_empty());
    }

    #[tokio::test]
    async fn attachments_upload_then_send() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cat.jpg");
        std::fs::write(&path, b"jpeg bytes").expect("write file");

        let (client, mut gateway) = testing::pair();
        let responder = tokio::spawn(async move {
            let (request, reply) = gateway.next_request().await.expect("upload request");
            assert_eq!(request["@type"], "uploadFile");
            assert_eq!(request["file_type"]["@type"], "fileTypePhoto");
            assert_eq!(request["priority"], 1);
            let _ = reply.send(Ok(json!({
                "@type": "file",
                "id": 17,
                "local": { "path": "/runtime/files/17.jpg" },
                "remote": { "id": "AAA" }
            })));

            let (request, reply) = gateway.next_request().await.expect("send request");
            assert_eq!(request["@type"], "sendMessage");
            let content = &request["input_message_content"];
            assert_eq!(content["@type"], "inputMessagePhoto");
            assert_eq!(content["photo"]["path"], "/runtime/files/17.jpg");
            assert_eq!(content["caption"]["text"], "the cat");
            let _ = reply.send(Ok(json!({ "id": 99, "chat_id": 9 })));
        });

        let view = ChatView::new(client, 9, "Nine");
        let message = view
            .send_attachment(&path, "the cat")
            .await
            .expect("attachment send");
        assert_eq!(message.id, 99);
        responder.await.expect("responder");
    }

    #[tokio::test]
    async fn missing_attachment_fails_before_any_request() {
        let (client, mut gateway) = testing::pair();
        let view = ChatView::new(client, 9, "Nine");

        let error = view
            .send_attachment(Path::new("/no/such/file.bin"), "")
            .await
            .expect_err("missing file");
        assert!(matches!(error, AttachmentError::Missing(_)));

        drop(view);
        assert!(gateway.next_request().await.is_none());
    }

    #[test]
    fn attachment_classification_follows_mime() {
        assert_eq!(
            classify_attachment(Path::new("photo.jpg")),
            AttachmentKind::Photo
        );
        assert_eq!(
            classify_attachment(Path::new("clip.mp4")),
            AttachmentKind::Video
        );
        assert_eq!(
            classify_attachment(Path::new("notes.pdf")),
            AttachmentKind::Document
        );
        assert_eq!(
            classify_attachment(Path::new("no-extension")),
            AttachmentKind::Document
        );
    }
}
