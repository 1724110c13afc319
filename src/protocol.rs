//! Typed shapes of the runtime's `@type`-tagged JSON protocol.
//!
//! The runtime owns the protocol; these types only name the requests this
//! client issues and the slices of responses and updates it reads. Unknown
//! fields are ignored and unknown discriminators collapse into catch-all
//! variants so newer runtimes stay consumable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Request {
    GetAuthorizationState,
    SetTdlibParameters {
        parameters: TdlibParameters,
    },
    CheckDatabaseEncryptionKey {
        encryption_key: String,
    },
    SetAuthenticationPhoneNumber {
        phone_number: String,
        settings: PhoneNumberAuthenticationSettings,
    },
    CheckAuthenticationCode {
        code: String,
    },
    CheckAuthenticationPassword {
        password: String,
    },
    ResendAuthenticationCode,
    GetChats {
        offset_order: String,
        offset_chat_id: i64,
        limit: i32,
    },
    GetChat {
        chat_id: i64,
    },
    GetChatHistory {
        chat_id: i64,
        from_message_id: i64,
        offset: i32,
        limit: i32,
        only_local: bool,
    },
    UploadFile {
        file: InputFile,
        file_type: FileType,
        priority: i32,
    },
    SendMessage {
        chat_id: i64,
        input_message_content: InputMessageContent,
    },
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "@type", rename = "tdlibParameters")]
pub struct TdlibParameters {
    pub use_test_dc: bool,
    pub api_id: i32,
    pub api_hash: String,
    pub system_language_code: String,
    pub device_model: String,
    pub application_version: String,
    pub enable_storage_optimizer: bool,
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "@type", rename = "phoneNumberAuthenticationSettings")]
pub struct PhoneNumberAuthenticationSettings {
    pub allow_flash_call: bool,
    pub allow_missed_call: bool,
    pub is_current_phone_number: bool,
    pub allow_sms_retriever_api: bool,
}

impl Default for PhoneNumberAuthenticationSettings {
    fn default() -> Self {
        Self {
            allow_flash_call: false,
            allow_missed_call: false,
            is_current_phone_number: true,
            allow_sms_retriever_api: false,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum InputFile {
    InputFileLocal { path: String },
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum FileType {
    FileTypePhoto,
    FileTypeVideo,
    FileTypeDocument,
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum InputMessageContent {
    InputMessageText {
        text: FormattedText,
    },
    InputMessagePhoto {
        photo: InputFile,
        caption: FormattedText,
    },
    InputMessageVideo {
        video: InputFile,
        caption: FormattedText,
    },
    InputMessageDocument {
        document: InputFile,
        caption: FormattedText,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(tag = "@type", rename = "formattedText")]
pub struct FormattedText {
    #[serde(default)]
    pub text: String,
}

impl FormattedText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum AuthorizationState {
    AuthorizationStateWaitTdlibParameters,
    AuthorizationStateWaitEncryptionKey,
    AuthorizationStateWaitPhoneNumber,
    AuthorizationStateWaitCode {
        #[serde(default)]
        code_info: Option<Value>,
    },
    AuthorizationStateWaitPassword {
        #[serde(default)]
        password_hint: Option<String>,
    },
    AuthorizationStateReady,
    AuthorizationStateLoggingOut,
    AuthorizationStateClosing,
    AuthorizationStateClosed,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Update {
    UpdateAuthorizationState {
        authorization_state: AuthorizationState,
    },
    UpdateOption {
        name: String,
        #[serde(default)]
        value: Value,
    },
    UpdateNewMessage {
        message: Message,
    },
    UpdateChatLastMessage {
        chat_id: i64,
        #[serde(default)]
        last_message: Option<Message>,
    },
    UpdateChatReadInbox {
        chat_id: i64,
        #[serde(default)]
        last_read_inbox_message_id: i64,
        #[serde(default)]
        unread_count: i32,
    },
    #[serde(other)]
    Unknown,
}

/// Result of `getChats`: bare conversation identifiers in descending order
/// of the runtime's global order key.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Chats {
    pub chat_ids: Vec<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Chat {
    pub id: i64,
    pub title: String,
    pub photo: Option<ChatPhoto>,
    pub last_message: Option<Message>,
    pub unread_count: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ChatPhoto {
    pub small: Option<File>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Messages {
    pub messages: Vec<Message>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub is_outgoing: bool,
    pub date: i64,
    pub content: MessageContent,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageContent {
    MessageText {
        #[serde(default)]
        text: FormattedText,
    },
    MessagePhoto {
        #[serde(default)]
        caption: FormattedText,
    },
    MessageVideo {
        #[serde(default)]
        caption: FormattedText,
    },
    MessageDocument {
        #[serde(default)]
        document: DocumentInfo,
        #[serde(default)]
        caption: FormattedText,
    },
    MessageVoiceNote {},
    MessageSticker {},
    #[serde(other)]
    #[default]
    Other,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DocumentInfo {
    pub file_name: String,
}

/// Result of `uploadFile`: the server-side file handle referenced by the
/// follow-up `sendMessage`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct File {
    pub id: i32,
    pub local: LocalFile,
    pub remote: RemoteFile,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct LocalFile {
    pub path: String,
    pub is_uploading_completed: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct RemoteFile {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_carry_camel_case_discriminators() {
        let value = serde_json::to_value(Request::GetAuthorizationState).expect("serialize");
        assert_eq!(value, json!({ "@type": "getAuthorizationState" }));

        let value = serde_json::to_value(Request::GetChats {
            offset_order: i64::MAX.to_string(),
            offset_chat_id: 0,
            limit: 100,
        })
        .expect("serialize");
        assert_eq!(value["@type"], "getChats");
        assert_eq!(value["offset_order"], "9223372036854775807");
        assert_eq!(value["limit"], 100);
    }

    #[test]
    fn nested_content_is_tagged() {
        let request = Request::SendMessage {
            chat_id: 42,
            input_message_content: InputMessageContent::InputMessagePhoto {
                photo: InputFile::InputFileLocal {
                    path: "/tmp/cat.jpg".to_string(),
                },
                caption: FormattedText::plain("look"),
            },
        };
        let value = serde_json::to_value(&request).expect("serialize");
        let content = &value["input_message_content"];
        assert_eq!(content["@type"], "inputMessagePhoto");
        assert_eq!(content["photo"]["@type"], "inputFileLocal");
        assert_eq!(content["caption"]["@type"], "formattedText");
        assert_eq!(content["caption"]["text"], "look");
    }

    #[test]
    fn updates_deserialize_by_discriminator() {
        let update: Update = serde_json::from_value(json!({
            "@type": "updateNewMessage",
            "message": {
                "id": 7,
                "chat_id": 42,
                "is_outgoing": false,
                "date": 1700000000,
                "content": { "@type": "messageText", "text": { "@type": "formattedText", "text": "hi" } }
            }
        }))
        .expect("deserialize");

        match update {
            Update::UpdateNewMessage { message } => {
                assert_eq!(message.chat_id, 42);
                assert_eq!(
                    message.content,
                    MessageContent::MessageText {
                        text: FormattedText::plain("hi")
                    }
                );
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn unknown_updates_and_content_fall_through() {
        let update: Update =
            serde_json::from_value(json!({ "@type": "updateChatPosition", "chat_id": 1 }))
                .expect("deserialize");
        assert!(matches!(update, Update::Unknown));

        let message: Message = serde_json::from_value(json!({
            "id": 1,
            "chat_id": 1,
            "content": { "@type": "messageAnimation" }
        }))
        .expect("deserialize");
        assert_eq!(message.content, MessageContent::Other);
    }

    #[test]
    fn empty_object_decodes_to_defaults() {
        let chats: Chats = serde_json::from_value(json!({})).expect("deserialize");
        assert!(chats.chat_ids.is_empty());

        let messages: Messages = serde_json::from_value(json!({})).expect("deserialize");
        assert!(messages.messages.is_empty());
    }
}
