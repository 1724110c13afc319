use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::chats::ChatSummary;
use crate::dates;
use crate::protocol::{Chat, Message, MessageContent};

const PREVIEW_WIDTH: usize = 50;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListOutput {
    pub items: Vec<ChatListItem>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListItem {
    pub chat: Chat,
    pub last_message: Option<Message>,
    pub last_message_line: Option<String>,
    pub last_message_date: Option<String>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListOutput {
    pub chat_id: i64,
    pub chat_title: String,
    pub items: Vec<MessageRow>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub message: Message,
    pub preview: String,
    pub when: String,
}

pub fn build_chat_list(summaries: &[ChatSummary], now: DateTime<Utc>) -> ChatListOutput {
    let items = summaries
        .iter()
        .map(|summary| {
            let last_message_line = summary
                .last_message
                .as_ref()
                .map(|message| truncate_display(&content_preview(&message.content), PREVIEW_WIDTH));
            let last_message_date = summary
                .last_message
                .as_ref()
                .map(|message| dates::relative_date(message.date, now));
            ChatListItem {
                chat: summary.chat.clone(),
                last_message: summary.last_message.clone(),
                last_message_line,
                last_message_date,
            }
        })
        .collect();
    ChatListOutput { items }
}

pub fn build_message_list(
    chat_id: i64,
    chat_title: &str,
    messages: &[Message],
    now: DateTime<Utc>,
) -> MessageListOutput {
    let items = messages
        .iter()
        .map(|message| MessageRow {
            message: message.clone(),
            preview: content_preview(&message.content),
            when: dates::relative_date(message.date, now),
        })
        .collect();
    MessageListOutput {
        chat_id,
        chat_title: chat_title.to_string(),
        items,
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), OutputError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_chat_list(output: &ChatListOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }

    if output.items.is_empty() {
        println!("No chats yet.");
        return Ok(());
    }

    let mut name_width = display_width("name");
    let mut when_width = display_width("when");
    for item in &output.items {
        name_width = name_width.max(display_width(&item.chat.title));
        if let Some(when) = &item.last_message_date {
            when_width = when_width.max(display_width(when));
        }
    }
    name_width = name_width.min(28);
    when_width = when_width.min(10);

    println!(
        "{}  {}  {}  {}",
        pad_left("id", 12),
        pad_right("name", name_width),
        pad_right("when", when_width),
        pad_right("last message", PREVIEW_WIDTH),
    );
    for item in &output.items {
        let preview = item.last_message_line.as_deref().unwrap_or("<no messages>");
        let when = item.last_message_date.as_deref().unwrap_or("-");
        println!(
            "{}  {}  {}  {}",
            pad_left(&item.chat.id.to_string(), 12),
            pad_right(&truncate_display(&item.chat.title, name_width), name_width),
            pad_right(when, when_width),
            pad_right(&truncate_display(preview, PREVIEW_WIDTH), PREVIEW_WIDTH),
        );
    }
    Ok(())
}

pub fn print_messages(output: &MessageListOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }

    println!("Messages for {} ({})", output.chat_title, output.chat_id);
    if output.items.is_empty() {
        println!("No messages. Say something!");
        return Ok(());
    }

    let mut when_width = display_width("when");
    for item in &output.items {
        when_width = when_width.max(display_width(&item.when));
    }
    when_width = when_width.min(10);

    println!(
        "{}  {}  {}  {}",
        pad_left("id", 12),
        pad_right("when", when_width),
        pad_right("dir", 3),
        pad_right("text", 72),
    );
    for item in &output.items {
        println!(
            "{}  {}  {}  {}",
            pad_left(&item.message.id.to_string(), 12),
            pad_right(&item.when, when_width),
            pad_right(direction_marker(&item.message), 3),
            pad_right(&truncate_display(&item.preview, 72), 72),
        );
    }
    Ok(())
}

/// One-line rendering for the live view's appended messages.
pub fn message_line(message: &Message) -> String {
    format!(
        "[{}] {} {}",
        dates::clock_time(message.date),
        direction_marker(message),
        content_preview(&message.content)
    )
}

fn direction_marker(message: &Message) -> &'static str {
    if message.is_outgoing { "->" } else { "<-" }
}

/// Plain-text stand-in for each content variant, with captions appended.
pub fn content_preview(content: &MessageContent) -> String {
    match content {
        MessageContent::MessageText { text } => text.text.clone(),
        MessageContent::MessagePhoto { caption } => with_caption("[photo]", caption.text.as_str()),
        MessageContent::MessageVideo { caption } => with_caption("[video]", caption.text.as_str()),
        MessageContent::MessageDocument { document, caption } => {
            let label = if document.file_name.is_empty() {
                "[document]".to_string()
            } else {
                format!("[document: {}]", document.file_name)
            };
            with_caption(&label, caption.text.as_str())
        }
        MessageContent::MessageVoiceNote {} => "[voice note]".to_string(),
        MessageContent::MessageSticker {} => "[sticker]".to_string(),
        MessageContent::Other => "[unsupported message]".to_string(),
    }
}

fn with_caption(label: &str, caption: &str) -> String {
    if caption.is_empty() {
        label.to_string()
    } else {
        format!("{label} {caption}")
    }
}

fn display_width(value: &str) -> usize {
    UnicodeWidthStr::width(value)
}

fn truncate_display(value: &str, max_width: usize) -> String {
    if display_width(value) <= max_width {
        return value.to_string();
    }
    let ellipsis = "...";
    let mut width = 0usize;
    let mut output = String::new();
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + ellipsis.len() > max_width {
            break;
        }
        output.push(ch);
        width += ch_width;
    }
    output.push_str(ellipsis);
    output
}

fn pad_right(value: &str, width: usize) -> String {
    let mut output = value.to_string();
    let current = display_width(value);
    if current < width {
        output.push_str(&" ".repeat(width - current));
    }
    output
}

fn pad_left(value: &str, width: usize) -> String {
    let current = display_width(value);
    if current >= width {
        return value.to_string();
    }
    let mut output = " ".repeat(width - current);
    output.push_str(value);
    output
}
