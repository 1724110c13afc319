//! Client handles over the messaging runtime.
//!
//! A connected handle talks to the gateway through a background session task
//! that owns the websocket: requests are correlated by an `@extra` id,
//! unsolicited frames are decoded as updates and fanned out over a broadcast
//! channel. When the runtime cannot be loaded the factory hands out a
//! degraded handle with the same surface, so callers never branch on load
//! failure; they just see empty data and silent subscriptions.

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::Config;
use crate::loader::{self, WsStream};
use crate::protocol::{
    AuthorizationState, Chat, Chats, File, FileType, InputFile, InputMessageContent, Message,
    Messages, PhoneNumberAuthenticationSettings, Request, TdlibParameters, Update,
};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("gateway connection closed")]
    Disconnected,
    #[error("{friendly}")]
    Rpc {
        code: i64,
        message: String,
        friendly: String,
    },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Construct a client for the configured runtime. Infallible: any loader or
/// connect failure degrades to the no-op handle instead of propagating.
pub async fn create_client(config: &Config) -> ClientHandle {
    match connect_session(config).await {
        Ok(handle) => handle,
        Err(error) => {
            tracing::warn!(%error, "runtime unavailable, continuing with a degraded client");
            ClientHandle::degraded()
        }
    }
}

async fn connect_session(config: &Config) -> Result<ClientHandle, loader::LoaderError> {
    if let Some(ws) = loader::probe_gateway(&config.gateway_url).await {
        return Ok(ClientHandle::spawn_session(ws));
    }

    let http = reqwest::Client::new();
    let gateway = loader::ensure_runtime(&http, config).await?;
    loader::start_gateway(config, &gateway)?;
    let ws = loader::await_gateway(&config.gateway_url).await?;
    Ok(ClientHandle::spawn_session(ws))
}

pub(crate) struct Envelope {
    pub(crate) request: Request,
    pub(crate) reply: oneshot::Sender<Result<Value, ClientError>>,
}

#[derive(Clone)]
pub struct ClientHandle {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Connected {
        requests: mpsc::UnboundedSender<Envelope>,
        updates: broadcast::Sender<Update>,
    },
    /// Holds the broadcast sender so subscriptions stay open but silent.
    Degraded { updates: broadcast::Sender<Update> },
}

impl ClientHandle {
    fn spawn_session(ws: WsStream) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        tokio::spawn(run_session(ws, requests_rx, updates_tx.clone()));
        Self {
            inner: Inner::Connected {
                requests: requests_tx,
                updates: updates_tx,
            },
        }
    }

    pub fn degraded() -> Self {
        let (updates_tx, _) = broadcast::channel(1);
        Self {
            inner: Inner::Degraded {
                updates: updates_tx,
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.inner, Inner::Degraded { .. })
    }

    /// Issue one request and await its response object. The degraded handle
    /// resolves every request with an empty object.
    pub async fn send_raw(&self, request: Request) -> Result<Value, ClientError> {
        match &self.inner {
            Inner::Connected { requests, .. } => {
                let (reply_tx, reply_rx) = oneshot::channel();
                requests
                    .send(Envelope {
                        request,
                        reply: reply_tx,
                    })
                    .map_err(|_| ClientError::Disconnected)?;
                reply_rx.await.map_err(|_| ClientError::Disconnected)?
            }
            Inner::Degraded { .. } => Ok(Value::Object(Default::default())),
        }
    }

    pub fn subscribe(&self) -> UpdateStream {
        let receiver = match &self.inner {
            Inner::Connected { updates, .. } => updates.subscribe(),
            Inner::Degraded { updates } => updates.subscribe(),
        };
        UpdateStream { receiver }
    }

    async fn call<T: DeserializeOwned>(&self, request: Request) -> Result<T, ClientError> {
        let value = self.send_raw(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn ack(&self, request: Request) -> Result<(), ClientError> {
        self.send_raw(request).await.map(drop)
    }

    pub async fn get_authorization_state(&self) -> Result<AuthorizationState, ClientError> {
        self.call(Request::GetAuthorizationState).await
    }

    pub async fn set_tdlib_parameters(
        &self,
        parameters: TdlibParameters,
    ) -> Result<(), ClientError> {
        self.ack(Request::SetTdlibParameters { parameters }).await
    }

    pub async fn check_database_encryption_key(&self, key: &str) -> Result<(), ClientError> {
        self.ack(Request::CheckDatabaseEncryptionKey {
            encryption_key: key.to_string(),
        })
        .await
    }

    pub async fn set_authentication_phone_number(&self, phone: &str) -> Result<(), ClientError> {
        self.ack(Request::SetAuthenticationPhoneNumber {
            phone_number: phone.to_string(),
            settings: PhoneNumberAuthenticationSettings::default(),
        })
        .await
    }

    pub async fn check_authentication_code(&self, code: &str) -> Result<(), ClientError> {
        self.ack(Request::CheckAuthenticationCode {
            code: code.to_string(),
        })
        .await
    }

    pub async fn check_authentication_password(&self, password: &str) -> Result<(), ClientError> {
        self.ack(Request::CheckAuthenticationPassword {
            password: password.to_string(),
        })
        .await
    }

    pub async fn resend_authentication_code(&self) -> Result<(), ClientError> {
        self.ack(Request::ResendAuthenticationCode).await
    }

    pub async fn get_chats(&self, limit: i32) -> Result<Chats, ClientError> {
        self.call(Request::GetChats {
            offset_order: i64::MAX.to_string(),
            offset_chat_id: 0,
            limit,
        })
        .await
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<Chat, ClientError> {
        self.call(Request::GetChat { chat_id }).await
    }

    pub async fn get_chat_history(
        &self,
        chat_id: i64,
        limit: i32,
    ) -> Result<Messages, ClientError> {
        self.call(Request::GetChatHistory {
            chat_id,
            from_message_id: 0,
            offset: 0,
            limit,
            only_local: false,
        })
        .await
    }

    pub async fn upload_file(&self, path: &str, file_type: FileType) -> Result<File, ClientError> {
        self.call(Request::UploadFile {
            file: InputFile::InputFileLocal {
                path: path.to_string(),
            },
            file_type,
            priority: 1,
        })
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        content: InputMessageContent,
    ) -> Result<Message, ClientError> {
        self.call(Request::SendMessage {
            chat_id,
            input_message_content: content,
        })
        .await
    }
}

pub struct UpdateStream {
    receiver: broadcast::Receiver<Update>,
}

impl UpdateStream {
    /// Next pushed update; `None` once the session has ended. A lagging
    /// receiver skips the overwritten backlog and keeps going.
    pub async fn recv(&mut self) -> Option<Update> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "update stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

async fn run_session(
    mut ws: WsStream,
    mut requests: mpsc::UnboundedReceiver<Envelope>,
    updates: broadcast::Sender<Update>,
) {
    let mut pending: HashMap<u64, oneshot::Sender<Result<Value, ClientError>>> = HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            envelope = requests.recv() => {
                let Some(Envelope { request, reply }) = envelope else {
                    break;
                };
                next_id += 1;
                let mut value = match serde_json::to_value(&request) {
                    Ok(value) => value,
                    Err(error) => {
                        let _ = reply.send(Err(ClientError::Decode(error)));
                        continue;
                    }
                };
                value["@extra"] = json!(next_id);
                if let Err(error) = ws.send(WsMessage::Text(value.to_string())).await {
                    tracing::warn!(%error, "gateway send failed");
                    let _ = reply.send(Err(ClientError::Disconnected));
                    break;
                }
                pending.insert(next_id, reply);
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Value>(&text) {
                        Ok(value) => dispatch(value, &mut pending, &updates),
                        Err(error) => tracing::warn!(%error, "undecodable gateway frame"),
                    },
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ClientError::Disconnected));
    }
}

/// Route one gateway frame: `@extra` frames resolve their pending request,
/// everything else is broadcast as an update.
fn dispatch(
    mut value: Value,
    pending: &mut HashMap<u64, oneshot::Sender<Result<Value, ClientError>>>,
    updates: &broadcast::Sender<Update>,
) {
    if let Some(extra) = value.get("@extra").and_then(Value::as_u64) {
        if let Some(map) = value.as_object_mut() {
            map.remove("@extra");
        }
        let Some(reply) = pending.remove(&extra) else {
            return;
        };
        let result = if value.get("@type").and_then(Value::as_str) == Some("error") {
            let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let friendly = friendly_rpc_error(code, &message);
            Err(ClientError::Rpc {
                code,
                message,
                friendly,
            })
        } else {
            Ok(value)
        };
        let _ = reply.send(result);
        return;
    }

    match serde_json::from_value::<Update>(value) {
        Ok(update) => {
            let _ = updates.send(update);
        }
        Err(error) => tracing::debug!(%error, "unrecognized gateway push"),
    }
}

fn friendly_rpc_error(code: i64, message: &str) -> String {
    let label = match message {
        "PHONE_NUMBER_INVALID" => "Invalid phone number",
        "PHONE_CODE_INVALID" | "PHONE_CODE_EXPIRED" => "Invalid code",
        "PASSWORD_HASH_INVALID" => "Invalid password",
        "API_ID_INVALID" => "Invalid application credentials",
        _ if code == 401 => "Not authenticated",
        _ if code == 429 => "Rate limited",
        _ => "Request failed",
    };

    let mut formatted = String::from(label);
    if !message.is_empty() && !message.eq_ignore_ascii_case(label) {
        formatted.push_str(": ");
        formatted.push_str(message);
    }
    if code != 0 {
        formatted.push_str(&format!(" (code {code})"));
    }
    formatted
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process stand-in for the gateway session, driven by tests.

    use super::*;

    pub(crate) struct FakeGateway {
        requests: mpsc::UnboundedReceiver<Envelope>,
        updates: broadcast::Sender<Update>,
    }

    pub(crate) fn pair() -> (ClientHandle, FakeGateway) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let handle = ClientHandle {
            inner: Inner::Connected {
                requests: requests_tx,
                updates: updates_tx.clone(),
            },
        };
        let gateway = FakeGateway {
            requests: requests_rx,
            updates: updates_tx,
        };
        (handle, gateway)
    }

    /// A handle whose every request resolves with an RPC error.
    pub(crate) fn rejecting(message: &'static str) -> ClientHandle {
        let (handle, mut gateway) = pair();
        tokio::spawn(async move {
            while let Some((_, reply)) = gateway.next_request().await {
                let _ = reply.send(Err(ClientError::Rpc {
                    code: 400,
                    message: message.to_string(),
                    friendly: friendly_rpc_error(400, message),
                }));
            }
        });
        handle
    }

    impl FakeGateway {
        /// Receive the next request as its serialized JSON shape plus the
        /// reply slot.
        pub(crate) async fn next_request(
            &mut self,
        ) -> Option<(Value, oneshot::Sender<Result<Value, ClientError>>)> {
            let envelope = self.requests.recv().await?;
            let value =
                serde_json::to_value(&envelope.request).expect("requests always serialize");
            Some((value, envelope.reply))
        }

        pub(crate) fn push(&self, update: Update) {
            let _ = self.updates.send(update);
        }

        pub(crate) fn push_raw(&self, value: Value) {
            let update = serde_json::from_value(value).expect("test update shape");
            let _ = self.updates.send(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn degraded_handle_resolves_empty_objects() {
        let handle = ClientHandle::degraded();
        assert!(handle.is_degraded());

        let value = handle
            .send_raw(Request::GetAuthorizationState)
            .await
            .expect("degraded send resolves");
        assert_eq!(value, serde_json::json!({}));

        let chats = handle.get_chats(100).await.expect("empty chats decode");
        assert!(chats.chat_ids.is_empty());

        let history = handle
            .get_chat_history(1, 50)
            .await
            .expect("empty history decode");
        assert!(history.messages.is_empty());
    }

    #[tokio::test]
    async fn degraded_authorization_state_is_an_error_not_a_hang() {
        let handle = ClientHandle::degraded();
        assert!(handle.get_authorization_state().await.is_err());
    }

    #[tokio::test]
    async fn requests_resolve_against_their_replies() {
        let (handle, mut gateway) = testing::pair();
        let responder = tokio::spawn(async move {
            let (value, reply) = gateway.next_request().await.expect("one request");
            assert_eq!(value["@type"], "getChats");
            let _ = reply.send(Ok(serde_json::json!({ "chat_ids": [3, 1, 2] })));
        });

        let chats = handle.get_chats(100).await.expect("chats");
        assert_eq!(chats.chat_ids, vec![3, 1, 2]);
        responder.await.expect("responder");
    }

    #[tokio::test]
    async fn rpc_errors_surface_with_friendly_labels() {
        let handle = testing::rejecting("PHONE_NUMBER_INVALID");
        let error = handle
            .set_authentication_phone_number("oops")
            .await
            .expect_err("rejected");
        let rendered = error.to_string();
        assert!(rendered.contains("Invalid phone number"), "{rendered}");
    }

    #[test]
    fn error_frames_resolve_pending_requests() {
        let mut pending = HashMap::new();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        pending.insert(7u64, reply_tx);
        let (updates, _) = broadcast::channel(4);

        dispatch(
            serde_json::json!({
                "@type": "error",
                "code": 400,
                "message": "PHONE_CODE_INVALID",
                "@extra": 7
            }),
            &mut pending,
            &updates,
        );

        let result = reply_rx.try_recv().expect("resolved");
        match result {
            Err(ClientError::Rpc { code, message, .. }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "PHONE_CODE_INVALID");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn untagged_frames_broadcast_as_updates() {
        let mut pending = HashMap::new();
        let (updates, mut receiver) = broadcast::channel(4);

        dispatch(
            serde_json::json!({
                "@type": "updateChatReadInbox",
                "chat_id": 42,
                "last_read_inbox_message_id": 9,
                "unread_count": 0
            }),
            &mut pending,
            &updates,
        );

        match receiver.try_recv().expect("broadcast") {
            Update::UpdateChatReadInbox { chat_id, .. } => assert_eq!(chat_id, 42),
            other => panic!("unexpected update: {other:?}"),
        }
    }
}
