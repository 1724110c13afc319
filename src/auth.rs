//! Sign-in flow driven by the runtime's authorization-state notifications.
//!
//! The flow never advances a phase on its own: it reacts to the state the
//! runtime reports, answers the silent preamble phases with the configured
//! credentials, and asks a prompter for whatever the interactive phases
//! need. The prompter seam keeps the machine runnable against a scripted
//! gateway in tests and against dialoguer on a real terminal.

use std::time::Duration;

use dialoguer::{Input, Password};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::client::{ClientError, ClientHandle, UpdateStream};
use crate::config::Credentials;
use crate::protocol::{AuthorizationState, TdlibParameters, Update};

pub const RESEND_DELAY: Duration = Duration::from_secs(30);

const PHONE_RETRY_MESSAGE: &str =
    "That phone number didn't go through. Check the format and try again.";
const CODE_RETRY_MESSAGE: &str = "That code didn't match. Try again.";
const PASSWORD_RETRY_MESSAGE: &str = "That password didn't match. Try again.";
const RESEND_FAILED_MESSAGE: &str = "Couldn't request a new code. Try again later.";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("update stream ended before authorization completed")]
    UpdatesClosed,
    #[error("the session is closing; start over to sign in again")]
    Closed,
    #[error("not signed in: run `tgterm auth login` first")]
    NotAuthorized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthPhase {
    Uninitialized,
    AwaitingPhone,
    AwaitingCode,
    AwaitingPassword,
    Ready,
    Closing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeEntry {
    Code(String),
    Resend,
}

/// Interaction surface of the sign-in flow. One implementation prompts a
/// terminal; tests script another.
pub trait AuthPrompter {
    fn phase_changed(&mut self, phase: AuthPhase);
    fn prompt_phone(&mut self, previous: Option<&str>) -> Result<String, AuthError>;
    fn prompt_code(
        &mut self,
        previous: Option<&str>,
        destination: Option<&str>,
    ) -> Result<CodeEntry, AuthError>;
    fn prompt_password(&mut self, hint: Option<&str>) -> Result<String, AuthError>;
    fn notify_error(&mut self, message: &str);
    fn notify(&mut self, message: &str);
}

pub struct AuthFlow<'a> {
    client: &'a ClientHandle,
    credentials: &'a Credentials,
    phase: AuthPhase,
    last_phone: Option<String>,
    last_code: Option<String>,
    code_info: Option<Value>,
    resend_ready_at: Option<Instant>,
}

impl<'a> AuthFlow<'a> {
    pub fn new(client: &'a ClientHandle, credentials: &'a Credentials) -> Self {
        Self {
            client,
            credentials,
            phase: AuthPhase::Uninitialized,
            last_phone: None,
            last_code: None,
            code_info: None,
            resend_ready_at: None,
        }
    }

    /// Seed the phone prompt, e.g. from a `--phone` flag.
    pub fn with_phone(mut self, phone: Option<String>) -> Self {
        self.last_phone = phone.filter(|phone| !phone.trim().is_empty());
        self
    }

    /// Drive the flow until the runtime reports `ready`. Returns exactly
    /// once on success; the caller keeps using the same handle afterwards.
    pub async fn run(mut self, prompter: &mut dyn AuthPrompter) -> Result<(), AuthError> {
        let mut updates = self.client.subscribe();
        let mut state = self.client.get_authorization_state().await?;

        loop {
            let phase = phase_of(&state);
            if phase != self.phase {
                self.phase = phase;
                if phase == AuthPhase::AwaitingCode {
                    self.resend_ready_at = Some(Instant::now() + RESEND_DELAY);
                }
                prompter.phase_changed(phase);
            }

            match state.clone() {
                AuthorizationState::AuthorizationStateWaitTdlibParameters => {
                    self.client
                        .set_tdlib_parameters(self.tdlib_parameters())
                        .await?;
                    state = self.next_state(&mut updates).await?;
                }
                AuthorizationState::AuthorizationStateWaitEncryptionKey => {
                    self.client.check_database_encryption_key("").await?;
                    state = self.next_state(&mut updates).await?;
                }
                AuthorizationState::AuthorizationStateWaitPhoneNumber => {
                    let phone = prompter.prompt_phone(self.last_phone.as_deref())?;
                    match self
                        .client
                        .set_authentication_phone_number(phone.trim())
                        .await
                    {
                        Ok(()) => {
                            self.last_phone = Some(phone);
                            state = self.next_state(&mut updates).await?;
                        }
                        Err(ClientError::Rpc { .. }) => {
                            self.last_phone = Some(phone);
                            prompter.notify_error(PHONE_RETRY_MESSAGE);
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
                AuthorizationState::AuthorizationStateWaitCode { code_info } => {
                    let info = code_info.or_else(|| self.code_info.clone());
                    let destination = info.as_ref().and_then(code_destination);
                    match prompter
                        .prompt_code(self.last_code.as_deref(), destination.as_deref())?
                    {
                        CodeEntry::Code(code) => {
                            match self.client.check_authentication_code(code.trim()).await {
                                Ok(()) => {
                                    self.last_code = Some(code);
                                    state = self.next_state(&mut updates).await?;
                                }
                                Err(ClientError::Rpc { .. }) => {
                                    self.last_code = Some(code);
                                    prompter.notify_error(CODE_RETRY_MESSAGE);
                                }
                                Err(error) => return Err(error.into()),
                            }
                        }
                        CodeEntry::Resend => match self.try_resend().await {
                            Ok(()) => {
                                self.last_code = None;
                                prompter.notify("A new code is on its way.");
                            }
                            Err(ResendRefusal::NotYet(seconds)) => {
                                prompter.notify_error(&format!(
                                    "You can request a new code in {seconds}s."
                                ));
                            }
                            Err(ResendRefusal::Rejected) => {
                                prompter.notify_error(RESEND_FAILED_MESSAGE);
                            }
                            Err(ResendRefusal::Fatal(error)) => return Err(error.into()),
                        },
                    }
                }
                AuthorizationState::AuthorizationStateWaitPassword { password_hint } => {
                    let password = prompter.prompt_password(password_hint.as_deref())?;
                    match self.client.check_authentication_password(&password).await {
                        Ok(()) => {
                            state = self.next_state(&mut updates).await?;
                        }
                        Err(ClientError::Rpc { .. }) => {
                            prompter.notify_error(PASSWORD_RETRY_MESSAGE);
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
                AuthorizationState::AuthorizationStateReady => return Ok(()),
                AuthorizationState::AuthorizationStateLoggingOut
                | AuthorizationState::AuthorizationStateClosing
                | AuthorizationState::AuthorizationStateClosed => {
                    return Err(AuthError::Closed);
                }
                AuthorizationState::Unknown => {
                    state = self.next_state(&mut updates).await?;
                }
            }
        }
    }

    async fn try_resend(&mut self) -> Result<(), ResendRefusal> {
        let now = Instant::now();
        if let Some(ready_at) = self.resend_ready_at {
            if now < ready_at {
                let seconds = (ready_at - now).as_secs().max(1);
                return Err(ResendRefusal::NotYet(seconds));
            }
        }
        match self.client.resend_authentication_code().await {
            Ok(()) => {
                self.resend_ready_at = Some(Instant::now() + RESEND_DELAY);
                Ok(())
            }
            Err(ClientError::Rpc { .. }) => Err(ResendRefusal::Rejected),
            Err(error) => Err(ResendRefusal::Fatal(error)),
        }
    }

    async fn next_state(
        &mut self,
        updates: &mut UpdateStream,
    ) -> Result<AuthorizationState, AuthError> {
        loop {
            match updates.recv().await {
                Some(Update::UpdateAuthorizationState {
                    authorization_state,
                }) => return Ok(authorization_state),
                Some(Update::UpdateOption { name, value })
                    if name == "authentication_code_info" =>
                {
                    self.code_info = Some(value);
                }
                Some(_) => {}
                None => return Err(AuthError::UpdatesClosed),
            }
        }
    }

    fn tdlib_parameters(&self) -> TdlibParameters {
        let device_model = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "Terminal".to_string());
        TdlibParameters {
            use_test_dc: false,
            api_id: self.credentials.api_id,
            api_hash: self.credentials.api_hash.clone(),
            system_language_code: "en".to_string(),
            device_model,
            application_version: env!("CARGO_PKG_VERSION").to_string(),
            enable_storage_optimizer: true,
        }
    }
}

enum ResendRefusal {
    NotYet(u64),
    Rejected,
    Fatal(ClientError),
}

fn phase_of(state: &AuthorizationState) -> AuthPhase {
    match state {
        AuthorizationState::AuthorizationStateWaitTdlibParameters
        | AuthorizationState::AuthorizationStateWaitEncryptionKey
        | AuthorizationState::Unknown => AuthPhase::Uninitialized,
        AuthorizationState::AuthorizationStateWaitPhoneNumber => AuthPhase::AwaitingPhone,
        AuthorizationState::AuthorizationStateWaitCode { .. } => AuthPhase::AwaitingCode,
        AuthorizationState::AuthorizationStateWaitPassword { .. } => AuthPhase::AwaitingPassword,
        AuthorizationState::AuthorizationStateReady => AuthPhase::Ready,
        AuthorizationState::AuthorizationStateLoggingOut
        | AuthorizationState::AuthorizationStateClosing
        | AuthorizationState::AuthorizationStateClosed => AuthPhase::Closing,
    }
}

/// Where the runtime says the current code was delivered, for the prompt.
fn code_destination(info: &Value) -> Option<String> {
    let kind = info.get("type")?.get("@type")?.as_str()?;
    let label = match kind {
        "authenticationCodeTypeSms" => "SMS",
        "authenticationCodeTypeCall" => "phone call",
        "authenticationCodeTypeTelegramMessage" => "Telegram app",
        _ => return None,
    };
    Some(label.to_string())
}

/// Terminal prompter over dialoguer, used by `auth login`.
pub struct TerminalPrompter;

impl AuthPrompter for TerminalPrompter {
    fn phase_changed(&mut self, phase: AuthPhase) {
        match phase {
            AuthPhase::Uninitialized => {}
            AuthPhase::AwaitingPhone => println!("Sign in to Telegram."),
            AuthPhase::AwaitingCode => println!("A sign-in code has been sent."),
            AuthPhase::AwaitingPassword => {
                println!("Two-factor authentication is enabled.")
            }
            AuthPhase::Ready => println!("Signed in."),
            AuthPhase::Closing => println!("The session is closing."),
        }
    }

    fn prompt_phone(&mut self, previous: Option<&str>) -> Result<String, AuthError> {
        let mut input = Input::new().with_prompt("Phone (E.164, e.g. +79001234567)");
        if let Some(previous) = previous {
            input = input.with_initial_text(previous);
        }
        Ok(input.interact_text()?)
    }

    fn prompt_code(
        &mut self,
        previous: Option<&str>,
        destination: Option<&str>,
    ) -> Result<CodeEntry, AuthError> {
        let prompt = match destination {
            Some(destination) => format!("Code from {destination} (or 'resend')"),
            None => "Code (or 'resend')".to_string(),
        };
        let mut input = Input::new().with_prompt(prompt);
        if let Some(previous) = previous {
            input = input.with_initial_text(previous);
        }
        let entry: String = input.interact_text()?;
        if entry.trim().eq_ignore_ascii_case("resend") {
            Ok(CodeEntry::Resend)
        } else {
            Ok(CodeEntry::Code(entry))
        }
    }

    fn prompt_password(&mut self, hint: Option<&str>) -> Result<String, AuthError> {
        let prompt = match hint {
            Some(hint) => format!("Password (hint: {hint})"),
            None => "Password".to_string(),
        };
        Ok(Password::new().with_prompt(prompt).interact()?)
    }

    fn notify_error(&mut self, message: &str) {
        eprintln!("{message}");
    }

    fn notify(&mut self, message: &str) {
        println!("{message}");
    }
}

/// Prompter for non-interactive commands: any phase that would need input
/// aborts with a sign-in hint instead of prompting.
pub struct NonInteractivePrompter;

impl AuthPrompter for NonInteractivePrompter {
    fn phase_changed(&mut self, _phase: AuthPhase) {}

    fn prompt_phone(&mut self, _previous: Option<&str>) -> Result<String, AuthError> {
        Err(AuthError::NotAuthorized)
    }

    fn prompt_code(
        &mut self,
        _previous: Option<&str>,
        _destination: Option<&str>,
    ) -> Result<CodeEntry, AuthError> {
        Err(AuthError::NotAuthorized)
    }

    fn prompt_password(&mut self, _hint: Option<&str>) -> Result<String, AuthError> {
        Err(AuthError::NotAuthorized)
    }

    fn notify_error(&mut self, _message: &str) {}

    fn notify(&mut self, _message: &str) {}
}

/// Run the silent part of the flow for commands that assume an existing
/// session. Fails with the sign-in hint if the runtime would need input.
pub async fn ensure_ready(
    client: &ClientHandle,
    credentials: &Credentials,
) -> Result<(), AuthError> {
    AuthFlow::new(client, credentials)
        .run(&mut NonInteractivePrompter)
        .await
}
