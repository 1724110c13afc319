mod auth;
mod chats;
mod client;
mod config;
mod dates;
mod loader;
mod messages;
mod output;
mod protocol;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dialoguer::Select;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::auth::{ensure_ready, AuthFlow, TerminalPrompter};
use crate::chats::ChatList;
use crate::client::{create_client, ClientHandle};
use crate::config::Config;
use crate::messages::ChatView;
use crate::protocol::AuthorizationState;

#[derive(Parser)]
#[command(
    name = "tgterm",
    version,
    about = "Terminal Telegram client over the TDLib gateway runtime",
    after_help = "Examples:\n  tgterm auth login\n  tgterm chats list\n  tgterm chats list --watch\n  tgterm messages list --chat-id 123456\n  tgterm messages send --chat-id 123456 --text \"hello\"\n  tgterm messages send --chat-id 123456 --attach ./photo.jpg --text \"FYI\"\n  tgterm open"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, help = "Output JSON instead of a table")]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Sign in and check session state")]
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    #[command(about = "List chats")]
    Chats {
        #[command(subcommand)]
        command: ChatsCommand,
    },
    #[command(about = "Read and send messages")]
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },
    #[command(about = "Interactive chat session")]
    Open(OpenArgs),
}

#[derive(Subcommand)]
enum AuthCommand {
    #[command(about = "Sign in with a phone number and confirmation code")]
    Login(AuthLoginArgs),
    #[command(about = "Show the current authorization state")]
    Status,
}

#[derive(Args)]
struct AuthLoginArgs {
    #[arg(long, help = "Phone number to start the sign-in with")]
    phone: Option<String>,
}

#[derive(Subcommand)]
enum ChatsCommand {
    #[command(about = "List chats with their most recent message")]
    List(ChatsListArgs),
}

#[derive(Args)]
struct ChatsListArgs {
    #[arg(long, help = "Maximum number of chats to show")]
    limit: Option<usize>,

    #[arg(long, help = "Keep the list on screen and re-render on updates")]
    watch: bool,
}

#[derive(Subcommand)]
enum MessagesCommand {
    #[command(about = "List recent messages in a chat")]
    List(MessagesListArgs),
    #[command(about = "Send a text message or an attachment")]
    Send(MessagesSendArgs),
}

#[derive(Args)]
struct MessagesListArgs {
    #[arg(long, help = "Chat id")]
    chat_id: i64,

    #[arg(long, help = "Maximum number of messages to show")]
    limit: Option<usize>,
}

#[derive(Args)]
struct MessagesSendArgs {
    #[arg(long, help = "Chat id")]
    chat_id: i64,

    #[arg(long, help = "Message text (used as caption for attachments)")]
    text: Option<String>,

    #[arg(long, value_name = "PATH", help = "File to upload and send")]
    attach: Option<PathBuf>,
}

#[derive(Args)]
struct OpenArgs {
    #[arg(long, help = "Open this chat directly instead of picking one")]
    chat_id: Option<i64>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(error) = run().await {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Command::Auth { command } => match command {
            AuthCommand::Login(args) => {
                let client = create_client(&config).await;
                AuthFlow::new(&client, &config.credentials)
                    .with_phone(args.phone)
                    .run(&mut TerminalPrompter)
                    .await?;
            }
            AuthCommand::Status => {
                let client = create_client(&config).await;
                if client.is_degraded() {
                    println!("runtime unavailable (degraded client)");
                } else {
                    let state = client.get_authorization_state().await?;
                    println!("{}", state_label(&state));
                }
            }
        },
        Command::Chats { command } => match command {
            ChatsCommand::List(args) => {
                let client = create_client(&config).await;
                if !client.is_degraded() {
                    ensure_ready(&client, &config.credentials).await?;
                }
                if args.watch {
                    watch_chat_list(&client, args.limit, cli.json).await?;
                } else {
                    let mut list = ChatList::new(client.clone());
                    list.refresh().await?;
                    print_chat_list(&list, args.limit, cli.json)?;
                }
            }
        },
        Command::Messages { command } => match command {
            MessagesCommand::List(args) => {
                let client = create_client(&config).await;
                if !client.is_degraded() {
                    ensure_ready(&client, &config.credentials).await?;
                }
                let title = chat_title(&client, args.chat_id).await;
                let mut view = ChatView::new(client.clone(), args.chat_id, title);
                view.load_history().await?;
                let shown = match args.limit {
                    Some(limit) if view.messages().len() > limit => {
                        &view.messages()[view.messages().len() - limit..]
                    }
                    _ => view.messages(),
                };
                let output = output::build_message_list(
                    view.chat_id(),
                    view.title(),
                    shown,
                    chrono::Utc::now(),
                );
                output::print_messages(&output, cli.json)?;
            }
            MessagesCommand::Send(args) => {
                if args.text.is_none() && args.attach.is_none() {
                    return Err("Provide --text, --attach, or both".into());
                }
                let client = create_client(&config).await;
                if !client.is_degraded() {
                    ensure_ready(&client, &config.credentials).await?;
                }
                let view = ChatView::new(client.clone(), args.chat_id, "");
                if let Some(path) = args.attach {
                    view.send_attachment(&path, args.text.as_deref().unwrap_or(""))
                        .await?;
                } else if let Some(text) = args.text {
                    view.send_text(text.trim()).await?;
                }
                if !cli.json {
                    println!("Sent.");
                }
            }
        },
        Command::Open(args) => {
            let client = create_client(&config).await;
            if !client.is_degraded() {
                ensure_ready(&client, &config.credentials).await?;
            }
            run_open(&client, args.chat_id).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,tgterm=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_chat_list(
    list: &ChatList,
    limit: Option<usize>,
    json: bool,
) -> Result<(), output::OutputError> {
    let chats = list.chats();
    let shown = match limit {
        Some(limit) if chats.len() > limit => &chats[..limit],
        _ => chats,
    };
    let output = output::build_chat_list(shown, chrono::Utc::now());
    output::print_chat_list(&output, json)
}

/// Re-render the chat list on every notification that invalidates it.
async fn watch_chat_list(
    client: &ClientHandle,
    limit: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut updates = client.subscribe();
    let mut list = ChatList::new(client.clone());
    list.refresh().await?;
    print_chat_list(&list, limit, json)?;

    while let Some(update) = updates.recv().await {
        if !ChatList::is_refresh_trigger(&update) {
            continue;
        }
        list.refresh().await?;
        println!();
        print_chat_list(&list, limit, json)?;
    }
    Ok(())
}

async fn run_open(
    client: &ClientHandle,
    preselected: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(chat_id) = preselected {
        let title = chat_title(client, chat_id).await;
        run_chat_session(client, chat_id, &title).await?;
        return Ok(());
    }

    let mut list = ChatList::new(client.clone());
    loop {
        list.refresh().await?;
        if list.chats().is_empty() {
            println!("No chats yet.");
            return Ok(());
        }

        let labels: Vec<String> = list
            .chats()
            .iter()
            .map(|summary| {
                let preview = summary
                    .last_message
                    .as_ref()
                    .map(|message| output::content_preview(&message.content))
                    .unwrap_or_else(|| "<no messages>".to_string());
                format!("{}  ({})", summary.chat.title, preview)
            })
            .collect();

        let selection = Select::new()
            .with_prompt("Pick a chat (esc to quit)")
            .items(&labels)
            .default(0)
            .interact_opt()?;
        let Some(selection) = selection else {
            return Ok(());
        };

        let summary = &list.chats()[selection];
        let title = summary.chat.title.clone();
        match run_chat_session(client, summary.chat.id, &title).await? {
            SessionEnd::Back => continue,
            SessionEnd::Quit => return Ok(()),
        }
    }
}

enum SessionEnd {
    Back,
    Quit,
}

/// Live view of one conversation: prints history, tails updates, and reads
/// outgoing lines from stdin. `/attach <path> [caption]`, `/back`, `/quit`.
async fn run_chat_session(
    client: &ClientHandle,
    chat_id: i64,
    title: &str,
) -> Result<SessionEnd, Box<dyn std::error::Error>> {
    // Subscribe before fetching history; the view de-duplicates the overlap.
    let mut updates = client.subscribe();
    let mut view = ChatView::new(client.clone(), chat_id, title);
    view.load_history().await?;

    println!("-- {title} --");
    if view.messages().is_empty() {
        println!("No messages. Say something!");
    } else {
        for message in view.messages() {
            println!("{}", output::message_line(message));
        }
    }
    println!("Type a message. /attach <path> [caption], /back, /quit.");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            maybe_line = lines.next_line() => {
                let Some(line) = maybe_line? else {
                    return Ok(SessionEnd::Quit);
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed {
                    "/back" => return Ok(SessionEnd::Back),
                    "/quit" => return Ok(SessionEnd::Quit),
                    _ => {}
                }
                if let Some(rest) = trimmed.strip_prefix("/attach ") {
                    let mut parts = rest.trim().splitn(2, char::is_whitespace);
                    let Some(path) = parts.next().filter(|path| !path.is_empty()) else {
                        eprintln!("Usage: /attach <path> [caption]");
                        continue;
                    };
                    let caption = parts.next().unwrap_or("").trim();
                    if let Err(error) = view
                        .send_attachment(std::path::Path::new(path), caption)
                        .await
                    {
                        eprintln!("Couldn't send that: {error}");
                    }
                } else if let Err(error) = view.send_text(trimmed).await {
                    eprintln!("Couldn't send that: {error}");
                }
            }
            update = updates.recv() => {
                match update {
                    Some(update) => {
                        if let Some(message) = view.apply_update(&update) {
                            println!("{}", output::message_line(message));
                        }
                    }
                    None => {
                        eprintln!("Update stream ended.");
                        return Ok(SessionEnd::Quit);
                    }
                }
            }
        }
    }
}

async fn chat_title(client: &ClientHandle, chat_id: i64) -> String {
    match client.get_chat(chat_id).await {
        Ok(chat) if !chat.title.is_empty() => chat.title,
        Ok(_) => format!("chat {chat_id}"),
        Err(error) => {
            tracing::warn!(chat_id, %error, "chat metadata fetch failed");
            format!("chat {chat_id}")
        }
    }
}

fn state_label(state: &AuthorizationState) -> &'static str {
    match state {
        AuthorizationState::AuthorizationStateWaitTdlibParameters
        | AuthorizationState::AuthorizationStateWaitEncryptionKey
        | AuthorizationState::Unknown => "initializing",
        AuthorizationState::AuthorizationStateWaitPhoneNumber => "awaiting phone number",
        AuthorizationState::AuthorizationStateWaitCode { .. } => "awaiting confirmation code",
        AuthorizationState::AuthorizationStateWaitPassword { .. } => "awaiting 2FA password",
        AuthorizationState::AuthorizationStateReady => "ready",
        AuthorizationState::AuthorizationStateLoggingOut => "logging out",
        AuthorizationState::AuthorizationStateClosing => "closing",
        AuthorizationState::AuthorizationStateClosed => "closed",
    }
}
