//! Line-oriented front end over the session controller. Reads prompts from
//! stdin, renders the event stream to stdout, and keeps track of which
//! conversation the next send targets.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use session::{SendRequest, Session};
use shared::agent_api::Attachment;
use shared::events::{SearchPhase, UiEvent};
use shared::settings::AppSettings;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use storage::secret::{API_KEY, SEARCH_KEY};
use storage::{ChatStore, KeyStore, PlaintextCodec};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let data_dir = ChatStore::default_data_dir();
    let store = Arc::new(ChatStore::open(&data_dir)?);
    let keys = Arc::new(KeyStore::new(store.clone(), Box::new(PlaintextCodec)));
    let settings = AppSettings::default();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    // The renderer learns the id of a lazily created conversation before the
    // REPL does, so the two share the slot.
    let current: Arc<Mutex<Option<i64>>> = Arc::new(Mutex::new(None));
    tokio::spawn(render_events(events_rx, current.clone()));

    let mut session = Session::new(store.clone(), keys.clone(), settings, events_tx);

    println!("arkline - type a message, /help for commands");
    print_prompt();

    let mut lines = stdin_lines();
    let mut reasoning = false;
    let mut web_search = false;
    let mut attachments: Vec<Attachment> = Vec::new();

    while let Some(line) = lines.recv().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            print_prompt();
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.splitn(2, ' ');
            let cmd = parts.next().unwrap_or_default();
            let arg = parts.next().unwrap_or("").trim();
            match cmd {
                "quit" | "exit" => break,
                "help" => print_help(),
                "new" => {
                    session.stop();
                    *current.lock() = None;
                    println!("starting a new conversation");
                }
                "stop" => session.stop(),
                "reason" => {
                    reasoning = !reasoning;
                    println!("reasoning {}", if reasoning { "on" } else { "off" });
                }
                "web" => {
                    web_search = !web_search;
                    println!("web search {}", if web_search { "on" } else { "off" });
                }
                "key" => save_key(&keys, API_KEY, arg),
                "searchkey" => save_key(&keys, SEARCH_KEY, arg),
                "keys" => match keys.keys_status() {
                    Ok((api, search)) => {
                        println!("api key: {}", if api { "set" } else { "missing" });
                        println!("search key: {}", if search { "set" } else { "missing" });
                    }
                    Err(err) => eprintln!("error: {err}"),
                },
                "attach" => attach_image(&mut attachments, arg),
                "list" => list_conversations(&store),
                "open" => open_conversation(&store, &current, arg),
                "delete" => delete_conversation(&store, &current, arg),
                _ => println!("unknown command: /{cmd}"),
            }
            print_prompt();
            continue;
        }

        session.send(SendRequest {
            prompt: line,
            conversation_id: *current.lock(),
            reasoning,
            web_search,
            attachments: std::mem::take(&mut attachments),
        });
    }

    Ok(())
}

/// Blocking stdin reads stay off the runtime.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn render_events(mut rx: mpsc::UnboundedReceiver<UiEvent>, current: Arc<Mutex<Option<i64>>>) {
    let mut in_reasoning = false;
    while let Some(event) = rx.recv().await {
        match event {
            UiEvent::StreamReasoning(text) => {
                if !in_reasoning {
                    print!("[thinking] ");
                    in_reasoning = true;
                }
                print!("{text}");
            }
            UiEvent::StreamChunk(text) => {
                if in_reasoning {
                    println!();
                    in_reasoning = false;
                }
                print!("{text}");
            }
            UiEvent::SearchUpdate(status) => match status.phase {
                SearchPhase::Searching => println!("searching the web..."),
                SearchPhase::Done => println!(
                    "found {} result(s)",
                    status.results.map(|r| r.len()).unwrap_or(0)
                ),
            },
            UiEvent::StreamEnd => {
                in_reasoning = false;
                println!();
                print_prompt();
            }
            UiEvent::ConversationCreated(id) => {
                *current.lock() = Some(id);
                info!(conversation_id = id, "conversation created");
            }
            UiEvent::TitleUpdated => info!("conversation title updated"),
            UiEvent::AppError(message) => eprintln!("\nerror: {message}"),
        }
        let _ = std::io::stdout().flush();
    }
}

fn print_prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn print_help() {
    println!("  /new              start a new conversation");
    println!("  /stop             cancel the in-flight response");
    println!("  /reason           toggle chain-of-thought reasoning");
    println!("  /web              toggle web search");
    println!("  /attach <path>    attach an image to the next message");
    println!("  /key <value>      save the chat API key");
    println!("  /searchkey <value> save the search API key");
    println!("  /keys             show which keys are set");
    println!("  /list             list conversations");
    println!("  /open <id>        switch to a conversation");
    println!("  /delete <id>      delete a conversation");
    println!("  /quit             exit");
}

fn save_key(keys: &KeyStore, name: &str, value: &str) {
    if value.is_empty() {
        println!("usage: /{} <value>", if name == API_KEY { "key" } else { "searchkey" });
        return;
    }
    match keys.save_key(name, value) {
        Ok(()) => println!("saved"),
        Err(err) => eprintln!("error: {err}"),
    }
}

fn attach_image(attachments: &mut Vec<Attachment>, path: &str) {
    if path.is_empty() {
        println!("usage: /attach <path>");
        return;
    }
    let path = Path::new(path);
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => {
            println!("unsupported image type");
            return;
        }
    };
    match std::fs::read(path) {
        Ok(bytes) => {
            attachments.push(Attachment {
                data_uri: format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
            });
            println!("attached ({} pending)", attachments.len());
        }
        Err(err) => eprintln!("error: {err}"),
    }
}

fn list_conversations(store: &ChatStore) {
    match store.list_conversations() {
        Ok(conversations) if conversations.is_empty() => println!("no conversations yet"),
        Ok(conversations) => {
            for c in conversations {
                println!("{:>5}  {}  {}", c.id, c.created_at, c.title);
            }
        }
        Err(err) => eprintln!("error: {err}"),
    }
}

fn open_conversation(store: &ChatStore, current: &Mutex<Option<i64>>, arg: &str) {
    let Ok(id) = arg.parse::<i64>() else {
        println!("usage: /open <id>");
        return;
    };
    match store.conversation_title(id) {
        Ok(Some(title)) => {
            *current.lock() = Some(id);
            println!("opened \"{title}\"");
        }
        Ok(None) => println!("no conversation with id {id}"),
        Err(err) => eprintln!("error: {err}"),
    }
}

fn delete_conversation(store: &ChatStore, current: &Mutex<Option<i64>>, arg: &str) {
    let Ok(id) = arg.parse::<i64>() else {
        println!("usage: /delete <id>");
        return;
    };
    match store.delete_conversation(id) {
        Ok(()) => {
            let mut slot = current.lock();
            if *slot == Some(id) {
                *slot = None;
            }
            println!("deleted");
        }
        Err(err) => eprintln!("error: {err}"),
    }
}
