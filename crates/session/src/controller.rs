//! Session controller: single-flight sends, lazy conversation creation,
//! persistence and lifecycle notifications.

use parking_lot::Mutex;
use providers::chat::ChatClient;
use providers::error::ProviderError;
use providers::search::SearchClient;
use shared::agent_api::{Attachment, StreamChunk};
use shared::events::UiEvent;
use shared::settings::AppSettings;
use std::sync::Arc;
use std::time::Duration;
use storage::secret::{API_KEY, SEARCH_KEY};
use storage::{ChatStore, KeyStore, DEFAULT_TITLE};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::emitter::ThrottledEmitter;
use crate::strategy::{GenerationStrategy, PlainChat, PromptContext, VisionChat, WebSearchChat};
use crate::title;

/// One user-initiated send.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub prompt: String,
    /// Absent for a fresh conversation; assigned lazily on first delta.
    pub conversation_id: Option<i64>,
    pub reasoning: bool,
    pub web_search: bool,
    pub attachments: Vec<Attachment>,
}

struct RequestHandle {
    id: Uuid,
    task: JoinHandle<()>,
}

type HandleSlot = Arc<Mutex<Option<RequestHandle>>>;

/// Owner of the single in-flight generation. All mutation of the handle
/// and of the lazily assigned conversation id happens through `send` and
/// `stop`; there is no ambient shared state.
pub struct Session {
    store: Arc<ChatStore>,
    keys: Arc<KeyStore>,
    settings: AppSettings,
    events: UnboundedSender<UiEvent>,
    current: HandleSlot,
}

impl Session {
    pub fn new(
        store: Arc<ChatStore>,
        keys: Arc<KeyStore>,
        settings: AppSettings,
        events: UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            store,
            keys,
            settings,
            events,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a generation. Abort-and-replace: any stream still in flight is
    /// cancelled first, so the newest send always wins.
    pub fn send(&mut self, req: SendRequest) {
        self.retire_in_flight();

        // Credentials are checked before any network attempt.
        let api_key = match self.keys.load_key(API_KEY) {
            Ok(Some(secret)) => secret,
            Ok(None) => return self.fail_early(&ProviderError::MissingKey.to_string()),
            Err(err) => return self.fail_early(&err.to_string()),
        };
        let wants_search = req.web_search && req.attachments.is_empty();
        let search_key = if wants_search {
            match self.keys.load_key(SEARCH_KEY) {
                Ok(Some(secret)) => Some(secret),
                Ok(None) => {
                    return self.fail_early("Search API key not found. Please set it in settings.")
                }
                Err(err) => return self.fail_early(&err.to_string()),
            }
        } else {
            None
        };

        let stored_content = user_record_content(&req.prompt, req.attachments.len());

        // Existing conversation: the user turn is persisted immediately and
        // a stale placeholder title gets a backfill pass. A new conversation
        // defers both until the stream is confirmed alive.
        if let Some(id) = req.conversation_id {
            if let Err(err) = self.store.insert_message(id, "user", &stored_content) {
                return self.fail_early(&err.to_string());
            }
            self.maybe_backfill_title(id, &req.prompt, api_key.expose());
        }

        let header_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let client = ChatClient::new(
            &self.settings.model.base_url,
            api_key.expose(),
            header_timeout,
        );

        let kind = pick_strategy(req.web_search, !req.attachments.is_empty());
        let strategy: Box<dyn GenerationStrategy> = match kind {
            StrategyKind::Vision => Box::new(VisionChat {
                client,
                settings: self.settings.clone(),
            }),
            StrategyKind::WebSearch => Box::new(WebSearchChat {
                client,
                search: SearchClient::new(
                    search_key
                        .as_ref()
                        .map(|s| s.expose())
                        .unwrap_or_default(),
                ),
                settings: self.settings.clone(),
            }),
            StrategyKind::Plain => Box::new(PlainChat {
                client,
                store: self.store.clone(),
                settings: self.settings.clone(),
                reasoning: req.reasoning,
            }),
        };

        let lazy = req.conversation_id.is_none().then(|| LazyCreation {
            user_content: stored_content,
            title_prompt: title_prompt(&req.prompt, !req.attachments.is_empty()),
        });

        let ctx = PromptContext {
            prompt: req.prompt,
            conversation_id: req.conversation_id,
            attachments: req.attachments,
        };

        let title_client = ChatClient::new(
            &self.settings.model.base_url,
            api_key.expose(),
            header_timeout,
        );
        let title_model = self.settings.model.title_model.clone();
        let title_store = self.store.clone();
        let title_events = self.events.clone();
        let title_spawner = move |conversation_id: i64, prompt: String| {
            title::spawn_title_task(
                title_client,
                title_model,
                title_store,
                title_events,
                conversation_id,
                prompt,
            );
        };

        let request_id = self.start(strategy, ctx, lazy, title_spawner);
        debug!(request = %request_id, strategy = ?kind, "send starting");
    }

    /// Cancel any prior request, then spawn and register a new one.
    fn start(
        &mut self,
        strategy: Box<dyn GenerationStrategy>,
        ctx: PromptContext,
        lazy: Option<LazyCreation>,
        title_spawner: impl FnOnce(i64, String) + Send + 'static,
    ) -> Uuid {
        self.retire_in_flight();

        let request_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = StreamPump {
            rx,
            emitter: ThrottledEmitter::new(
                self.events.clone(),
                Duration::from_millis(self.settings.throttle_ms),
            ),
            events: self.events.clone(),
            store: self.store.clone(),
            conversation_id: ctx.conversation_id,
            lazy,
        };

        let events = self.events.clone();
        let store = self.store.clone();
        let slot = self.current.clone();

        let task = tokio::spawn(async move {
            drive_generation(strategy, ctx, pump, tx, events, store, title_spawner).await;
            clear_slot(&slot, request_id);
        });

        *self.current.lock() = Some(RequestHandle {
            id: request_id,
            task,
        });
        request_id
    }

    /// Abort the in-flight request, if any. Buffered-but-unflushed emitter
    /// content dies with the task; cancellation is not a graceful
    /// end-of-stream.
    pub fn stop(&mut self) {
        self.retire_in_flight();
    }

    pub fn is_streaming(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    fn retire_in_flight(&mut self) {
        let handle = self.current.lock().take();
        if let Some(handle) = handle {
            // Aborting an already-completed task is a no-op.
            handle.task.abort();
            debug!(request = %handle.id, "in-flight request retired");
            let _ = self.events.send(UiEvent::StreamEnd);
        }
    }

    /// One app-error plus one forced stream-end; the session stays Idle.
    fn fail_early(&self, message: &str) {
        let _ = self.events.send(UiEvent::AppError(message.to_string()));
        let _ = self.events.send(UiEvent::StreamEnd);
    }

    /// Existing conversations keep their placeholder title until a send
    /// lands while the title is still the default or the thread is young.
    fn maybe_backfill_title(&self, conversation_id: i64, prompt: &str, api_key: &str) {
        if prompt.trim().is_empty() {
            return;
        }
        let stale = match (
            self.store.conversation_title(conversation_id),
            self.store.message_count(conversation_id),
        ) {
            (Ok(title), Ok(count)) => title.as_deref() == Some(DEFAULT_TITLE) || count <= 2,
            _ => false,
        };
        if !stale {
            return;
        }
        let client = ChatClient::new(
            &self.settings.model.base_url,
            api_key,
            Duration::from_secs(self.settings.connect_timeout_secs),
        );
        title::spawn_title_task(
            client,
            self.settings.model.title_model.clone(),
            self.store.clone(),
            self.events.clone(),
            conversation_id,
            prompt.to_string(),
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyKind {
    Plain,
    Vision,
    WebSearch,
}

/// Attachments take precedence over the web-search flag.
fn pick_strategy(web_search: bool, has_attachments: bool) -> StrategyKind {
    if has_attachments {
        StrategyKind::Vision
    } else if web_search {
        StrategyKind::WebSearch
    } else {
        StrategyKind::Plain
    }
}

/// What gets persisted for the user turn; attachment bytes are replaced by
/// a marker since blobs are not stored.
fn user_record_content(prompt: &str, attachment_count: usize) -> String {
    if attachment_count > 0 {
        format!("{prompt}\n\n[Attached {attachment_count} image(s)]")
    } else {
        prompt.to_string()
    }
}

/// Prompt handed to the title task when a conversation is lazily created.
fn title_prompt(prompt: &str, has_attachments: bool) -> Option<String> {
    let trimmed = prompt.trim();
    if !trimmed.is_empty() {
        Some(trimmed.to_string())
    } else if has_attachments {
        Some("Image Analysis".to_string())
    } else {
        None
    }
}

/// Deferred records for a conversation that does not exist yet.
pub(crate) struct LazyCreation {
    pub user_content: String,
    pub title_prompt: Option<String>,
}

pub(crate) struct StreamOutcome {
    pub conversation_id: Option<i64>,
    pub content: String,
}

/// Consumes the strategy's token channel: lazy creation on the first delta,
/// throttled content, passthrough search status, final flush.
pub(crate) struct StreamPump {
    pub rx: UnboundedReceiver<StreamChunk>,
    pub emitter: ThrottledEmitter,
    pub events: UnboundedSender<UiEvent>,
    pub store: Arc<ChatStore>,
    pub conversation_id: Option<i64>,
    pub lazy: Option<LazyCreation>,
}

impl StreamPump {
    pub async fn run(mut self, title_spawner: impl FnOnce(i64, String)) -> StreamOutcome {
        let mut title_spawner = Some(title_spawner);
        while let Some(chunk) = self.rx.recv().await {
            match chunk {
                StreamChunk::Reasoning(text) => {
                    self.on_first_delta(&mut title_spawner);
                    self.emitter.push_reasoning(&text);
                }
                StreamChunk::Content(text) => {
                    self.on_first_delta(&mut title_spawner);
                    self.emitter.push(&text);
                }
                StreamChunk::Search(status) => {
                    let _ = self.events.send(UiEvent::SearchUpdate(status));
                }
                StreamChunk::Done => break,
            }
        }
        self.emitter.finish();
        StreamOutcome {
            conversation_id: self.conversation_id,
            content: self.emitter.full_text().to_string(),
        }
    }

    /// The request is confirmed alive and responding: create the deferred
    /// conversation, persist the held-back user turn, notify the consumer
    /// and kick off titling, all before the delta reaches the emitter.
    fn on_first_delta(&mut self, title_spawner: &mut Option<impl FnOnce(i64, String)>) {
        let Some(lazy) = self.lazy.take() else {
            return;
        };
        match self.store.insert_conversation(DEFAULT_TITLE) {
            Ok(id) => {
                // The id is immutable for the rest of this send.
                self.conversation_id = Some(id);
                if let Err(err) = self.store.insert_message(id, "user", &lazy.user_content) {
                    warn!(conversation_id = id, error = %err, "failed to persist deferred user message");
                }
                let _ = self.events.send(UiEvent::ConversationCreated(id));
                if let (Some(spawner), Some(prompt)) = (title_spawner.take(), lazy.title_prompt) {
                    spawner(id, prompt);
                }
            }
            Err(err) => warn!(error = %err, "lazy conversation creation failed"),
        }
    }
}

/// Runs one send to completion: strategy and pump side by side, then
/// persistence of the assistant turn and exactly one stream-end.
pub(crate) async fn drive_generation(
    strategy: Box<dyn GenerationStrategy>,
    ctx: PromptContext,
    pump: StreamPump,
    tx: UnboundedSender<StreamChunk>,
    events: UnboundedSender<UiEvent>,
    store: Arc<ChatStore>,
    title_spawner: impl FnOnce(i64, String),
) {
    let (result, outcome) = tokio::join!(
        async {
            let result = strategy.generate(&ctx, &tx).await;
            // Close the channel so the pump drains and finishes.
            drop(tx);
            result
        },
        pump.run(title_spawner),
    );

    match result {
        Ok(()) => {
            if let Some(conversation_id) = outcome.conversation_id {
                if !outcome.content.is_empty() {
                    if let Err(err) =
                        store.insert_message(conversation_id, "assistant", &outcome.content)
                    {
                        warn!(conversation_id, error = %err, "failed to persist assistant message");
                    }
                }
            }
        }
        Err(err) => {
            let _ = events.send(UiEvent::AppError(err.to_string()));
        }
    }
    let _ = events.send(UiEvent::StreamEnd);
}

fn clear_slot(slot: &HandleSlot, id: Uuid) {
    let mut guard = slot.lock();
    if guard.as_ref().map(|h| h.id) == Some(id) {
        *guard = None;
    }
}
