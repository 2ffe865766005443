//! Dashboard state: the consumer side of the stream client.
//!
//! Keeps the latest metrics, a rolling window of 100 for charting, the tip
//! log (newest first), the chat transcript and the current training config,
//! and forwards user actions to the request/reply API.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::api::TrainingBackend;
use crate::bus::Subscription;
use crate::stream::StreamClient;
use crate::types::{AgentTip, ChatMessage, Config, TrainingMetrics};

/// Data points kept for charting.
pub const METRICS_HISTORY_CAPACITY: usize = 100;

/// Everything the rendering layer reads.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSnapshot {
    pub config: Config,
    /// Staged edits; only becomes `config` after the backend accepts it.
    pub config_draft: Option<Config>,
    pub metrics: Option<TrainingMetrics>,
    pub metrics_history: Vec<TrainingMetrics>,
    pub agent_tips: Vec<AgentTip>,
    pub chat_messages: Vec<ChatMessage>,
    pub is_chat_open: bool,
    pub is_config_open: bool,
    pub is_sidebar_collapsed: bool,
}

struct State {
    config: Config,
    config_draft: Option<Config>,
    /// Bumped whenever `config` is replaced.
    config_revision: u64,
    metrics: Option<TrainingMetrics>,
    history: VecDeque<TrainingMetrics>,
    tips: VecDeque<AgentTip>,
    chat: Vec<ChatMessage>,
    /// Ids of messages sent from here whose echo has not come back yet.
    pending_echoes: HashSet<String>,
    chat_open: bool,
    config_open: bool,
    sidebar_collapsed: bool,
}

impl State {
    fn new() -> Self {
        Self {
            config: Config::default(),
            config_draft: None,
            config_revision: 0,
            metrics: None,
            history: VecDeque::with_capacity(METRICS_HISTORY_CAPACITY),
            tips: VecDeque::new(),
            chat: Vec::new(),
            pending_echoes: HashSet::new(),
            chat_open: true,
            config_open: false,
            sidebar_collapsed: false,
        }
    }

    fn record_metrics(&mut self, metrics: &TrainingMetrics) {
        self.metrics = Some(metrics.clone());
        if self.history.len() == METRICS_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(metrics.clone());
    }

    fn record_tip(&mut self, tip: &AgentTip) {
        self.tips.push_front(tip.clone());
    }

    /// Append an outgoing message; its echo will be skipped once.
    fn record_sent(&mut self, message: &ChatMessage) {
        self.pending_echoes.insert(message.id.clone());
        self.chat.push(message.clone());
    }

    /// Append an incoming message unless it echoes one sent from here.
    fn record_chat(&mut self, message: &ChatMessage) -> bool {
        if self.pending_echoes.remove(&message.id) {
            return false;
        }
        self.chat.push(message.clone());
        true
    }

    fn replace_config(&mut self, config: Config) {
        self.config = config;
        self.config_revision += 1;
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Dashboard {
    client: Arc<StreamClient>,
    backend: Arc<dyn TrainingBackend>,
    state: Arc<Mutex<State>>,
    subscriptions: Vec<Subscription>,
}

impl Dashboard {
    /// Subscribe to the client's streams. Nothing is connected yet; call
    /// [`Dashboard::start`].
    pub fn new(client: Arc<StreamClient>, backend: Arc<dyn TrainingBackend>) -> Self {
        let state = Arc::new(Mutex::new(State::new()));

        let metrics_state = state.clone();
        let tips_state = state.clone();
        let chat_state = state.clone();
        let subscriptions = vec![
            client.on_training_metrics(move |metrics| lock(&metrics_state).record_metrics(metrics)),
            client.on_agent_tip(move |tip| lock(&tips_state).record_tip(tip)),
            client.on_chat_message(move |message| {
                if !lock(&chat_state).record_chat(message) {
                    debug!("skipping echo of chat message {}", message.id);
                }
            }),
        ];

        Self {
            client,
            backend,
            state,
            subscriptions,
        }
    }

    /// Connect both channels and refresh the config once.
    pub async fn start(&self) {
        self.client.connect_training();
        self.client.connect_agent();
        self.refresh_config().await;
    }

    /// Unsubscribe from the streams and disconnect the client.
    pub fn stop(&self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.client.disconnect();
    }

    pub fn client(&self) -> &Arc<StreamClient> {
        &self.client
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let state = lock(&self.state);
        DashboardSnapshot {
            config: state.config.clone(),
            config_draft: state.config_draft.clone(),
            metrics: state.metrics.clone(),
            metrics_history: state.history.iter().cloned().collect(),
            agent_tips: state.tips.iter().cloned().collect(),
            chat_messages: state.chat.clone(),
            is_chat_open: state.chat_open,
            is_config_open: state.config_open,
            is_sidebar_collapsed: state.sidebar_collapsed,
        }
    }

    pub fn config(&self) -> Config {
        lock(&self.state).config.clone()
    }

    pub fn metrics(&self) -> Option<TrainingMetrics> {
        lock(&self.state).metrics.clone()
    }

    pub fn metrics_history(&self) -> Vec<TrainingMetrics> {
        lock(&self.state).history.iter().cloned().collect()
    }

    pub fn agent_tips(&self) -> Vec<AgentTip> {
        lock(&self.state).tips.iter().cloned().collect()
    }

    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        lock(&self.state).chat.clone()
    }

    // ---------------------------------------------------------------------
    // Request/reply actions
    // ---------------------------------------------------------------------

    /// Replace the default config with the backend's, unless the config was
    /// changed locally while the fetch was in flight.
    pub async fn refresh_config(&self) {
        let revision = lock(&self.state).config_revision;
        match self.backend.get_config().await {
            Ok(config) => {
                let mut state = lock(&self.state);
                if state.config_revision == revision {
                    state.replace_config(config);
                } else {
                    debug!("config changed during fetch; keeping local value");
                }
            }
            Err(e) => error!("failed to fetch config: {e}"),
        }
    }

    pub async fn start_training(&self) {
        match self.backend.start_training().await {
            Ok(_) => info!("training started"),
            Err(e) => error!("failed to start training: {e}"),
        }
    }

    pub async fn stop_training(&self) {
        match self.backend.stop_training().await {
            Ok(_) => info!("training stopped"),
            Err(e) => error!("failed to stop training: {e}"),
        }
    }

    pub async fn restart_training(&self) {
        match self.backend.restart_training().await {
            Ok(_) => info!("training restarted"),
            Err(e) => error!("failed to restart training: {e}"),
        }
    }

    /// Send `new_config` to the backend. Only on success does it become the
    /// current config (and the editor closes). Returns whether it was applied.
    pub async fn update_config(&self, new_config: Config) -> bool {
        match self.backend.update_config(&new_config).await {
            Ok(_) => {
                let mut state = lock(&self.state);
                state.replace_config(new_config);
                state.config_draft = None;
                state.config_open = false;
                info!("config updated");
                true
            }
            Err(e) => {
                error!("failed to update config: {e}");
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Config editor
    // ---------------------------------------------------------------------

    /// Open the editor with a draft copied from the current config.
    pub fn open_config_editor(&self) {
        let mut state = lock(&self.state);
        state.config_draft = Some(state.config.clone());
        state.config_open = true;
    }

    /// Apply an edit to the draft. Returns `false` when no editor is open.
    pub fn stage_config(&self, edit: impl FnOnce(&mut Config)) -> bool {
        let mut state = lock(&self.state);
        match state.config_draft.as_mut() {
            Some(draft) => {
                edit(draft);
                true
            }
            None => false,
        }
    }

    /// Submit the staged draft through [`Dashboard::update_config`].
    pub async fn submit_config(&self) -> bool {
        let draft = lock(&self.state).config_draft.clone();
        match draft {
            Some(draft) => self.update_config(draft).await,
            None => {
                warn!("no staged config to submit");
                false
            }
        }
    }

    pub fn cancel_config_edit(&self) {
        let mut state = lock(&self.state);
        state.config_draft = None;
        state.config_open = false;
    }

    // ---------------------------------------------------------------------
    // Chat
    // ---------------------------------------------------------------------

    /// Append the user's message to the transcript right away, then hand it
    /// to the stream client. A failed send is logged; the message stays.
    pub fn send_chat_message(&self, text: &str) -> ChatMessage {
        let message = ChatMessage::user(text);
        lock(&self.state).record_sent(&message);

        if let Err(e) = self.client.send_chat(message.clone()) {
            warn!("chat message not delivered: {e}");
        }
        message
    }

    // ---------------------------------------------------------------------
    // View toggles
    // ---------------------------------------------------------------------

    pub fn toggle_chat(&self) -> bool {
        let mut state = lock(&self.state);
        state.chat_open = !state.chat_open;
        state.chat_open
    }

    pub fn toggle_config(&self) -> bool {
        let mut state = lock(&self.state);
        state.config_open = !state.config_open;
        state.config_open
    }

    pub fn toggle_sidebar(&self) -> bool {
        let mut state = lock(&self.state);
        state.sidebar_collapsed = !state.sidebar_collapsed;
        state.sidebar_collapsed
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
