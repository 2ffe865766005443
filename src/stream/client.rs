//! `StreamClient`: the single entry point for live training data.
//!
//! Chooses between live connections and the demo generator from the injected
//! [`Settings`], exposes typed subscriptions, and owns the lifecycle
//! (`disconnect`, `reconfigure`).

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connection::{Channel, Connection, ConnectionState};
use super::demo::DemoGenerator;
use super::transport::{Connector, WsConnector};
use super::StreamError;
use crate::bus::{EventBus, StreamEvent, Subscription};
use crate::settings::{Settings, SettingsError};
use crate::types::{AgentTip, ChatMessage, TrainingMetrics};

pub const GREETING: &str = "Hello! I'm your AI training assistant. How can I help you today?";
pub const GREETING_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Live,
    Demo,
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMode::Live => write!(f, "live"),
            StreamMode::Demo => write!(f, "demo"),
        }
    }
}

#[derive(Clone)]
enum Backend {
    Live {
        training: Connection,
        agent: Connection,
    },
    Demo(Arc<DemoGenerator>),
}

impl Backend {
    fn build(
        settings: &Settings,
        connector: &Arc<dyn Connector>,
        bus: &Arc<EventBus>,
    ) -> Result<Self, SettingsError> {
        if settings.demo_mode {
            let demo = Arc::new(DemoGenerator::new(bus.clone()));
            demo.start();
            return Ok(Backend::Demo(demo));
        }
        Ok(Backend::Live {
            training: Connection::new(
                Channel::Training,
                settings.channel_url(Channel::Training)?,
                connector.clone(),
                bus.clone(),
            ),
            agent: Connection::new(
                Channel::Agent,
                settings.channel_url(Channel::Agent)?,
                connector.clone(),
                bus.clone(),
            ),
        })
    }

    fn mode(&self) -> StreamMode {
        match self {
            Backend::Live { .. } => StreamMode::Live,
            Backend::Demo(_) => StreamMode::Demo,
        }
    }

    fn shut_down(&self) {
        match self {
            Backend::Live { training, agent } => {
                training.close();
                agent.close();
            }
            Backend::Demo(demo) => demo.stop(),
        }
    }
}

struct Runtime {
    settings: Settings,
    backend: Backend,
    greeting: Option<JoinHandle<()>>,
    wants_training: bool,
    wants_agent: bool,
}

pub struct StreamClient {
    bus: Arc<EventBus>,
    connector: Arc<dyn Connector>,
    runtime: Mutex<Runtime>,
}

impl StreamClient {
    /// Build a client over real WebSockets. Must be called inside a tokio
    /// runtime: demo mode starts generating immediately.
    pub fn new(settings: Settings) -> Result<Self, SettingsError> {
        Self::with_connector(settings, Arc::new(WsConnector::default()))
    }

    pub fn with_connector(
        settings: Settings,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SettingsError> {
        let bus = Arc::new(EventBus::new());
        let backend = Backend::build(&settings, &connector, &bus)?;
        info!("stream client created in {} mode", backend.mode());
        let greeting = settings.greeting.then(|| spawn_greeting(bus.clone()));

        Ok(Self {
            bus,
            connector,
            runtime: Mutex::new(Runtime {
                settings,
                backend,
                greeting,
                wants_training: false,
                wants_agent: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn backend(&self) -> Backend {
        self.lock().backend.clone()
    }

    pub fn mode(&self) -> StreamMode {
        self.lock().backend.mode()
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// State of a live channel; `None` in demo mode.
    pub fn connection_state(&self, channel: Channel) -> Option<ConnectionState> {
        match self.backend() {
            Backend::Live { training, agent } => Some(match channel {
                Channel::Training => training.state(),
                Channel::Agent => agent.state(),
            }),
            Backend::Demo(_) => None,
        }
    }

    pub fn connect_training(&self) {
        let backend = {
            let mut runtime = self.lock();
            runtime.wants_training = true;
            runtime.backend.clone()
        };
        match backend {
            Backend::Live { training, .. } => training.connect(),
            Backend::Demo(_) => debug!("demo mode: training stream simulated"),
        }
    }

    pub fn connect_agent(&self) {
        let backend = {
            let mut runtime = self.lock();
            runtime.wants_agent = true;
            runtime.backend.clone()
        };
        match backend {
            Backend::Live { agent, .. } => agent.connect(),
            Backend::Demo(_) => debug!("demo mode: agent stream simulated"),
        }
    }

    /// Send user text to the assistant.
    pub fn send_chat_message(&self, text: &str) -> Result<(), StreamError> {
        self.send_chat(ChatMessage::user(text))
    }

    /// Send an already-built user message. In demo mode the echo carries the
    /// same id, so a transcript that appended it optimistically can skip it.
    pub fn send_chat(&self, message: ChatMessage) -> Result<(), StreamError> {
        match self.backend() {
            Backend::Live { agent, .. } => agent.send(&message.content),
            Backend::Demo(demo) => {
                demo.chat(message);
                Ok(())
            }
        }
    }

    pub fn on_training_metrics<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TrainingMetrics) + Send + Sync + 'static,
    {
        self.bus.on_metrics(handler)
    }

    pub fn on_agent_tip<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AgentTip) + Send + Sync + 'static,
    {
        self.bus.on_tip(handler)
    }

    pub fn on_chat_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.bus.on_chat(handler)
    }

    /// Close both channels, stop the demo generator and cancel every pending
    /// timer. Safe to call repeatedly, and before anything was connected.
    pub fn disconnect(&self) {
        let (backend, greeting) = {
            let mut runtime = self.lock();
            (runtime.backend.clone(), runtime.greeting.take())
        };
        if let Some(greeting) = greeting {
            greeting.abort();
        }
        backend.shut_down();
    }

    /// End of lifecycle; same as [`StreamClient::disconnect`].
    pub fn shutdown(&self) {
        self.disconnect();
        info!("stream client shut down");
    }

    /// Swap to new settings: tear down the current connections (or demo
    /// generator) and build fresh ones. Subscriptions are kept, and channels
    /// that had been connected are connected again.
    pub fn reconfigure(&self, settings: Settings) -> Result<(), SettingsError> {
        let backend = Backend::build(&settings, &self.connector, &self.bus)?;
        let (old, wants_training, wants_agent) = {
            let mut runtime = self.lock();
            let old = std::mem::replace(&mut runtime.backend, backend.clone());
            runtime.settings = settings;
            (old, runtime.wants_training, runtime.wants_agent)
        };
        old.shut_down();
        info!("stream client reconfigured to {} mode", backend.mode());

        if let Backend::Live { training, agent } = &backend {
            if wants_training {
                training.connect();
            }
            if wants_agent {
                agent.connect();
            }
        }
        Ok(())
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn spawn_greeting(bus: Arc<EventBus>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(GREETING_DELAY).await;
        bus.publish(&StreamEvent::Chat(ChatMessage::agent(GREETING)));
    })
}
