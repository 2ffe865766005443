//! Terminal front end: streams metrics, tips and chat to stdout and reads
//! commands from stdin.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use trainwatch_lib::api::{ApiError, ModelFormat, TrainingApi, TrainingBackend};
use trainwatch_lib::settings::{load_settings, Settings, SettingsStore};
use trainwatch_lib::stream::{Channel, StreamClient};
use trainwatch_lib::types::{Config, Sender};
use trainwatch_lib::{init_tracing, AppError, Dashboard, Subscription};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(30);

const HELP: &str = "\
commands:
  /start | /stop | /restart     control training
  /config                       show the current config
  /set key=value ...            edit and submit config (learningRate, batchSize,
                                epochs, optimizer, modelType, modelName)
  /datasets                     list datasets known to the backend
  /upload <file>                upload a dataset file
  /dataset <path>               register a dataset by server-side path
  /download [format] [dir]      save the model (pytorch, onnx, tensorflow)
  /demo on|off                  switch demo mode
  /url <base url>               change the backend URL
  /status                       connection and backend status
  /quit                         exit
anything else is sent to the assistant";

/// API handle that can be swapped when settings change, so the dashboard
/// keeps a single backend reference.
struct SwappableApi(RwLock<Arc<TrainingApi>>);

impl SwappableApi {
    fn new(api: TrainingApi) -> Self {
        Self(RwLock::new(Arc::new(api)))
    }

    fn current(&self) -> Arc<TrainingApi> {
        self.0.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn replace(&self, api: TrainingApi) {
        *self.0.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(api);
    }
}

#[async_trait]
impl TrainingBackend for SwappableApi {
    async fn start_training(&self) -> Result<Value, ApiError> {
        self.current().start_training().await
    }

    async fn stop_training(&self) -> Result<Value, ApiError> {
        self.current().stop_training().await
    }

    async fn restart_training(&self) -> Result<Value, ApiError> {
        self.current().restart_training().await
    }

    async fn get_config(&self) -> Result<Config, ApiError> {
        self.current().get_config().await
    }

    async fn update_config(&self, config: &Config) -> Result<Value, ApiError> {
        self.current().update_config(config).await
    }
}

struct App {
    store: SettingsStore,
    client: Arc<StreamClient>,
    api: Arc<SwappableApi>,
    dashboard: Dashboard,
    _subscriptions: Vec<Subscription>,
}

impl App {
    fn new(store: SettingsStore, settings: Settings) -> Result<Self, AppError> {
        let api = Arc::new(SwappableApi::new(TrainingApi::from_settings(&settings)?));
        let client = Arc::new(StreamClient::new(settings)?);
        let dashboard = Dashboard::new(client.clone(), api.clone());

        let subscriptions = vec![
            client.on_training_metrics(|m| {
                println!(
                    "[epoch {:>3}] accuracy {:.4}  loss {:.4}  {}",
                    m.epoch, m.accuracy, m.loss, m.status
                );
            }),
            client.on_agent_tip(|tip| {
                println!("[tip:{:?}] {}", tip.kind, tip.message);
            }),
            client.on_chat_message(|msg| {
                if msg.sender == Sender::Agent {
                    println!("assistant> {}", msg.content);
                }
            }),
        ];

        Ok(Self {
            store,
            client,
            api,
            dashboard,
            _subscriptions: subscriptions,
        })
    }

    fn apply_settings(&self, settings: Settings) -> Result<(), AppError> {
        self.api.replace(TrainingApi::from_settings(&settings)?);
        self.client.reconfigure(settings)?;
        Ok(())
    }

    /// Returns `false` when the user asked to quit.
    async fn handle_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }
        if !line.starts_with('/') {
            self.dashboard.send_chat_message(line);
            return true;
        }

        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let result = match command {
            "/quit" | "/exit" => return false,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/start" => {
                self.dashboard.start_training().await;
                Ok(())
            }
            "/stop" => {
                self.dashboard.stop_training().await;
                Ok(())
            }
            "/restart" => {
                self.dashboard.restart_training().await;
                Ok(())
            }
            "/config" => self.show_config(),
            "/set" => self.set_config(&args).await,
            "/datasets" => self.list_datasets().await,
            "/upload" => self.upload(&args).await,
            "/dataset" => self.register_path(&args).await,
            "/download" => self.download(&args).await,
            "/demo" => self.toggle_demo(&args),
            "/url" => self.change_url(&args),
            "/status" => {
                self.status().await;
                Ok(())
            }
            other => Err(AppError::Other(format!("unknown command {other}; try /help"))),
        };

        if let Err(e) = result {
            println!("error: {e}");
        }
        true
    }

    fn show_config(&self) -> Result<(), AppError> {
        let config = self.dashboard.config();
        let rendered = serde_json::to_string_pretty(&config)
            .map_err(|e| AppError::Other(e.to_string()))?;
        println!("{rendered}");
        Ok(())
    }

    async fn set_config(&self, args: &[&str]) -> Result<(), AppError> {
        if args.is_empty() {
            return Err(AppError::Other("usage: /set key=value ...".to_string()));
        }
        self.dashboard.open_config_editor();
        let mut problem = None;
        self.dashboard.stage_config(|config| {
            for arg in args {
                if let Err(e) = apply_assignment(config, arg) {
                    problem = Some(e);
                    return;
                }
            }
        });
        if let Some(e) = problem {
            self.dashboard.cancel_config_edit();
            return Err(AppError::Other(e));
        }
        if self.dashboard.submit_config().await {
            println!("config updated");
        } else {
            println!("config update rejected; current config kept");
            self.dashboard.cancel_config_edit();
        }
        Ok(())
    }

    async fn list_datasets(&self) -> Result<(), AppError> {
        let datasets = self.api.current().available_datasets().await?;
        if datasets.is_empty() {
            println!("no datasets");
        }
        for dataset in datasets {
            println!("{:<24} {:<8} {}", dataset.name, dataset.kind.as_str(), dataset.path);
        }
        Ok(())
    }

    async fn upload(&self, args: &[&str]) -> Result<(), AppError> {
        let path = args
            .first()
            .ok_or_else(|| AppError::Other("usage: /upload <file>".to_string()))?;
        let dataset = self.api.current().upload_dataset(PathBuf::from(path).as_path()).await?;
        println!("uploaded {} ({}) to {}", dataset.name, dataset.kind.as_str(), dataset.path);
        Ok(())
    }

    async fn register_path(&self, args: &[&str]) -> Result<(), AppError> {
        let path = args
            .first()
            .ok_or_else(|| AppError::Other("usage: /dataset <path>".to_string()))?;
        let api = self.api.current();
        let dataset = api.upload_dataset_path(path).await?;
        let location = api.register_dataset_location(&dataset).await?;
        println!("dataset {} registered at {location}", dataset.name);
        Ok(())
    }

    async fn download(&self, args: &[&str]) -> Result<(), AppError> {
        let format = match args.first() {
            Some(raw) => ModelFormat::parse(raw)
                .ok_or_else(|| AppError::Other(format!("unknown model format {raw}")))?,
            None => ModelFormat::default(),
        };
        let dir = args.get(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        let config = self.dashboard.config();
        let saved = self.api.current().save_model(format, &config, &dir).await?;
        println!("model saved to {}", saved.display());
        Ok(())
    }

    fn toggle_demo(&self, args: &[&str]) -> Result<(), AppError> {
        let enabled = match args.first().copied() {
            Some("on") => true,
            Some("off") => false,
            _ => return Err(AppError::Other("usage: /demo on|off".to_string())),
        };
        let settings = self.store.set_demo_mode(enabled)?;
        self.apply_settings(settings)?;
        println!("now in {} mode", self.client.mode());
        Ok(())
    }

    fn change_url(&self, args: &[&str]) -> Result<(), AppError> {
        let url = args
            .first()
            .ok_or_else(|| AppError::Other("usage: /url <base url>".to_string()))?;
        let settings = self.store.set_api_base_url(url)?;
        self.apply_settings(settings)?;
        println!("backend set to {url}");
        Ok(())
    }

    async fn status(&self) {
        println!("mode: {}", self.client.mode());
        for channel in [Channel::Training, Channel::Agent] {
            match self.client.connection_state(channel) {
                Some(state) => println!("{channel}: {state:?}"),
                None => println!("{channel}: simulated"),
            }
        }
        let snapshot = self.dashboard.snapshot();
        if let Some(metrics) = snapshot.metrics {
            println!("latest: epoch {} ({})", metrics.epoch, metrics.status);
        }
        println!(
            "history: {} points, tips: {}, chat: {} messages",
            snapshot.metrics_history.len(),
            snapshot.agent_tips.len(),
            snapshot.chat_messages.len()
        );
        let healthy = self.api.current().check_health().await;
        println!("backend health: {}", if healthy { "ok" } else { "unreachable" });
    }
}

fn apply_assignment(config: &mut Config, assignment: &str) -> Result<(), String> {
    let (key, value) = assignment
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {assignment}"))?;
    match key {
        "learningRate" => {
            config.learning_rate = value
                .parse()
                .map_err(|e| format!("invalid value for {key}: {e}"))?
        }
        "batchSize" => {
            config.batch_size = value
                .parse()
                .map_err(|e| format!("invalid value for {key}: {e}"))?
        }
        "epochs" => {
            config.epochs = value
                .parse()
                .map_err(|e| format!("invalid value for {key}: {e}"))?
        }
        "optimizer" => config.optimizer = value.to_string(),
        "modelType" => config.model_type = value.to_string(),
        "modelName" => config.model_name = value.to_string(),
        other => return Err(format!("unknown config key {other}")),
    }
    Ok(())
}

fn spawn_health_poll(api: Arc<SwappableApi>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_POLL_INTERVAL);
        let mut last: Option<bool> = None;
        loop {
            interval.tick().await;
            let current = api.current();
            if current.is_demo_mode() {
                continue;
            }
            let healthy = current.check_health().await;
            if last != Some(healthy) {
                if healthy {
                    tracing::info!("backend at {} is reachable", current.base_url());
                } else {
                    tracing::warn!("backend at {} is unreachable", current.base_url());
                }
                last = Some(healthy);
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing();

    let store = SettingsStore::in_data_dir();
    let settings = load_settings(&store);
    tracing::info!(
        "trainwatch starting against {} (demo: {})",
        settings.api_base_url,
        settings.demo_mode
    );

    let app = App::new(store, settings)?;
    app.dashboard.start().await;
    let health = spawn_health_poll(app.api.clone());

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !app.handle_line(&line).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("failed to read stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    health.abort();
    app.dashboard.stop();
    app.client.shutdown();
    Ok(())
}
