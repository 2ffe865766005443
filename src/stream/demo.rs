//! Synthetic training run used when no backend is configured.
//!
//! Emits one metrics event per second (after a short warm-up) for epochs
//! 1..=100, a tip every tenth epoch, and answers chat with a canned reply.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::{EventBus, StreamEvent};
use crate::types::{
    new_id, now_timestamp, AgentTip, ChatMessage, TipKind, TrainingMetrics, TrainingStatus,
};

pub const DEMO_MAX_EPOCHS: u32 = 100;
pub const DEMO_TIP_INTERVAL: u32 = 10;
pub const DEMO_START_DELAY: Duration = Duration::from_secs(2);
pub const DEMO_TICK: Duration = Duration::from_secs(1);
pub const DEMO_REPLY_DELAY: Duration = Duration::from_secs(1);

const NOISE_MAX: f64 = 0.05;
const TIP_KINDS: [TipKind; 3] = [TipKind::Info, TipKind::Warning, TipKind::Success];

pub const CANNED_RESPONSES: [&str; 5] = [
    "I understand your question about the training process.",
    "The model is progressing well based on the metrics.",
    "You might want to adjust the learning rate for better results.",
    "The current dataset seems appropriate for this model type.",
    "Let me analyze the training metrics for you.",
];

fn tip_template(kind: TipKind) -> &'static str {
    match kind {
        TipKind::Info => "Model is training well",
        TipKind::Warning => "Learning rate might be too high",
        TipKind::Success => "Good convergence observed",
        TipKind::Error => "Training hit an error",
    }
}

/// Output of one demo step.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoTick {
    pub metrics: TrainingMetrics,
    pub tip: Option<AgentTip>,
}

/// Pure, timer-free epoch sequence. The generator drives it on a cadence;
/// tests drive it directly.
pub struct DemoSequence {
    epoch: u32,
    rng: StdRng,
}

impl Default for DemoSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoSequence {
    pub fn new() -> Self {
        Self {
            epoch: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            epoch: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn is_finished(&self) -> bool {
        self.epoch >= DEMO_MAX_EPOCHS
    }

    /// Advance one epoch. `None` once epoch 100 has been emitted.
    pub fn next_tick(&mut self) -> Option<DemoTick> {
        if self.is_finished() {
            return None;
        }
        self.epoch += 1;
        let epoch = self.epoch;
        let progress = f64::from(epoch) / f64::from(DEMO_MAX_EPOCHS);

        let accuracy = (0.5 + progress * 0.45 + self.rng.gen_range(0.0..NOISE_MAX)).min(1.0);
        let loss = (0.5 - progress * 0.45 + self.rng.gen_range(0.0..NOISE_MAX)).max(0.05);
        let status = if epoch < DEMO_MAX_EPOCHS {
            TrainingStatus::Ongoing
        } else {
            TrainingStatus::Completed
        };

        let metrics = TrainingMetrics {
            epoch,
            accuracy,
            loss,
            status,
            timestamp: now_timestamp(),
        };

        let tip = (epoch % DEMO_TIP_INTERVAL == 0).then(|| {
            let kind = *TIP_KINDS.choose(&mut self.rng).unwrap_or(&TipKind::Info);
            AgentTip {
                id: format!("tip-{}", new_id()),
                message: format!("Demo tip at epoch {epoch}: {}", tip_template(kind)),
                timestamp: now_timestamp(),
                kind,
            }
        });

        Some(DemoTick { metrics, tip })
    }

    /// Pick one canned chat reply.
    pub fn canned_reply(&mut self) -> &'static str {
        CANNED_RESPONSES
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(CANNED_RESPONSES[0])
    }
}

/// Drives a [`DemoSequence`] onto the bus and fakes the chat assistant.
pub struct DemoGenerator {
    bus: Arc<EventBus>,
    sequence: Arc<Mutex<DemoSequence>>,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
    replies: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DemoGenerator {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_sequence(bus, DemoSequence::new())
    }

    pub fn with_sequence(bus: Arc<EventBus>, sequence: DemoSequence) -> Self {
        Self {
            bus,
            sequence: Arc::new(Mutex::new(sequence)),
            metrics_task: Mutex::new(None),
            replies: Mutex::new(Vec::new()),
        }
    }

    /// Start emitting metrics. Calling again while running is a no-op.
    pub fn start(&self) {
        let mut task = lock(&self.metrics_task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        info!("running in demo mode - using synthetic training data");

        let bus = self.bus.clone();
        let sequence = self.sequence.clone();
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(DEMO_START_DELAY).await;
            loop {
                let tick = lock(&sequence).next_tick();
                let Some(tick) = tick else { break };
                let finished = tick.metrics.status == TrainingStatus::Completed;

                bus.publish(&StreamEvent::Metrics(tick.metrics));
                if let Some(tip) = tick.tip {
                    bus.publish(&StreamEvent::Tip(tip));
                }
                if finished {
                    debug!("demo run completed");
                    break;
                }
                tokio::time::sleep(DEMO_TICK).await;
            }
        }));
    }

    /// Echo `message` immediately, then answer with a canned agent reply
    /// after [`DEMO_REPLY_DELAY`].
    pub fn chat(&self, message: ChatMessage) {
        self.bus.publish(&StreamEvent::Chat(message));

        let reply = lock(&self.sequence).canned_reply();
        let bus = self.bus.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(DEMO_REPLY_DELAY).await;
            bus.publish(&StreamEvent::Chat(ChatMessage::agent(reply)));
        });

        let mut replies = lock(&self.replies);
        replies.retain(|h| !h.is_finished());
        replies.push(handle);
    }

    /// Cancel the metrics cadence and any pending chat replies.
    pub fn stop(&self) {
        if let Some(task) = lock(&self.metrics_task).take() {
            task.abort();
        }
        for reply in lock(&self.replies).drain(..) {
            reply.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.metrics_task)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DemoGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sender;

    #[test]
    fn sequence_converges_and_stops_at_100() {
        let mut seq = DemoSequence::seeded(7);
        let ticks: Vec<DemoTick> = std::iter::from_fn(|| seq.next_tick()).collect();

        assert_eq!(ticks.len(), 100);
        let last = &ticks[99].metrics;
        assert_eq!(last.epoch, 100);
        assert_eq!(last.status, TrainingStatus::Completed);
        assert!(ticks[..99]
            .iter()
            .all(|t| t.metrics.status == TrainingStatus::Ongoing));
        assert!(seq.next_tick().is_none());
    }

    #[test]
    fn metrics_stay_within_bounds() {
        let mut seq = DemoSequence::seeded(11);
        while let Some(tick) = seq.next_tick() {
            let m = tick.metrics;
            let progress = f64::from(m.epoch) / 100.0;
            assert!(m.accuracy <= 1.0);
            assert!(m.accuracy >= 0.5 + progress * 0.45);
            assert!(m.loss >= 0.05);
            assert!(m.loss < (0.5 - progress * 0.45 + NOISE_MAX).max(0.05) + 1e-12);
        }
    }

    #[test]
    fn tips_every_tenth_epoch() {
        let mut seq = DemoSequence::seeded(3);
        let tip_epochs: Vec<u32> = std::iter::from_fn(|| seq.next_tick())
            .filter(|t| t.tip.is_some())
            .map(|t| t.metrics.epoch)
            .collect();
        assert_eq!(tip_epochs, (1..=10).map(|n| n * 10).collect::<Vec<_>>());

        let mut seq = DemoSequence::seeded(3);
        let tip = std::iter::from_fn(|| seq.next_tick())
            .find_map(|t| t.tip)
            .unwrap();
        assert_ne!(tip.kind, TipKind::Error);
        assert!(tip.message.starts_with("Demo tip at epoch 10: "));
    }

    #[tokio::test(start_paused = true)]
    async fn generator_emits_on_cadence_and_terminates() {
        let bus = Arc::new(EventBus::new());
        let epochs = Arc::new(Mutex::new(Vec::new()));
        let seen = epochs.clone();
        let _sub = bus.on_metrics(move |m| seen.lock().unwrap().push(m.epoch));

        let generator = DemoGenerator::with_sequence(bus.clone(), DemoSequence::seeded(1));
        generator.start();

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(epochs.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*epochs.lock().unwrap(), vec![1]);

        tokio::time::sleep(Duration::from_secs(200)).await;
        let epochs = epochs.lock().unwrap().clone();
        assert_eq!(epochs.len(), 100);
        assert_eq!(*epochs.last().unwrap(), 100);
        assert!(!generator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn chat_echoes_then_replies() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        let _sub = bus.on_chat(move |m| seen.lock().unwrap().push(m.clone()));

        let generator = DemoGenerator::with_sequence(bus.clone(), DemoSequence::seeded(5));
        let outgoing = ChatMessage::user("how is it going?");
        generator.chat(outgoing.clone());

        assert_eq!(*log.lock().unwrap(), vec![outgoing]);

        tokio::time::sleep(DEMO_REPLY_DELAY + Duration::from_millis(10)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].sender, Sender::Agent);
        assert!(CANNED_RESPONSES.contains(&log[1].content.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_reply() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(Mutex::new(0usize));
        let c = count.clone();
        let _sub = bus.on_chat(move |_| *c.lock().unwrap() += 1);

        let generator = DemoGenerator::new(bus.clone());
        generator.chat(ChatMessage::user("ping"));
        generator.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
