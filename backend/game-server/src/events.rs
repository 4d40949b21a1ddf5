// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use connect_common::GameEvent;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events waiting for the publisher task. Overflow drops the event rather
/// than stalling a game.
pub const EVENT_QUEUE_CAPACITY: usize = 512;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &GameEvent) -> anyhow::Result<()>;
}

/// Kafka-backed event sink. One JSON event per message, keyed by game id so
/// per-game ordering survives partitioning.
pub struct KafkaEventSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventSink {
    pub fn from_env() -> anyhow::Result<Self> {
        let brokers = std::env::var("KAFKA_BROKERS")
            .ok()
            .unwrap_or_else(|| "localhost:9092".to_string());
        let topic = std::env::var("GAME_EVENTS_TOPIC")
            .ok()
            .unwrap_or_else(|| "game-events".to_string());

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "10000");

        if let (Ok(username), Ok(password)) = (
            std::env::var("KAFKA_USERNAME"),
            std::env::var("KAFKA_PASSWORD"),
        ) {
            let mechanism = std::env::var("KAFKA_SASL_MECHANISM")
                .ok()
                .unwrap_or_else(|| "SCRAM-SHA-512".to_string());
            config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", &mechanism)
                .set("sasl.username", &username)
                .set("sasl.password", &password);
            info!(mechanism = %mechanism, "game-events producer configured with SASL authentication");
        }

        let producer = config
            .create()
            .context("failed to create game-events producer")?;
        info!(brokers = %brokers, topic = %topic, "game-events producer ready");
        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl EventSink for KafkaEventSink {
    async fn publish(&self, event: &GameEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event).context("failed to encode game event")?;
        self.producer
            .send(
                FutureRecord::to(&self.topic)
                    .key(event.game_id())
                    .payload(&payload),
                Duration::from_secs(5),
            )
            .await
            .map_err(|(error, _)| anyhow::anyhow!("Kafka publish failed: {error:?}"))?;
        Ok(())
    }
}

/// Handle used by gameplay code to enqueue domain events. Enqueueing never
/// blocks and never fails the caller; the publisher task owns all sink I/O.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<GameEvent>,
}

impl EventEmitter {
    pub fn start(sink: Arc<dyn EventSink>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        tokio::spawn(run_event_publisher(rx, sink));
        Self { tx }
    }

    pub fn emit(&self, event: GameEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(game_id = %event.game_id(), "event queue full; dropping game event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(game_id = %event.game_id(), "event publisher stopped; dropping game event");
            }
        }
    }
}

async fn run_event_publisher(mut rx: mpsc::Receiver<GameEvent>, sink: Arc<dyn EventSink>) {
    while let Some(event) = rx.recv().await {
        if let Err(error) = sink.publish(&event).await {
            warn!(game_id = %event.game_id(), error = %error, "failed to publish game event");
        }
    }
}
