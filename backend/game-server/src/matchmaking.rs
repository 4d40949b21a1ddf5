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

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use connect_common::Player;
use tokio::{
    sync::Mutex,
    time::{MissedTickBehavior, interval},
};
use tracing::info;

use crate::registry::GameRegistry;

pub const MATCHMAKING_INTERVAL: Duration = Duration::from_secs(1);
/// After this long without a human partner, a waiting player gets a bot.
/// Bounds worst-case wait during low load without denying human matches
/// during bursts.
pub const BOT_FALLBACK_WAIT: Duration = Duration::from_secs(10);

struct WaitingPlayer {
    player: Player,
    enqueued_at: Instant,
}

/// One-to-one pairing decided by a queue pass. The pairing is computed under
/// the queue lock; games are created only after the lock is released.
enum Pairing {
    Humans(Player, Player),
    WithBot(Player),
}

/// FIFO matchmaking queue. Entries belong to the queue until a pass hands
/// them to the registry by creating a game.
#[derive(Clone, Default)]
pub struct Matchmaker {
    queue: Arc<Mutex<Vec<WaitingPlayer>>>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, player: Player) {
        let mut queue = self.queue.lock().await;
        queue.push(WaitingPlayer {
            player,
            enqueued_at: Instant::now(),
        });
        info!(queue_len = queue.len(), "player added to matchmaking queue");
    }

    /// Removes a player who disconnected before being paired.
    pub async fn remove(&self, player_id: &str) {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|entry| entry.player.id != player_id);
        if queue.len() != before {
            info!(queue_len = queue.len(), "player removed from matchmaking queue");
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Runs the ~1 Hz matchmaking sweep until the process exits.
    pub async fn run(self, registry: GameRegistry) {
        let mut ticker = interval(MATCHMAKING_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.process_queue(&registry).await;
        }
    }

    /// One matchmaking pass. Entries are visited in enqueue order: anyone
    /// waiting past the bot fallback gets a bot opponent; otherwise the
    /// first later unpaired entry becomes the opponent. Unpaired entries
    /// stay queued in order.
    pub async fn process_queue(&self, registry: &GameRegistry) {
        let pairings = {
            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                return;
            }

            let now = Instant::now();
            let mut processed = vec![false; queue.len()];
            let mut pairings = Vec::new();
            for i in 0..queue.len() {
                if processed[i] {
                    continue;
                }
                let waited = now.duration_since(queue[i].enqueued_at);
                if waited > BOT_FALLBACK_WAIT {
                    info!(
                        username = %queue[i].player.username,
                        waited_ms = waited.as_millis() as u64,
                        "queue wait exceeded; matching with a bot"
                    );
                    pairings.push(Pairing::WithBot(queue[i].player.clone()));
                    processed[i] = true;
                    continue;
                }
                for j in (i + 1)..queue.len() {
                    if processed[j] {
                        continue;
                    }
                    info!(
                        player1 = %queue[i].player.username,
                        player2 = %queue[j].player.username,
                        "matched two waiting players"
                    );
                    pairings.push(Pairing::Humans(
                        queue[i].player.clone(),
                        queue[j].player.clone(),
                    ));
                    processed[i] = true;
                    processed[j] = true;
                    break;
                }
            }

            let mut keep = processed.into_iter().map(|p| !p);
            queue.retain(|_| keep.next().unwrap_or(true));
            pairings
        };

        // The queue lock is never held across registry calls.
        for pairing in pairings {
            match pairing {
                Pairing::Humans(player1, player2) => {
                    let game = registry.create_game(player1).await;
                    registry.join_game(&game.id, player2).await;
                }
                Pairing::WithBot(player1) => {
                    let game = registry.create_game(player1).await;
                    registry.join_game(&game.id, Player::bot()).await;
                }
            }
        }
    }

    #[cfg(test)]
    async fn enqueue_at(&self, player: Player, enqueued_at: Instant) {
        self.queue.lock().await.push(WaitingPlayer {
            player,
            enqueued_at,
        });
    }
}
