//! Process-wide registry of rooms: creation with collision-retried codes,
//! lookup, stats, and garbage collection of abandoned rooms.

use super::{get_time_s, Room};
use crate::cards::CardRegistry;
use crate::protocol::ServerMsg;
use crate::types::WinCondition;
use crate::ws::hub::SessionHub;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const ROOM_CODE_LEN: usize = 5;
const ROOM_CODE_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const GC_INTERVAL: Duration = Duration::from_secs(60);
const GC_EMPTY_ROOM_TIMEOUT_S: u64 = 10 * 60;
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
    pub members: usize,
    pub idle_seconds: u64,
}

pub struct RoomDirectory {
    rooms: DashMap<String, Arc<Room>>,
    registry: Arc<CardRegistry>,
    hub: Arc<SessionHub>,
    default_win_points: u16,
}

impl RoomDirectory {
    pub fn new(registry: Arc<CardRegistry>, hub: Arc<SessionHub>, default_win_points: u16) -> Self {
        Self {
            rooms: DashMap::new(),
            registry,
            hub,
            default_win_points,
        }
    }

    /// Allocate a room and return its initial `RoomState` message.
    pub async fn create(
        &self,
        win_condition: Option<WinCondition>,
        creator_name: Option<String>,
        password: Option<String>,
    ) -> Result<ServerMsg, String> {
        let win_condition = self.validate_win_condition(win_condition)?;
        let creator_name = creator_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let password = password.filter(|p| !p.is_empty());

        let mut room_id = generate_room_code();
        while self.rooms.contains_key(&room_id) {
            room_id = generate_room_code();
        }

        let room = Arc::new(Room::new(
            &room_id,
            Arc::clone(&self.registry),
            Arc::clone(&self.hub),
            win_condition,
            creator_name,
            password,
        ));
        let state = room.snapshot().await;
        self.rooms.insert(room_id.clone(), room);

        tracing::info!("created room {} ({:?})", room_id, win_condition);
        Ok(state)
    }

    fn validate_win_condition(
        &self,
        win_condition: Option<WinCondition>,
    ) -> Result<WinCondition, String> {
        match win_condition.unwrap_or(WinCondition::CardsFinish) {
            WinCondition::Points { target_points } => Ok(WinCondition::Points {
                // an omitted target falls back to the configured default
                target_points: if target_points == 0 {
                    self.default_win_points
                } else {
                    target_points
                },
            }),
            WinCondition::Cycles { target_cycles } if target_cycles == 0 => {
                Err("target_cycles must be >= 1".to_string())
            }
            other => Ok(other),
        }
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    pub fn exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub async fn stats(&self) -> HashMap<String, RoomStats> {
        let rooms: Vec<(String, Arc<Room>)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let now = get_time_s();
        let mut stats = HashMap::new();
        for (room_id, room) in rooms {
            stats.insert(
                room_id,
                RoomStats {
                    members: room.member_count().await,
                    idle_seconds: now.saturating_sub(room.last_touch()),
                },
            );
        }
        stats
    }

    /// Drop rooms that have sat empty past the timeout.
    pub async fn garbage_collect(&self) {
        let candidates: Vec<(String, Arc<Room>)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let now = get_time_s();
        for (room_id, room) in candidates {
            if room.member_count().await == 0
                && now.saturating_sub(room.last_touch()) > GC_EMPTY_ROOM_TIMEOUT_S
            {
                tracing::info!("garbage collecting empty room {}", room_id);
                self.rooms.remove(&room_id);
            }
        }
    }

    async fn run_maintenance(&self) {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for room in rooms {
            room.run_maintenance().await;
        }
    }
}

/// Background task reaping empty rooms.
pub fn spawn_room_gc(directory: Arc<RoomDirectory>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(GC_INTERVAL).await;
            directory.garbage_collect().await;
        }
    });
}

/// Background task driving per-room timers (moderator continuity).
pub fn spawn_room_maintenance(directory: Arc<RoomDirectory>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(MAINTENANCE_INTERVAL).await;
            directory.run_maintenance().await;
        }
    });
}

fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_CHARSET[rng.gen_range(0..ROOM_CODE_CHARSET.len())] as char)
        .collect()
}
