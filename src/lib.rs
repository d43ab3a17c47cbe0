pub mod api;
pub mod cards;
pub mod config;
pub mod error;
pub mod protocol;
pub mod room;
pub mod types;
pub mod ws;

use cards::CardRegistry;
use room::directory::RoomDirectory;
use std::sync::Arc;
use ws::hub::SessionHub;

/// Shared application state handed to every HTTP and WebSocket handler.
pub struct AppState {
    pub rooms: Arc<RoomDirectory>,
    pub cards: Arc<CardRegistry>,
    pub hub: Arc<SessionHub>,
}

impl AppState {
    pub fn new(cards: Arc<CardRegistry>, default_win_points: u16) -> Self {
        let hub = Arc::new(SessionHub::new());
        let rooms = Arc::new(RoomDirectory::new(
            Arc::clone(&cards),
            Arc::clone(&hub),
            default_win_points,
        ));
        Self { rooms, cards, hub }
    }
}
