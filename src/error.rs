use crate::protocol::ServerMsg;

/// Rejections a room can hand back to the sender of a command. Every variant
/// maps to a wire message; none of them mutate room state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Name already taken")]
    NameAlreadyTaken,
    #[error("Wrong room password")]
    BadPassword,
    #[error("New players cannot join this room right now")]
    JoinsDisabled,
    #[error("Unknown room id")]
    InvalidRoomId,
    #[error("That action is not allowed in the current stage")]
    StageForbidsAction,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Card is not in your hand")]
    CardNotInHand,
    #[error("Wrong number of cards submitted")]
    WrongVoteCount,
    #[error("You cannot vote for your own card")]
    VoteOnOwnCard,
    #[error("Duplicate card in nomination")]
    DuplicateNomination,
    #[error("Need at least 3 active players")]
    NotEnoughPlayers,
    #[error("Unknown card id")]
    UnknownCardId,
    #[error("Name must be 1-30 characters")]
    InvalidName,
    #[error("Description must not be empty")]
    EmptyDescription,
    #[error("Invalid setting value")]
    InvalidSetting,
}

impl RoomError {
    /// Identity rejections and unknown-room lookups close the session; other
    /// errors leave it open for another attempt.
    pub fn closes_session(&self) -> bool {
        matches!(
            self,
            RoomError::NameAlreadyTaken | RoomError::BadPassword | RoomError::InvalidRoomId
        )
    }

    pub fn to_msg(&self) -> ServerMsg {
        match self {
            RoomError::InvalidRoomId => ServerMsg::InvalidRoomId {},
            other => ServerMsg::ErrorMsg {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rejections_close_the_session() {
        assert!(RoomError::NameAlreadyTaken.closes_session());
        assert!(RoomError::BadPassword.closes_session());
        assert!(RoomError::InvalidRoomId.closes_session());
        assert!(!RoomError::JoinsDisabled.closes_session());
        assert!(!RoomError::CardNotInHand.closes_session());
    }

    #[test]
    fn invalid_room_id_maps_to_its_own_variant() {
        assert!(matches!(
            RoomError::InvalidRoomId.to_msg(),
            ServerMsg::InvalidRoomId {}
        ));
        assert!(matches!(
            RoomError::BadPassword.to_msg(),
            ServerMsg::ErrorMsg { .. }
        ));
    }
}
