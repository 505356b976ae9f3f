//! Canonical topic names.
//!
//! Topics follow the `<entity>:<id>` convention (`room:42`, `user:7`,
//! `call:9`) plus the fixed `presence` channel. These helpers are a
//! convenience over that naming contract; the dispatch core itself treats
//! every topic as an opaque string, so any other topic name is legal but
//! uninterpreted.

/// Fixed topic carrying presence changes for all users.
pub const PRESENCE: &str = "presence";

/// Topic for events scoped to one conversation.
pub fn room(conversation_id: i64) -> String {
    format!("room:{conversation_id}")
}

/// Topic for events addressed to one user across all their connections.
pub fn user(user_id: i64) -> String {
    format!("user:{user_id}")
}

/// Topic for call signaling within one room.
pub fn call(room_id: i64) -> String {
    format!("call:{room_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names_follow_the_entity_id_convention() {
        assert_eq!(room(42), "room:42");
        assert_eq!(user(7), "user:7");
        assert_eq!(call(9), "call:9");
        assert_eq!(PRESENCE, "presence");
    }
}
