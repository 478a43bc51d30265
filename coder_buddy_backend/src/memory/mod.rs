use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One message in the short-term conversation with the reasoning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// Bounded, insertion-ordered conversation log.
///
/// Holds at most `capacity` turns; every push evicts from the oldest end until
/// the bound holds again. Eviction never reorders the surviving turns.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationMemory {
    /// A capacity of zero is clamped to one so the current turn is always visible.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn append_user(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::user(content));
    }

    pub fn append_assistant(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::assistant(content));
    }

    /// Replace the content of the newest user turn. Returns `false` when the
    /// log holds no user turn. Calling it twice in a row is a no-op the second time.
    pub fn truncate_last_user(&mut self, placeholder: &str) -> bool {
        match self
            .turns
            .iter_mut()
            .rev()
            .find(|turn| turn.role == TurnRole::User)
        {
            Some(turn) => {
                if turn.content != placeholder {
                    turn.content = placeholder.to_string();
                }
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        self.prune();
    }

    fn prune(&mut self) {
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleven_exchanges_keep_the_ten_newest_turns() {
        let mut memory = ConversationMemory::new(10);
        for i in 0..11 {
            memory.append_user(format!("user {i}"));
            memory.append_assistant(format!("assistant {i}"));
        }

        assert_eq!(memory.len(), 10);
        let contents: Vec<String> = memory.iter().map(|t| t.content.clone()).collect();
        let expected: Vec<String> = (6..11)
            .flat_map(|i| [format!("user {i}"), format!("assistant {i}")])
            .collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn bound_holds_after_every_append() {
        let mut memory = ConversationMemory::new(3);
        for i in 0..20 {
            if i % 3 == 0 {
                memory.append_assistant(i.to_string());
            } else {
                memory.append_user(i.to_string());
            }
            assert!(memory.len() <= 3);
        }
        let tail: Vec<&str> = memory.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(tail, vec!["17", "18", "19"]);
    }

    #[test]
    fn truncate_touches_only_nearest_user_turn() {
        let mut memory = ConversationMemory::new(10);
        memory.append_user("old code");
        memory.append_assistant("old reply");
        memory.append_user("new code");
        memory.append_assistant("new reply");

        assert!(memory.truncate_last_user("[truncated]"));

        let snapshot = memory.snapshot();
        assert_eq!(snapshot[0], ConversationTurn::user("old code"));
        assert_eq!(snapshot[1], ConversationTurn::assistant("old reply"));
        assert_eq!(snapshot[2], ConversationTurn::user("[truncated]"));
        assert_eq!(snapshot[3], ConversationTurn::assistant("new reply"));
    }

    #[test]
    fn truncate_is_idempotent_until_next_user_turn() {
        let mut memory = ConversationMemory::new(10);
        memory.append_user("code");
        memory.append_assistant("reply");

        assert!(memory.truncate_last_user("[t]"));
        let first = memory.snapshot();
        assert!(memory.truncate_last_user("[t]"));
        assert_eq!(memory.snapshot(), first);
    }

    #[test]
    fn truncate_without_user_turn_reports_false() {
        let mut memory = ConversationMemory::new(4);
        assert!(!memory.truncate_last_user("[t]"));
        memory.append_assistant("only assistant");
        assert!(!memory.truncate_last_user("[t]"));
        assert_eq!(memory.snapshot(), vec![ConversationTurn::assistant("only assistant")]);
    }

    #[test]
    fn snapshot_is_detached_from_memory() {
        let mut memory = ConversationMemory::new(4);
        memory.append_user("a");
        let mut snapshot = memory.snapshot();
        snapshot.push(ConversationTurn::assistant("b"));
        snapshot[0].content = "changed".to_string();

        assert_eq!(memory.snapshot(), vec![ConversationTurn::user("a")]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut memory = ConversationMemory::new(0);
        assert!(memory.is_empty());
        memory.append_user("a");
        memory.append_user("b");
        assert_eq!(memory.capacity(), 1);
        assert_eq!(memory.snapshot(), vec![ConversationTurn::user("b")]);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_value(ConversationTurn::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
