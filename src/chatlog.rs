use serde::Deserialize;
use tracing::warn;

/// Shown in place of a bot answer when the stream dies.
pub const CONNECTION_ERROR: &str = "Error connecting to server.";

/// Identifier for a message in the log. Monotonic per log, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Bot,
}

/// Lifecycle of a bot message. User messages are `Done` from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Placeholder shown while waiting for the first stream item.
    Pending,
    Streaming,
    Done,
    Failed,
}

/// Quality assessment the server appends out-of-band to an answer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvalResult {
    pub score: f64,
    pub feedback: String,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    /// Concatenation of every text fragment received so far.
    pub content: String,
    pub eval: Option<EvalResult>,
    pub state: MessageState,
}

/// Append-only message list. The only write path into the chat history:
/// messages enter through `append` and are mutated in place through the
/// id-addressed methods below, never removed or reordered.
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl ChatLog {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_id: 0,
        }
    }

    /// Append a message and return its id for later mutation. Bot messages
    /// start as pending placeholders; user messages are complete on arrival.
    pub fn append(&mut self, role: ChatRole, content: impl Into<String>) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;

        let state = match role {
            ChatRole::User => MessageState::Done,
            ChatRole::Bot => MessageState::Pending,
        };

        self.messages.push(ChatMessage {
            id,
            role,
            content: content.into(),
            eval: None,
            state,
        });
        id
    }

    /// Append a text fragment to a streaming message. The first fragment
    /// clears the pending placeholder.
    pub fn push_fragment(&mut self, id: MessageId, fragment: &str) {
        if let Some(msg) = self.get_mut(id) {
            if msg.state == MessageState::Pending {
                msg.state = MessageState::Streaming;
            }
            msg.content.push_str(fragment);
        }
    }

    /// Attach an evaluation to a message. The first one wins; duplicates are
    /// dropped so the rendered widget is never replaced mid-stream.
    pub fn attach_eval(&mut self, id: MessageId, eval: EvalResult) {
        if let Some(msg) = self.get_mut(id) {
            if msg.eval.is_some() {
                warn!(message_id = ?id, "duplicate evaluation payload, keeping the first");
                return;
            }
            if msg.state == MessageState::Pending {
                msg.state = MessageState::Streaming;
            }
            msg.eval = Some(eval);
        }
    }

    pub fn mark_done(&mut self, id: MessageId) {
        if let Some(msg) = self.get_mut(id) {
            if msg.state != MessageState::Failed {
                msg.state = MessageState::Done;
            }
        }
    }

    /// Replace the message content with the fixed connection-error text.
    /// Any partial content is overwritten, matching a renderer that simply
    /// rewrites the message node.
    pub fn mark_failed(&mut self, id: MessageId) {
        if let Some(msg) = self.get_mut(id) {
            msg.content = CONNECTION_ERROR.to_string();
            msg.state = MessageState::Failed;
        }
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        let found = self.messages.iter_mut().find(|m| m.id == id);
        if found.is_none() {
            warn!(message_id = ?id, "mutation addressed to unknown message");
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_distinct() {
        let mut log = ChatLog::new();
        let a = log.append(ChatRole::User, "one");
        let b = log.append(ChatRole::User, "two");
        let c = log.append(ChatRole::Bot, "");
        assert_ne!(a, b);
        assert_ne!(b, c);
        // Appending never reorders earlier messages
        let roles: Vec<_> = log.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::User, ChatRole::Bot]);
    }

    #[test]
    fn fragments_accumulate_and_clear_pending() {
        let mut log = ChatLog::new();
        let id = log.append(ChatRole::Bot, "");
        assert_eq!(log.get(id).unwrap().state, MessageState::Pending);

        log.push_fragment(id, "Hello ");
        log.push_fragment(id, "world");
        let msg = log.get(id).unwrap();
        assert_eq!(msg.content, "Hello world");
        assert_eq!(msg.state, MessageState::Streaming);

        log.mark_done(id);
        assert_eq!(log.get(id).unwrap().state, MessageState::Done);
    }

    #[test]
    fn first_eval_wins() {
        let mut log = ChatLog::new();
        let id = log.append(ChatRole::Bot, "");
        log.attach_eval(
            id,
            EvalResult {
                score: 8.0,
                feedback: "good".into(),
            },
        );
        log.attach_eval(
            id,
            EvalResult {
                score: 2.0,
                feedback: "bad".into(),
            },
        );
        let eval = log.get(id).unwrap().eval.as_ref().unwrap();
        assert_eq!(eval.score, 8.0);
        assert_eq!(eval.feedback, "good");
    }

    #[test]
    fn failure_overwrites_partial_content() {
        let mut log = ChatLog::new();
        let id = log.append(ChatRole::Bot, "");
        log.push_fragment(id, "partial answ");
        log.mark_failed(id);
        let msg = log.get(id).unwrap();
        assert_eq!(msg.content, CONNECTION_ERROR);
        assert_eq!(msg.state, MessageState::Failed);

        // A late terminal event must not resurrect a failed message
        log.mark_done(id);
        assert_eq!(log.get(id).unwrap().state, MessageState::Failed);
    }
}
