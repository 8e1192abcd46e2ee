//! Client-side Conversation Memory
//!
//! Backends without server-side memory need the client to resend earlier
//! turns. [`ConversationContext`] keeps one ordered message list per model
//! and the system prompt that frames all of them.

use std::collections::HashMap;

use super::traits::{ChatMessage, GenerationRequest, Role};

/// Per-model message lists owned by a single adapter
#[derive(Clone, Debug, Default)]
pub struct ConversationContext {
    system_prompt: Option<String>,
    turns: HashMap<String, Vec<ChatMessage>>,
}

impl ConversationContext {
    /// Create an empty context framed by `system_prompt`
    #[must_use]
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            system_prompt: normalize(system_prompt),
            turns: HashMap::new(),
        }
    }

    /// The active system prompt
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Replace the system prompt, clearing all history when it changes
    ///
    /// Returns `true` if the prompt changed.
    pub fn set_system_prompt(&mut self, prompt: Option<String>) -> bool {
        let prompt = normalize(prompt);
        if prompt == self.system_prompt {
            return false;
        }
        self.system_prompt = prompt;
        self.turns.clear();
        true
    }

    /// Recorded turns for `model`, oldest first
    #[must_use]
    pub fn history(&self, model: &str) -> &[ChatMessage] {
        self.turns.get(model).map_or(&[], Vec::as_slice)
    }

    /// Number of recorded messages for `model`
    #[must_use]
    pub fn len(&self, model: &str) -> usize {
        self.history(model).len()
    }

    /// Whether nothing is recorded for any model
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.values().all(Vec::is_empty)
    }

    /// Build the full message list to send for `request`
    ///
    /// Caller-supplied history wins over recorded turns. The system prompt
    /// is prepended unless the history already starts with one.
    #[must_use]
    pub fn messages_for(&self, request: &GenerationRequest) -> Vec<ChatMessage> {
        let history = if request.history.is_empty() {
            self.history(&request.model)
        } else {
            request.history.as_slice()
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        let has_system = history.first().is_some_and(|m| m.role == Role::System);
        if let Some(system) = self.system_prompt.as_ref().filter(|_| !has_system) {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(request.prompt.clone()));
        messages
    }

    /// Append a finished exchange to `model`'s history
    pub fn record_exchange(&mut self, model: &str, prompt: &str, reply: &str) {
        if reply.trim().is_empty() {
            return;
        }
        let turns = self.turns.entry(model.to_string()).or_default();
        turns.push(ChatMessage::user(prompt));
        turns.push(ChatMessage::assistant(reply));
    }

    /// Forget every model's history
    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

fn normalize(prompt: Option<String>) -> Option<String> {
    prompt.filter(|p| !p.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_messages_include_system_history_and_prompt() {
        let mut ctx = ConversationContext::new(Some("Be brief".to_string()));
        ctx.record_exchange("a.gguf", "Hi", "Hello!");

        let request = GenerationRequest::new("How are you?", "a.gguf");
        assert_eq!(
            ctx.messages_for(&request),
            vec![
                ChatMessage::system("Be brief"),
                ChatMessage::user("Hi"),
                ChatMessage::assistant("Hello!"),
                ChatMessage::user("How are you?"),
            ]
        );
    }

    #[test]
    fn test_history_is_keyed_by_model() {
        let mut ctx = ConversationContext::new(None);
        ctx.record_exchange("a.gguf", "Hi", "Hello!");

        let request = GenerationRequest::new("Hi", "b.gguf");
        assert_eq!(ctx.messages_for(&request), vec![ChatMessage::user("Hi")]);
        assert_eq!(ctx.len("a.gguf"), 2);
        assert_eq!(ctx.len("b.gguf"), 0);
    }

    #[test]
    fn test_caller_history_takes_precedence() {
        let mut ctx = ConversationContext::new(Some("Be brief".to_string()));
        ctx.record_exchange("m", "old", "older");

        let request = GenerationRequest::new("new", "m").with_history(vec![
            ChatMessage::system("Custom"),
            ChatMessage::user("a"),
            ChatMessage::assistant("b"),
        ]);
        let messages = ctx.messages_for(&request);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::system("Custom"));
        assert_eq!(messages[3], ChatMessage::user("new"));
    }

    #[test]
    fn test_system_prompt_change_clears_history() {
        let mut ctx = ConversationContext::new(Some("one".to_string()));
        ctx.record_exchange("m", "q", "a");

        assert!(!ctx.set_system_prompt(Some("one".to_string())));
        assert_eq!(ctx.len("m"), 2);

        assert!(ctx.set_system_prompt(Some("two".to_string())));
        assert!(ctx.is_empty());
        assert_eq!(ctx.system_prompt(), Some("two"));
    }

    #[test]
    fn test_empty_replies_are_not_recorded() {
        let mut ctx = ConversationContext::new(None);
        ctx.record_exchange("m", "q", "   ");
        assert!(ctx.is_empty());

        ctx.record_exchange("m", "q", "a");
        ctx.reset();
        assert!(ctx.is_empty());
    }
}
