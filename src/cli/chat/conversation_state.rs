use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
}

/// Payload carried by a message. Only text exists today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MessageContent {
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Role::Human, text)
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(Role::Ai, text)
    }

    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::Text(text) => text,
        }
    }
}

/// A finalized question/answer pair handed back to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeProblem {
    pub answer: String,
    pub question: String,
}

impl PracticeProblem {
    pub fn is_complete(&self) -> bool {
        !self.answer.trim().is_empty() && !self.question.trim().is_empty()
    }
}

/// Decoding target for the "does the user want help" classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Intent {
    #[serde(rename = "continue")]
    pub continue_flag: bool,
}

/// Everything one tutoring session accumulates.
///
/// `internal_thoughts` is a stack: planning and drafting steps push onto it and
/// later steps pop from the end. `practice_problems` belongs to the current run
/// until the caller takes it.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    internal_thoughts: Vec<Message>,
    practice_problems: Vec<PracticeProblem>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_user_message(&mut self, text: &str) {
        self.add_message(Message::human(text));
    }

    pub fn add_assistant_message(&mut self, text: &str) {
        self.add_message(Message::ai(text));
    }

    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Earliest message with the given role.
    pub fn first_message_of(&self, role: Role) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == role)
    }

    /// Most recent message with the given role.
    pub fn last_message_of(&self, role: Role) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == role)
    }

    pub fn push_internal_thought(&mut self, text: &str) {
        self.internal_thoughts.push(Message::ai(text));
    }

    pub fn last_internal_thought(&self) -> Option<&Message> {
        self.internal_thoughts.last()
    }

    /// Pops the newest thought. An empty stack yields `None`, never an error.
    pub fn pop_internal_thought(&mut self) -> Option<Message> {
        self.internal_thoughts.pop()
    }

    pub fn internal_thoughts(&self) -> &[Message] {
        &self.internal_thoughts
    }

    pub fn add_practice_problem(&mut self, problem: PracticeProblem) {
        self.practice_problems.push(problem);
    }

    pub fn practice_problems(&self) -> &[PracticeProblem] {
        &self.practice_problems
    }

    /// Hands the accumulated problems to the caller and leaves the list empty.
    pub fn take_practice_problems(&mut self) -> Vec<PracticeProblem> {
        std::mem::take(&mut self.practice_problems)
    }
}
