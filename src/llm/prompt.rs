const PREAMBLE: &str = "You are a helpful assistant. Use the provided context to answer the question.\n\
If the answer is not in the context, simply say you don't know.";

const EMPTY_HISTORY: &str = "No previous conversation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used when the turn is rendered into a prompt
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "Human",
            Self::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Ordered, append-only history of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a question and its answer together
    #[inline]
    pub fn push_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            text: question.into(),
        });
        self.turns.push(Turn {
            role: Role::Assistant,
            text: answer.into(),
        });
    }

    #[inline]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Render the history one `"<label>: <text>"` line per turn
#[inline]
pub fn format_history(history: &Conversation) -> String {
    if history.is_empty() {
        return EMPTY_HISTORY.to_string();
    }

    history
        .turns()
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assemble the single prompt sent to the model
#[inline]
pub fn build_prompt(question: &str, context: &[String], history: &Conversation) -> String {
    format!(
        "{PREAMBLE}\n\nContext:\n{}\n\nChat History:\n{}\n\nCurrent Question: {question}\n\nAnswer:",
        context.join("\n\n"),
        format_history(history),
    )
}
