use coder_buddy_backend::agent::reasoning::Mood;
use coder_buddy_backend::dispatch::OutboundMessage;

const RESET: &str = "\x1b[0m";

fn default_text(mood: Mood) -> &'static str {
    match mood {
        Mood::Idle => "I'm here. Analyzing the code flow.",
        Mood::Thinking => "Hmm... This smells. Thinking.",
        Mood::Angry => "This is... We won't leave it like this.",
        Mood::Happy => "Great! Like this.",
    }
}

fn face(mood: Mood) -> &'static str {
    match mood {
        Mood::Idle => "( -_-)",
        Mood::Thinking => "(¬_¬ )",
        Mood::Angry => "(ಠ益ಠ)",
        Mood::Happy => "(^o^)/",
    }
}

fn color(mood: Mood) -> &'static str {
    match mood {
        Mood::Angry => "\x1b[31m",
        Mood::Happy => "\x1b[32m",
        Mood::Idle | Mood::Thinking => "\x1b[37m",
    }
}

/// Terminal avatar: shows whatever message arrived last.
pub struct Presenter {
    mood: Mood,
    text: String,
    use_color: bool,
}

impl Presenter {
    pub fn new(use_color: bool) -> Self {
        Self {
            mood: Mood::Idle,
            text: default_text(Mood::Idle).to_string(),
            use_color,
        }
    }

    pub fn mood(&self) -> Mood {
        self.mood
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn apply(&mut self, message: OutboundMessage) {
        match message {
            OutboundMessage::UpdateMood { mood, text } => {
                self.mood = mood;
                let text = text.trim();
                self.text = if text.is_empty() {
                    default_text(mood).to_string()
                } else {
                    text.to_string()
                };
            }
        }
    }

    pub fn render(&self) -> String {
        if self.use_color {
            format!(
                "{}{} {}{}",
                color(self.mood),
                face(self.mood),
                self.text,
                RESET
            )
        } else {
            format!("{} {}", face(self.mood), self.text)
        }
    }
}
