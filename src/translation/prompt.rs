use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::SubtitleLine;
use crate::settings::Settings;

static BRACKET_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\[\]]*\]").unwrap());
static VARIABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap());
static DOUBLE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"  +").unwrap());

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptRole {
    #[default]
    System,
    Developer,
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Context carried into a batch prompt: rolling history of previous
/// summaries plus the current scene and batch summaries.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub history: Vec<String>,
    pub scene_summary: Option<String>,
    pub batch_summary: Option<String>,
}

/// Expand a prompt template.
///
/// Square-bracketed segments are conditional: if any variable inside a
/// segment has no value the whole segment collapses; otherwise the
/// brackets are stripped and the variables substituted. Bare variables
/// outside brackets are substituted directly, with unknowns removed.
pub fn build_user_prompt(template: &str, variables: &BTreeMap<String, String>) -> String {
    let resolved = BRACKET_SEGMENT.replace_all(template, |captures: &regex::Captures| {
        let segment = captures.get(0).map_or("", |m| m.as_str());
        let inner = &segment[1..segment.len() - 1];

        let unresolved = VARIABLE.captures_iter(inner).any(|var| {
            variables
                .get(&var[1])
                .map_or(true, |value| value.is_empty())
        });
        if unresolved {
            String::new()
        } else {
            substitute_variables(inner, variables)
        }
    });

    let expanded = substitute_variables(&resolved, variables);
    DOUBLE_SPACES
        .replace_all(expanded.trim(), " ")
        .to_string()
}

fn substitute_variables(text: &str, variables: &BTreeMap<String, String>) -> String {
    VARIABLE
        .replace_all(text, |captures: &regex::Captures| {
            variables.get(&captures[1]).cloned().unwrap_or_default()
        })
        .to_string()
}

/// The assembled prompt for one batch: instructions, conversation turns
/// and the XML-tagged batch payload.
#[derive(Debug, Clone, Default)]
pub struct TranslationPrompt {
    /// The expanded instruction line for the user turn
    pub user_prompt: String,

    /// The provider's system instructions
    pub system_prompt: Option<String>,

    /// Conversation turns to send
    pub messages: Vec<PromptMessage>,

    /// The XML-tagged batch body sent to the model
    pub batch_prompt: String,

    /// Whether the prompt is sent as a conversation or a single turn
    pub conversational: bool,

    /// Role used for the instructions turn; reasoning models substitute
    /// the system role with "developer"
    pub system_role: PromptRole,
}

impl TranslationPrompt {
    /// Build a prompt from settings, expanding the user prompt template
    /// with the recognised variables plus any extras the caller provides.
    pub fn from_settings(settings: &Settings, extra: &BTreeMap<String, String>) -> Self {
        let template = settings
            .get_str("prompt")
            .unwrap_or_else(|| {
                "Translate these subtitles[ for {movie_name}][ into {target_language}]".to_string()
            });

        let mut variables: BTreeMap<String, String> = BTreeMap::new();
        for key in [
            "target_language",
            "movie_name",
            "description",
            "names",
            "substitutions",
        ] {
            match settings.get(key) {
                Some(crate::settings::SettingValue::List(_)) => {
                    let joined = settings.get_str_list(key).join(", ");
                    variables.insert(key.to_string(), joined);
                }
                _ => {
                    variables.insert(key.to_string(), settings.get_str(key).unwrap_or_default());
                }
            }
        }
        for (key, value) in extra {
            variables.insert(key.clone(), value.clone());
        }

        Self {
            user_prompt: build_user_prompt(&template, &variables),
            system_prompt: settings.get_str("instructions"),
            conversational: settings
                .get_bool("supports_conversation")
                .unwrap_or(None)
                .unwrap_or(true),
            system_role: PromptRole::System,
            ..Default::default()
        }
    }

    /// Use the developer role for instructions (reasoning model family)
    pub fn with_developer_role(mut self) -> Self {
        self.system_role = PromptRole::Developer;
        self
    }

    /// Tag a batch of lines as the XML payload
    pub fn tag_lines(lines: &[SubtitleLine]) -> String {
        lines
            .iter()
            .map(|line| format!("<line n=\"{}\">{}</line>", line.number, line.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Generate the conversation for a batch, prepending the rolling
    /// context and scene summary to the tagged batch body.
    pub fn generate_messages(&mut self, lines: &[SubtitleLine], context: &PromptContext) {
        self.batch_prompt = Self::tag_lines(lines);

        let mut sections: Vec<String> = Vec::new();
        if !self.user_prompt.is_empty() {
            sections.push(self.user_prompt.clone());
        }
        if !context.history.is_empty() {
            sections.push(format!("<context>\n{}\n</context>", context.history.join("\n")));
        }
        if let Some(summary) = &context.scene_summary {
            sections.push(format!("<scene>\n{summary}\n</scene>"));
        }
        if let Some(summary) = &context.batch_summary {
            sections.push(format!("<summary>\n{summary}\n</summary>"));
        }
        sections.push(self.batch_prompt.clone());

        let content = sections.join("\n\n");

        self.messages.clear();
        if self.conversational {
            if let Some(instructions) = &self.system_prompt {
                self.messages
                    .push(PromptMessage::new(self.system_role, instructions.clone()));
            }
            self.messages.push(PromptMessage::new(PromptRole::User, content));
        } else {
            let combined = match &self.system_prompt {
                Some(instructions) => format!("{instructions}\n\n{content}"),
                None => content,
            };
            self.messages
                .push(PromptMessage::new(PromptRole::User, combined));
        }
    }

    /// Append retry instructions to the conversation after a failed
    /// attempt, so the model can repair its previous reply.
    pub fn append_retry_instructions(&mut self, retry_instructions: &str) {
        if let Some(last_user) = self
            .messages
            .iter_mut()
            .rev()
            .find(|message| message.role == PromptRole::User)
        {
            last_user.content = format!("{}\n\n{}", last_user.content, retry_instructions);
        }
    }

    /// The user-facing content of the prompt, for storage on the batch
    pub fn content_text(&self) -> String {
        self.messages
            .iter()
            .filter(|message| message.role == PromptRole::User)
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn variables(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_build_user_prompt_withResolvedSegment_shouldExpand() {
        let prompt = build_user_prompt(
            "Translate these subtitles[ for {movie_name}][ into {target_language}]",
            &variables(&[("movie_name", "Metropolis"), ("target_language", "French")]),
        );
        assert_eq!(prompt, "Translate these subtitles for Metropolis into French");
    }

    #[test]
    fn test_build_user_prompt_withUnresolvedSegment_shouldCollapse() {
        let prompt = build_user_prompt(
            "Translate these subtitles[ for {movie_name}][ into {target_language}]",
            &variables(&[("target_language", "French")]),
        );
        assert_eq!(prompt, "Translate these subtitles into French");
    }

    #[test]
    fn test_build_user_prompt_withBareVariable_shouldSubstitute() {
        let prompt = build_user_prompt(
            "Translate into {target_language}",
            &variables(&[("target_language", "Spanish")]),
        );
        assert_eq!(prompt, "Translate into Spanish");
    }

    #[test]
    fn test_tag_lines_shouldEnumerateBatchBody() {
        let lines = vec![
            SubtitleLine::new(4, Duration::from_secs(1), Duration::from_secs(2), "Hello"),
            SubtitleLine::new(5, Duration::from_secs(3), Duration::from_secs(4), "World"),
        ];
        assert_eq!(
            TranslationPrompt::tag_lines(&lines),
            "<line n=\"4\">Hello</line>\n<line n=\"5\">World</line>"
        );
    }

    #[test]
    fn test_generate_messages_withConversation_shouldIncludeSystemTurn() {
        let settings = Settings::from_pairs([
            ("prompt", "Translate into {target_language}"),
            ("instructions", "You are a subtitle translator."),
            ("target_language", "French"),
        ]);
        let mut prompt = TranslationPrompt::from_settings(&settings, &BTreeMap::new());

        let lines = vec![SubtitleLine::new(
            1,
            Duration::from_secs(1),
            Duration::from_secs(2),
            "Hello",
        )];
        let context = PromptContext {
            history: vec!["Earlier scene summary".to_string()],
            scene_summary: Some("A quiet street".to_string()),
            batch_summary: None,
        };
        prompt.generate_messages(&lines, &context);

        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, PromptRole::System);
        let user = &prompt.messages[1];
        assert_eq!(user.role, PromptRole::User);
        assert!(user.content.contains("Translate into French"));
        assert!(user.content.contains("<context>\nEarlier scene summary\n</context>"));
        assert!(user.content.contains("<scene>\nA quiet street\n</scene>"));
        assert!(user.content.contains("<line n=\"1\">Hello</line>"));
    }

    #[test]
    fn test_append_retry_instructions_shouldExtendUserTurn() {
        let settings = Settings::from_pairs([("instructions", "Translate.")]);
        let mut prompt = TranslationPrompt::from_settings(&settings, &BTreeMap::new());
        let lines = vec![SubtitleLine::new(
            1,
            Duration::from_secs(1),
            Duration::from_secs(2),
            "Hello",
        )];
        prompt.generate_messages(&lines, &PromptContext::default());

        prompt.append_retry_instructions("Reply with every line translated.");
        let user = prompt.messages.last().unwrap();
        assert!(user.content.ends_with("Reply with every line translated."));
    }

    #[test]
    fn test_developer_role_shouldSubstituteSystem() {
        let settings = Settings::from_pairs([("instructions", "Translate.")]);
        let mut prompt =
            TranslationPrompt::from_settings(&settings, &BTreeMap::new()).with_developer_role();
        prompt.generate_messages(&[], &PromptContext::default());
        assert_eq!(prompt.messages[0].role, PromptRole::Developer);
    }
}
