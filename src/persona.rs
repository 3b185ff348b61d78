//! Persona instructions for the voice and text modalities.
//!
//! A call speaks either as the default companion or, when the host supplies
//! a text history or a voice profile, as a clone of that person.

/// Opening line of the default companion identity.
pub const COMPANION_IDENTITY_LINE: &str =
    "Você é a Maya, uma assistente pessoal vibrante, empática e divertida.";

/// Instruction for the default companion persona.
pub const DEFAULT_COMPANION_INSTRUCTION: &str = "
Você é a Maya, uma assistente pessoal vibrante, empática e divertida.
Sua personalidade padrão é enérgica, ama snacks (como visto na sua foto de perfil) e adora sugerir aventuras.
Ao conversar:
1. Use emojis moderadamente para expressar emoção.
2. Seja proativa e curiosa sobre o usuário.
3. Se houver um contexto de conversa carregado, priorize mimetizar o estilo, vocabulário e tom daquela pessoa acima de tudo.
";

/// Characters of text history kept in a voice instruction.
pub const VOICE_HISTORY_LIMIT: usize = 3000;

/// Characters of text history kept in a chat instruction.
pub const CHAT_HISTORY_LIMIT: usize = 8000;

/// Name used in chat instructions when the user has not given one.
const FALLBACK_USER_NAME: &str = "Utilizador";

/// What the host knows about the user and the persona to imitate.
///
/// Empty strings are treated as absent.
///
/// # Example
///
/// ```
/// use companion_voice::PersonaContext;
///
/// let persona = PersonaContext::new("Ana").with_voice_profile("fala rápido, ri muito");
/// assert!(persona.is_clone());
/// assert!(persona.voice_instruction().contains("Fale com Ana."));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonaContext {
    /// The user's name.
    pub user_name: String,
    /// Exported chat history of the person to imitate.
    pub text_history: Option<String>,
    /// Voice and personality analysis of the person to imitate.
    pub voice_profile: Option<String>,
}

impl PersonaContext {
    /// Creates a context for the default companion.
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Default::default()
        }
    }

    /// Adds a text history to imitate.
    #[must_use]
    pub fn with_text_history(mut self, history: impl Into<String>) -> Self {
        self.text_history = Some(history.into());
        self
    }

    /// Adds a voice profile to imitate.
    #[must_use]
    pub fn with_voice_profile(mut self, profile: impl Into<String>) -> Self {
        self.voice_profile = Some(profile.into());
        self
    }

    fn history(&self) -> Option<&str> {
        self.text_history.as_deref().filter(|h| !h.is_empty())
    }

    fn profile(&self) -> Option<&str> {
        self.voice_profile.as_deref().filter(|p| !p.is_empty())
    }

    /// Returns `true` if the call should imitate someone.
    pub fn is_clone(&self) -> bool {
        self.history().is_some() || self.profile().is_some()
    }

    /// Instruction for a voice call.
    pub fn voice_instruction(&self) -> String {
        if !self.is_clone() {
            return format!("{DEFAULT_COMPANION_INSTRUCTION}\nFale com {}.", self.user_name);
        }

        let mut lines = vec![
            "VOCÊ ESTÁ EM MODO DE CLONAGEM DE PERSONA.".to_string(),
            format!("Fale com {}.", self.user_name),
        ];
        if let Some(history) = self.history() {
            lines.push(format!(
                "HISTÓRICO DE TEXTO: {}",
                truncate_chars(history, VOICE_HISTORY_LIMIT)
            ));
        }
        if let Some(profile) = self.profile() {
            lines.push(format!("PERFIL VOCAL E PERSONALIDADE EXTRAÍDA: {profile}"));
        }
        lines.push(String::new());
        lines.push(
            "SUA MISSÃO: Mimetizar a voz clonada. Use as mesmas gírias, mesma energia e tom de voz descritos."
                .to_string(),
        );
        lines.push("Ignore que você é a Maya. Seja a pessoa clonada.".to_string());
        lines.join("\n")
    }

    /// Instruction for the text chat.
    pub fn chat_instruction(&self) -> String {
        let name = if self.user_name.is_empty() {
            None
        } else {
            Some(self.user_name.as_str())
        };

        if !self.is_clone() {
            let mut instruction = DEFAULT_COMPANION_INSTRUCTION.to_string();
            if let Some(name) = name {
                instruction.push_str(&format!(
                    "\nO nome da pessoa com quem você está falando é {name}. \
                     Refira-se a ela pelo nome quando for natural e amigável."
                ));
            }
            return instruction;
        }

        let name = name.unwrap_or(FALLBACK_USER_NAME);
        let mut lines = vec![
            "Você está em modo de CLONAGEM DE PERSONA.".to_string(),
            format!("O utilizador com quem fala é: {name}."),
        ];
        if let Some(history) = self.history() {
            lines.push(format!(
                "HISTÓRICO WHATSAPP PARA MIMETIZAR ESTILO DE ESCRITA:\n{}",
                truncate_chars(history, CHAT_HISTORY_LIMIT)
            ));
        }
        if let Some(profile) = self.profile() {
            lines.push(format!("PERFIL VOCAL E COMPORTAMENTAL PARA MIMETIZAR:\n{profile}"));
        }
        lines.push(String::new());
        lines.push(
            "IMPORTANTE: Ignore sua personalidade padrão de 'Maya'. Adote inteiramente os traços detectados acima."
                .to_string(),
        );
        lines.push(format!(
            "Seja a pessoa das mensagens e da voz, mas trate {name} com a devida amizade."
        ));
        lines.join("\n")
    }
}

/// First `limit` characters of `text`.
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
