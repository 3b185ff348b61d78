//! Builder for [`CallController`].

use std::sync::Arc;

use crate::playback::{OutputDevice, Speaker};
use crate::source::{AudioInput, Microphone};
use crate::transport::{Connector, LiveConnector};
use crate::{
    event_callback, CallConfig, CallController, CallEvent, EventCallback, PersonaContext,
    VoiceCallError,
};

/// Builder for configuring a [`CallController`].
///
/// Use [`CallController::builder()`] to create a new builder. Anything left
/// unset falls back to the default microphone, the default speaker and a
/// live session authenticated with [`CallConfig::api_key`].
///
/// # Example
///
/// ```
/// use companion_voice::playback::VirtualSpeaker;
/// use companion_voice::source::MockMicrophone;
/// use companion_voice::transport::MockConnector;
/// use companion_voice::{CallController, CallState};
///
/// let controller = CallController::builder()
///     .input(MockMicrophone::capture())
///     .output(VirtualSpeaker::new())
///     .connector(MockConnector::new())
///     .voice("Puck")
///     .build()
///     .unwrap();
///
/// assert_eq!(controller.state(), CallState::Idle);
/// ```
#[must_use]
pub struct CallControllerBuilder {
    config: CallConfig,
    persona: PersonaContext,
    input: Option<Arc<dyn AudioInput>>,
    output: Option<Arc<dyn OutputDevice>>,
    connector: Option<Arc<dyn Connector>>,
    event_callback: Option<EventCallback>,
}

impl Default for CallControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CallControllerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: CallConfig::default(),
            persona: PersonaContext::default(),
            input: None,
            output: None,
            connector: None,
            event_callback: None,
        }
    }

    /// Set the call configuration.
    ///
    /// Replaces any voice set earlier with [`voice()`](Self::voice).
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the prebuilt voice the model speaks with.
    pub fn voice(mut self, voice_name: impl Into<String>) -> Self {
        self.config.voice_name = voice_name.into();
        self
    }

    /// Set who the user is and whom the model should imitate.
    pub fn persona(mut self, persona: PersonaContext) -> Self {
        self.persona = persona;
        self
    }

    /// Set the microphone.
    ///
    /// Default: [`Microphone::default_device()`]
    pub fn input<I: AudioInput + 'static>(mut self, input: I) -> Self {
        self.input = Some(Arc::new(input));
        self
    }

    /// Set the speaker.
    ///
    /// Default: [`Speaker::default_device()`]
    pub fn output<O: OutputDevice + 'static>(mut self, output: O) -> Self {
        self.output = Some(Arc::new(output));
        self
    }

    /// Set how sessions are opened.
    ///
    /// Default: [`LiveConnector::from_config()`]
    pub fn connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include state changes, dropped frames, undecodable chunks and
    /// interruptions. The callback runs on the capture and dispatch tasks,
    /// so it must not block.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(CallEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Builds the controller. No device or session is opened until
    /// [`CallController::start()`].
    ///
    /// # Errors
    ///
    /// Returns [`VoiceCallError::MissingApiKey`] if no connector was set and
    /// the config has no API key.
    pub fn build(self) -> Result<CallController, VoiceCallError> {
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(LiveConnector::from_config(&self.config)?),
        };
        let input = self
            .input
            .unwrap_or_else(|| Arc::new(Microphone::default_device()));
        let output = self
            .output
            .unwrap_or_else(|| Arc::new(Speaker::default_device()));

        tracing::debug!(
            input = %input.name(),
            output = %output.name(),
            model = %self.config.model,
            "call controller built"
        );

        Ok(CallController::new(
            self.config,
            self.persona,
            input,
            output,
            connector,
            self.event_callback,
        ))
    }
}

impl std::fmt::Debug for CallControllerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallControllerBuilder")
            .field("voice_name", &self.config.voice_name)
            .field("persona", &self.persona)
            .field("has_input", &self.input.is_some())
            .field("has_output", &self.output.is_some())
            .field("has_connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}
