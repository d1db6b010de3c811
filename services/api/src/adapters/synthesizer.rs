//! services/api/src/adapters/synthesizer.rs
//!
//! This module contains the adapter for OpenAI's Text-to-Speech (TTS)
//! service. It implements the `SpeechSynthesizer` engine port from the `core`
//! crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{CreateSpeechRequest, SpeechModel, Voice},
    Client,
};
use async_trait::async_trait;
use german_coach_core::ports::{PortError, PortResult, SpeechSynthesizer, VoiceInfo};

/// Every voice the OpenAI TTS API can speak with.
const VOICE_NAMES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Parses a configured voice name into the API's `Voice` type.
pub fn parse_voice(name: &str) -> Option<Voice> {
    match name.to_lowercase().as_str() {
        "alloy" => Some(Voice::Alloy),
        "echo" => Some(Voice::Echo),
        "fable" => Some(Voice::Fable),
        "onyx" => Some(Voice::Onyx),
        "nova" => Some(Voice::Nova),
        "shimmer" => Some(Voice::Shimmer),
        _ => None,
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SpeechSynthesizer` port using the OpenAI
/// TTS API. The voice list is advertised for the configured speech language;
/// the premium flag mirrors the HD model.
#[derive(Clone)]
pub struct OpenAiTtsAdapter {
    client: Client<OpenAIConfig>,
    model: SpeechModel,
    default_voice: String,
    language: String,
}

impl OpenAiTtsAdapter {
    /// Creates a new `OpenAiTtsAdapter`.
    pub fn new(
        client: Client<OpenAIConfig>,
        model: SpeechModel,
        default_voice: String,
        language: String,
    ) -> Self {
        Self {
            client,
            model,
            default_voice,
            language,
        }
    }

    fn is_premium(&self) -> bool {
        matches!(self.model, SpeechModel::Tts1Hd)
    }
}

//=========================================================================================
// `SpeechSynthesizer` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpeechSynthesizer for OpenAiTtsAdapter {
    /// Advertises the engine's voices, the configured default first.
    fn voices(&self) -> Vec<VoiceInfo> {
        let mut names: Vec<&str> = VOICE_NAMES.to_vec();
        if let Some(position) = names.iter().position(|n| *n == self.default_voice) {
            names.swap(0, position);
        }
        names
            .into_iter()
            .map(|name| VoiceInfo {
                name: name.to_string(),
                language: self.language.clone(),
                premium: self.is_premium(),
            })
            .collect()
    }

    /// Generates a vector of audio data (`Vec<u8>`) from the given text.
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        _language: &str,
    ) -> PortResult<Vec<u8>> {
        let voice = voice
            .and_then(parse_voice)
            .or_else(|| parse_voice(&self.default_voice))
            .ok_or_else(|| {
                PortError::Unexpected(format!(
                    "Invalid TTS voice specified in config: '{}'",
                    self.default_voice
                ))
            })?;

        let request = CreateSpeechRequest {
            model: self.model.clone(),
            input: text.to_string(),
            voice,
            ..Default::default()
        };

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .audio()
            .speech()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        // The response contains a `bytes` field. We call `.to_vec()` on that field.
        Ok(response.bytes.to_vec())
    }
}
