//! services/api/src/adapters/recognizer.rs
//!
//! This module contains the adapter for OpenAI's Whisper speech-to-text
//! service. It implements the `SpeechRecognizer` engine port from the `core`
//! crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{AudioInput, CreateTranscriptionRequest},
    Client,
};
use async_trait::async_trait;
use german_coach_core::ports::{PortError, PortResult, SpeechRecognizer};
use hound::{WavSpec, WavWriter};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SpeechRecognizer` port using the OpenAI
/// Whisper API. The browser client captures raw PCM16 frames; they are
/// wrapped into a WAV container before transcription.
#[derive(Clone)]
pub struct WhisperRecognizerAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl WhisperRecognizerAdapter {
    /// Creates a new `WhisperRecognizerAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn pcm16_to_wav(pcm_data: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
        let mut cursor = std::io::Cursor::new(Vec::new());

        let spec = WavSpec {
            channels: 1, // Mono
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = WavWriter::new(&mut cursor, spec)?;

        // Convert byte array to i16 samples
        for chunk in pcm_data.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer.write_sample(sample)?;
        }

        writer.finalize()?;
        Ok(cursor.into_inner())
    }
}

/// Whisper expects an ISO-639-1 code, so `de-DE` becomes `de`.
fn primary_subtag(language: &str) -> &str {
    language.split('-').next().unwrap_or(language)
}

//=========================================================================================
// `SpeechRecognizer` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpeechRecognizer for WhisperRecognizerAdapter {
    /// Transcribes one captured phrase using the configured Whisper model.
    async fn recognize(&self, audio: &[u8], language: &str) -> PortResult<String> {
        let wav_data = Self::pcm16_to_wav(audio, 48000)
            .map_err(|e| PortError::Unexpected(format!("Failed to encode WAV: {}", e)))?;

        let input = AudioInput::from_vec_u8("user_audio.wav".into(), wav_data);

        let request = CreateTranscriptionRequest {
            file: input,
            model: self.model.clone(),
            language: Some(primary_subtag(language).to_string()),
            ..Default::default()
        };

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .audio()
            .transcription()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_frames_become_a_wav_container() {
        let pcm: Vec<u8> = (0i16..4)
            .flat_map(|sample| sample.to_le_bytes())
            .collect();
        let wav = WhisperRecognizerAdapter::pcm16_to_wav(&pcm, 48000).expect("encode");
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }

    #[test]
    fn language_tags_are_reduced_to_their_primary_subtag() {
        assert_eq!(primary_subtag("de-DE"), "de");
        assert_eq!(primary_subtag("de"), "de");
    }
}
