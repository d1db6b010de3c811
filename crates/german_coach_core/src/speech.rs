//! crates/german_coach_core/src/speech.rs
//!
//! The speech adapter: wraps a pair of injected recognizer/synthesizer
//! engines behind the `listen()`/`speak()`/`stop()` contract used by the
//! conversation flow. Platforms without speech support inject
//! [`NullSpeechEngine`] instead of probing the environment.

use crate::ports::{PortError, PortResult, SpeechRecognizer, SpeechSynthesizer, VoiceInfo};
use async_trait::async_trait;
use futures::future::Either;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Picks the best advertised voice for a language tag: a premium-flagged
/// voice among exact matches first, then any exact match, then a
/// language-family match, else `None` (engine default).
pub fn select_voice<'a>(voices: &'a [VoiceInfo], language: &str) -> Option<&'a VoiceInfo> {
    let exact: Vec<&VoiceInfo> = voices.iter().filter(|v| v.language == language).collect();
    if let Some(premium) = exact.iter().copied().find(|v| v.premium) {
        return Some(premium);
    }
    if let Some(first) = exact.first().copied() {
        return Some(first);
    }
    let family = language.split('-').next().unwrap_or(language);
    voices.iter().find(|v| v.language.starts_with(family))
}

//=========================================================================================
// Speech Adapter
//=========================================================================================

pub struct SpeechAdapter {
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    listening: AtomicBool,
    speak_token: Mutex<CancellationToken>,
}

impl SpeechAdapter {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            listening: AtomicBool::new(false),
            speak_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Runs one captured phrase through the recognizer. At most one cycle may
    /// be outstanding: a call while already listening resolves to an empty
    /// transcript. An empty recognition result is the distinguished
    /// no-speech condition.
    pub async fn listen(&self, audio: &[u8], language: &str) -> PortResult<String> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(String::new());
        }

        let result = self.recognizer.recognize(audio, language).await;
        self.listening.store(false, Ordering::SeqCst);

        match result {
            Ok(transcript) if transcript.trim().is_empty() => Err(PortError::NoSpeech),
            other => other,
        }
    }

    /// Renders text to playback audio. A synthesis already in progress is
    /// cancelled first: the last caller wins and the superseded call yields
    /// no audio. Utterances are never queued.
    pub async fn speak(&self, text: &str, language: &str) -> PortResult<Vec<u8>> {
        let token = {
            let mut guard = self.speak_token.lock().expect("speak token lock poisoned");
            guard.cancel();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let voices = self.synthesizer.voices();
        let voice = select_voice(&voices, language).map(|v| v.name.clone());

        let synthesis = Box::pin(self.synthesizer.synthesize(text, voice.as_deref(), language));
        let cancelled = Box::pin(token.cancelled());
        let outcome = match futures::future::select(synthesis, cancelled).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => Ok(Vec::new()),
        };
        outcome
    }

    /// Cancels any in-flight recognition and synthesis. Idempotent; harmless
    /// when neither is active.
    pub fn stop(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.speak_token
            .lock()
            .expect("speak token lock poisoned")
            .cancel();
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

//=========================================================================================
// Null Engine
//=========================================================================================

/// The "not supported" engine: every operation fails with a speech-
/// unavailable error and no voices are advertised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSpeechEngine;

#[async_trait]
impl SpeechRecognizer for NullSpeechEngine {
    async fn recognize(&self, _audio: &[u8], _language: &str) -> PortResult<String> {
        Err(PortError::SpeechUnavailable(
            "speech recognition is not supported on this platform".to_string(),
        ))
    }
}

#[async_trait]
impl SpeechSynthesizer for NullSpeechEngine {
    fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }

    async fn synthesize(
        &self,
        _text: &str,
        _voice: Option<&str>,
        _language: &str,
    ) -> PortResult<Vec<u8>> {
        Err(PortError::SpeechUnavailable(
            "speech synthesis is not supported on this platform".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    fn voice(name: &str, language: &str, premium: bool) -> VoiceInfo {
        VoiceInfo {
            name: name.to_string(),
            language: language.to_string(),
            premium,
        }
    }

    #[test]
    fn voice_selection_prefers_premium_exact_matches() {
        let voices = vec![
            voice("anna", "de-DE", false),
            voice("vicki", "de-DE", true),
            voice("marlene", "de-AT", false),
        ];
        assert_eq!(select_voice(&voices, "de-DE").unwrap().name, "vicki");
    }

    #[test]
    fn voice_selection_falls_back_to_the_language_family() {
        let voices = vec![voice("joey", "en-US", false), voice("marlene", "de-AT", false)];
        assert_eq!(select_voice(&voices, "de-DE").unwrap().name, "marlene");
    }

    #[test]
    fn voice_selection_yields_none_without_any_match() {
        let voices = vec![voice("joey", "en-US", false)];
        assert!(select_voice(&voices, "de-DE").is_none());
    }

    struct BlockingRecognizer {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SpeechRecognizer for BlockingRecognizer {
        async fn recognize(&self, _audio: &[u8], _language: &str) -> PortResult<String> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("Ich gehe in die Schule".to_string())
        }
    }

    struct FixedRecognizer(String);

    #[async_trait]
    impl SpeechRecognizer for FixedRecognizer {
        async fn recognize(&self, _audio: &[u8], _language: &str) -> PortResult<String> {
            Ok(self.0.clone())
        }
    }

    struct StickySynthesizer {
        first_call_blocks: AtomicBool,
        started: Notify,
        never: Notify,
    }

    #[async_trait]
    impl SpeechSynthesizer for StickySynthesizer {
        fn voices(&self) -> Vec<VoiceInfo> {
            vec![voice("anna", "de-DE", false)]
        }

        async fn synthesize(
            &self,
            _text: &str,
            _voice: Option<&str>,
            _language: &str,
        ) -> PortResult<Vec<u8>> {
            if self.first_call_blocks.swap(false, Ordering::SeqCst) {
                self.started.notify_one();
                self.never.notified().await;
            }
            Ok(b"audio".to_vec())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn a_second_listen_resolves_empty_while_one_is_outstanding() {
        let recognizer = Arc::new(BlockingRecognizer {
            started: Notify::new(),
            release: Notify::new(),
        });
        let adapter = Arc::new(SpeechAdapter::new(
            recognizer.clone(),
            Arc::new(NullSpeechEngine),
        ));

        let first = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.listen(b"pcm", "de-DE").await })
        };
        recognizer.started.notified().await;

        assert_eq!(adapter.listen(b"pcm", "de-DE").await.unwrap(), "");

        recognizer.release.notify_one();
        let transcript = first.await.unwrap().unwrap();
        assert_eq!(transcript, "Ich gehe in die Schule");
        assert!(!adapter.is_listening());
    }

    #[tokio::test]
    async fn an_empty_transcript_is_the_no_speech_condition() {
        let adapter = SpeechAdapter::new(
            Arc::new(FixedRecognizer("   ".to_string())),
            Arc::new(NullSpeechEngine),
        );
        assert!(matches!(
            adapter.listen(b"pcm", "de-DE").await,
            Err(PortError::NoSpeech)
        ));
        assert!(!adapter.is_listening());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn a_later_speak_supersedes_an_inflight_one() {
        let synthesizer = Arc::new(StickySynthesizer {
            first_call_blocks: AtomicBool::new(true),
            started: Notify::new(),
            never: Notify::new(),
        });
        let adapter = Arc::new(SpeechAdapter::new(
            Arc::new(NullSpeechEngine),
            synthesizer.clone(),
        ));

        let first = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.speak("Guten Tag", "de-DE").await })
        };
        synthesizer.started.notified().await;

        let second = adapter.speak("Auf Wiedersehen", "de-DE").await.unwrap();
        assert_eq!(second, b"audio");

        // The superseded call completes without audio instead of erroring.
        let superseded = first.await.unwrap().unwrap();
        assert!(superseded.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_leaves_the_adapter_usable() {
        let adapter = SpeechAdapter::new(
            Arc::new(FixedRecognizer("Hallo".to_string())),
            Arc::new(StickySynthesizer {
                first_call_blocks: AtomicBool::new(false),
                started: Notify::new(),
                never: Notify::new(),
            }),
        );

        adapter.stop();
        adapter.stop();

        assert_eq!(adapter.listen(b"pcm", "de-DE").await.unwrap(), "Hallo");
        assert_eq!(adapter.speak("Hallo", "de-DE").await.unwrap(), b"audio");
    }
}
