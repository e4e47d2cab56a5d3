use std::io::Write;
use std::process::{Command, Stdio};

use enum_dispatch::enum_dispatch;
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::error::SafetyGuardError;

/// One way of turning alert text into audible speech. `speak` blocks until
/// playback has fully finished, which is what serializes the alert queue.
#[enum_dispatch(SynthesizerType)]
pub trait SpeechSynthesizer {
    fn speak(&self, message: &str) -> Result<(), SafetyGuardError>;

    fn name(&self) -> &'static str;
}

#[enum_dispatch]
#[derive(Clone)]
pub enum SynthesizerType {
    HttpTtsSynthesizer(HttpTtsSynthesizer),
    CommandSynthesizer(CommandSynthesizer),
    #[cfg(test)]
    RecordingSynthesizer(std::sync::Arc<RecordingSynthesizer>),
}

// enum_dispatch does not generate conversions for wrapped inner types.
#[cfg(test)]
impl From<RecordingSynthesizer> for SynthesizerType {
    fn from(synthesizer: RecordingSynthesizer) -> Self {
        SynthesizerType::RecordingSynthesizer(std::sync::Arc::new(synthesizer))
    }
}

#[cfg(test)]
impl SpeechSynthesizer for std::sync::Arc<RecordingSynthesizer> {
    fn speak(&self, message: &str) -> Result<(), SafetyGuardError> {
        (**self).speak(message)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Primary engine: fetches synthesized audio from the configured TTS API into
/// a transient file and plays it through the configured player.
#[derive(Clone)]
pub struct HttpTtsSynthesizer {
    api_url: String,
    language: String,
    player_command: String,
}

impl HttpTtsSynthesizer {
    pub fn from_config() -> Self {
        Self {
            api_url: CONFIG.alerts.tts_api_url.clone(),
            language: CONFIG.alerts.language.clone(),
            player_command: CONFIG.alerts.player_command.clone(),
        }
    }
}

impl SpeechSynthesizer for HttpTtsSynthesizer {
    fn speak(&self, message: &str) -> Result<(), SafetyGuardError> {
        // The blocking client must live on the alert worker thread; speak is
        // only ever called there.
        let audio = reqwest::blocking::Client::new()
            .get(&self.api_url)
            .query(&[("text", message), ("lang", self.language.as_str())])
            .send()?
            .error_for_status()?
            .bytes()?;

        // Transient artifact; removed when the handle drops, and the removal
        // never raises even if the file is already gone.
        let mut clip = tempfile::Builder::new()
            .prefix("safetyguard-alert-")
            .suffix(".mp3")
            .tempfile()?;
        clip.write_all(&audio)?;
        clip.flush()?;

        let status = Command::new(&self.player_command)
            .arg("-nodisp")
            .arg("-autoexit")
            .arg("-loglevel")
            .arg("quiet")
            .arg(clip.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(SafetyGuardError::SpeechError(format!(
                "{} exited with {}",
                self.player_command, status
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http-tts"
    }
}

/// Offline fallback engine: hands the text to a local synthesis command.
#[derive(Clone)]
pub struct CommandSynthesizer {
    command: String,
}

impl CommandSynthesizer {
    pub fn from_config() -> Self {
        Self {
            command: CONFIG.alerts.fallback_command.clone(),
        }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn speak(&self, message: &str) -> Result<(), SafetyGuardError> {
        let status = Command::new(&self.command)
            .arg(message)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(SafetyGuardError::SpeechError(format!(
                "{} exited with {}",
                self.command, status
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "offline-tts"
    }
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingSynthesizer {
    pub spoken: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    pub should_fail: bool,
}

#[cfg(test)]
impl RecordingSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, should_fail: bool) -> Self {
        self.should_fail = should_fail;
        self
    }

    pub fn spoken_messages(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SpeechSynthesizer for RecordingSynthesizer {
    fn speak(&self, message: &str) -> Result<(), SafetyGuardError> {
        self.spoken.lock().unwrap().push(message.to_string());
        if self.should_fail {
            return Err(SafetyGuardError::SpeechError(
                "Mock synthesis failure".to_string(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// The primary-then-fallback chain the alert worker speaks through.
#[derive(Clone)]
pub struct SpeechService {
    engines: Vec<SynthesizerType>,
}

impl SpeechService {
    pub fn from_config() -> Self {
        Self {
            engines: vec![
                HttpTtsSynthesizer::from_config().into(),
                CommandSynthesizer::from_config().into(),
            ],
        }
    }

    pub fn with_engines(engines: Vec<SynthesizerType>) -> Self {
        Self { engines }
    }

    /// Try each engine in order until one speaks the message. A total failure
    /// is returned to the caller, who logs and swallows it; it must never
    /// take the alert worker down.
    pub fn speak(&self, message: &str) -> Result<(), SafetyGuardError> {
        let mut last_error = None;
        for engine in &self.engines {
            match engine.speak(message) {
                Ok(()) => {
                    debug!("Alert spoken via {}", engine.name());
                    return Ok(());
                }
                Err(err) => {
                    warn!("Speech engine {} failed: {}", engine.name(), err);
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            SafetyGuardError::SpeechError("No speech engines configured".to_string())
        }))
    }
}
