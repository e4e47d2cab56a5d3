use lazy_static::lazy_static;
use serde::Deserialize;
use tracing::warn;

use crate::utils::detection_utils::REQUIRED_PPE;

lazy_static! {
    pub static ref CONFIG: Config = Config::load();
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub model: Model,
    pub detection: Detection,
    pub session: Session,
    pub alerts: Alerts,
    pub output: Output,
    pub report: Report,
}

impl Config {
    /// Reads the TOML file named by `CONFIG_PATH` (set from the CLI before
    /// first access). A missing or unreadable file falls back to the built-in
    /// defaults so the service can still run and tests stay hermetic.
    fn load() -> Self {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(err) => {
                    warn!("Could not parse {}: {}. Using default configuration", path, err);
                    Config::default()
                }
            },
            Err(err) => {
                warn!("Could not read {}: {}. Using default configuration", path, err);
                Config::default()
            }
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Model {
    pub api_url: String,
    /// Class-index-to-name table of the deployed model.
    pub class_names: Vec<String>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8500/detect".to_string(),
            class_names: REQUIRED_PPE.iter().map(|item| item.to_string()).collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Detection {
    pub confidence_threshold: f32,
    pub target_height: u32,
    pub required_ppe: Vec<String>,
}

impl Default for Detection {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            target_height: 640,
            required_ppe: REQUIRED_PPE.iter().map(|item| item.to_string()).collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Session {
    pub camera_url: String,
    pub frame_skip: u64,
    pub alert_cooldown_secs: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            camera_url: "/dev/video0".to_string(),
            frame_skip: 3,
            alert_cooldown_secs: 5,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Alerts {
    pub enabled: bool,
    pub tts_api_url: String,
    pub language: String,
    pub fallback_command: String,
    pub player_command: String,
    /// Violation alert templates; `{items}` expands to the missing list.
    pub violation_messages: Vec<String>,
    pub compliance_message: String,
}

impl Default for Alerts {
    fn default() -> Self {
        Self {
            enabled: true,
            tts_api_url: "http://127.0.0.1:5002/api/tts".to_string(),
            language: "en".to_string(),
            fallback_command: "espeak-ng".to_string(),
            player_command: "ffplay".to_string(),
            violation_messages: vec![
                "Warning! Missing safety equipment: {items}".to_string(),
                "Safety alert! Please put on your {items}".to_string(),
            ],
            compliance_message: "All safety equipment detected".to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Output {
    pub folder: String,
    pub display_filename: String,
    pub line_color: [u8; 4],
    pub text_color: [u8; 4],
    pub line_thickness: u32,
    pub font_path: String,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            folder: "output".to_string(),
            display_filename: "live_view.jpg".to_string(),
            line_color: [255, 160, 0, 255],
            text_color: [255, 255, 255, 255],
            line_thickness: 3,
            font_path: "assets/DejaVuSans.ttf".to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Report {
    pub font_dir: String,
    pub font_name: String,
    pub title: String,
    pub subtitle: String,
    pub footer: String,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            font_dir: "assets/fonts".to_string(),
            font_name: "DejaVuSans".to_string(),
            title: "PPE Compliance Report".to_string(),
            subtitle: "Generated by SafetyGuard AI".to_string(),
            footer: "SafetyGuard - Confidential".to_string(),
        }
    }
}
