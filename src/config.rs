use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub push_base_url: String,
    /// Last selected character; restored at startup to re-establish the
    /// push channel context without user interaction.
    pub active_character_id: Option<String>,
    pub character_group_ids: Vec<String>,
    /// Recorded system-notification permission state. The core never
    /// prompts; the host flips this after the environment grants it.
    pub system_notices_granted: bool,
    pub alert_sound_path: String,
    pub sound_volume: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".to_owned(),
            push_base_url: "ws://127.0.0.1:8000".to_owned(),
            active_character_id: None,
            character_group_ids: Vec::new(),
            system_notices_granted: false,
            alert_sound_path: "assets/alert.ogg".to_owned(),
            sound_volume: 1.0,
        }
    }
}

impl ClientConfig {
    pub fn load_or_create() -> Result<(Self, PathBuf)> {
        let config_dir = dirs::config_dir()
            .context("unable to locate OS config directory")?
            .join("ritewatch");
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed creating config dir at {}", config_dir.display()))?;

        let config_path = config_dir.join("config.json");
        if !config_path.exists() {
            let default = Self::default();
            default.save(&config_path)?;
            return Ok((default, config_path));
        }

        let text = fs::read_to_string(&config_path)
            .with_context(|| format!("failed reading {}", config_path.display()))?;
        let config = serde_json::from_str::<Self>(&text)
            .with_context(|| format!("invalid json in {}", config_path.display()))?;
        Ok((config, config_path))
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let payload = serde_json::to_string_pretty(self).context("failed serializing config")?;
        fs::write(path, payload).with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }
}
