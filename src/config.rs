use std::fs;
use std::io;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Telegram bot token; the BOT_TOKEN environment variable takes priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    /// Directory for temporary repository clones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<String>,
    #[serde(default = "default_api_base")]
    pub cloudflare_api_base: String,
    #[serde(default = "default_workers_subdomain")]
    pub workers_subdomain: String,
}

fn default_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_workers_subdomain() -> String {
    "workers.dev".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_token: None,
            temp_dir: None,
            cloudflare_api_base: default_api_base(),
            workers_subdomain: default_workers_subdomain(),
        }
    }
}

impl Settings {
    /// Returns the config directory path (~/.cfworkerbot)
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".cfworkerbot"))
    }

    /// Returns the config file path (~/.cfworkerbot/settings.json)
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("settings.json"))
    }

    /// Returns the session store path (~/.cfworkerbot/sessions.json)
    pub fn sessions_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("sessions.json"))
    }

    /// Ensures the config directory and default settings file exist.
    /// Called on startup.
    pub fn ensure_config_exists() {
        if let Some(config_dir) = Self::config_dir() {
            if !config_dir.exists() && fs::create_dir_all(&config_dir).is_ok() {
                // Credentials live under this directory; user-only access on Unix
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = fs::Permissions::from_mode(0o700);
                    let _ = fs::set_permissions(&config_dir, perms);
                }
            }
        }

        if let Some(config_path) = Self::config_path() {
            if !config_path.exists() {
                let _ = Self::default().save();
            }
        }
    }

    /// Loads settings from the config file, returns default if not found or invalid
    pub fn load() -> Self {
        Self::load_with_error().unwrap_or_default()
    }

    /// Loads settings from the config file with error information
    pub fn load_with_error() -> Result<Self, String> {
        Self::ensure_config_exists();

        let config_path = Self::config_path()
            .ok_or_else(|| "Could not determine config path".to_string())?;

        let content = fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read settings file: {}", e))?;

        serde_json::from_str(&content)
            .map_err(|e| format!("Invalid JSON in settings.json: {}", e))
    }

    /// Saves settings to the config file using atomic write pattern
    pub fn save(&self) -> io::Result<()> {
        let Some(config_dir) = Self::config_dir() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine config directory",
            ));
        };

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o700);
                let _ = fs::set_permissions(&config_dir, perms);
            }
        }

        let config_path = config_dir.join("settings.json");
        let temp_path = config_dir.join("settings.json.tmp");
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write: write to temp file first, then rename
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    /// Resolves the bot token: BOT_TOKEN env var first, then settings file.
    pub fn resolve_bot_token(&self) -> Option<String> {
        std::env::var("BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.bot_token.clone())
    }

    /// Directory for temporary repository clones.
    /// Falls back to <system temp>/cfworkerbot.
    pub fn clone_temp_dir(&self) -> PathBuf {
        match &self.temp_dir {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir().join("cfworkerbot"),
        }
    }
}
