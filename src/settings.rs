// ============================================================================
// ENGINE SETTINGS — key=value config file for the adjustment/history engine
// ============================================================================

use std::path::{Path, PathBuf};

use crate::buffer::ColorDepth;
use crate::error::EngineError;
use crate::ops::adjustments::BackendPreference;
use crate::ops::denoise::DenoiseStrategy;

const SETTINGS_FILE: &str = "refstudio_settings.cfg";

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub gpu_acceleration: bool,
    /// "high performance" or "low power".
    pub preferred_gpu: String,
    pub backend: BackendPreference,
    pub max_undo_steps: usize,
    /// History memory cap in MiB; 0 disables the cap.
    pub max_history_mb: usize,
    pub default_denoise: DenoiseStrategy,
    pub render_depth: ColorDepth,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            gpu_acceleration: true,
            preferred_gpu: "high performance".to_string(),
            backend: BackendPreference::Auto,
            max_undo_steps: 50,
            max_history_mb: 100,
            default_denoise: DenoiseStrategy::Median,
            render_depth: ColorDepth::U8,
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/refstudio/refstudio_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\RefStudio\refstudio_settings.cfg
    /// On macOS:   ~/Library/Application Support/RefStudio/refstudio_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("refstudio");
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("RefStudio").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("RefStudio")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// History memory cap in bytes, `None` when disabled.
    pub fn history_memory_limit(&self) -> Option<usize> {
        (self.max_history_mb > 0).then(|| self.max_history_mb * 1024 * 1024)
    }

    /// Load from the platform path; defaults when missing or unreadable.
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) -> Result<(), EngineError> {
        let path = Self::settings_path().ok_or_else(|| {
            EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no settings directory for this platform",
            ))
        })?;
        self.save_to(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    /// Parse `key=value` lines.  Unknown keys are ignored and malformed
    /// values keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "gpu_acceleration" => {
                    s.gpu_acceleration = val == "true";
                }
                "preferred_gpu" => {
                    s.preferred_gpu = val.to_string();
                }
                "backend" => {
                    s.backend = match val {
                        "cpu" => BackendPreference::Cpu,
                        _ => BackendPreference::Auto,
                    };
                }
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse().unwrap_or(50);
                }
                "max_history_mb" => {
                    s.max_history_mb = val.parse().unwrap_or(100);
                }
                "default_denoise" => {
                    s.default_denoise = DenoiseStrategy::from_key(val).unwrap_or_default();
                }
                "render_depth" => {
                    s.render_depth = match val {
                        "16" => ColorDepth::U16,
                        "32f" => ColorDepth::F32,
                        _ => ColorDepth::U8,
                    };
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        let backend_str = match self.backend {
            BackendPreference::Auto => "auto",
            BackendPreference::Cpu => "cpu",
        };
        let depth_str = match self.render_depth {
            ColorDepth::U8 => "8",
            ColorDepth::U16 => "16",
            ColorDepth::F32 => "32f",
        };
        format!(
            "gpu_acceleration={}\n\
             preferred_gpu={}\n\
             backend={backend_str}\n\
             max_undo_steps={}\n\
             max_history_mb={}\n\
             default_denoise={}\n\
             render_depth={depth_str}\n",
            self.gpu_acceleration,
            self.preferred_gpu,
            self.max_undo_steps,
            self.max_history_mb,
            self.default_denoise.key(),
        )
    }
}
