//! Optional configuration file for machine-level defaults.
//!
//! Lives at `~/.config/streamscribe/config.toml`; every field is optional
//! and explicit CLI flags always win. Environment variables
//! (`STREAMSCRIBE_*`) sit between the two.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Machine-level defaults: model paths, language, capture device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub model: Option<PathBuf>,
    pub silero_vad: Option<PathBuf>,
    pub language: Option<String>,
    pub threads: Option<i32>,
    pub capture_id: Option<usize>,
    pub dictionary_file: Option<PathBuf>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| crate::error::ScribeError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Load from a file, falling back to defaults when the file is missing.
    /// Invalid TOML is still an error: a half-applied config is worse than
    /// no config.
    pub fn load_or_default(path: &Path) -> crate::error::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(crate::error::ScribeError::Io(e))
                if e.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported:
    /// - STREAMSCRIBE_MODEL → model
    /// - STREAMSCRIBE_SILERO_VAD → silero_vad
    /// - STREAMSCRIBE_LANGUAGE → language
    /// - STREAMSCRIBE_DICTIONARY_FILE → dictionary_file
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("STREAMSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.model = Some(PathBuf::from(model));
        }

        if let Ok(vad) = std::env::var("STREAMSCRIBE_SILERO_VAD")
            && !vad.is_empty()
        {
            self.silero_vad = Some(PathBuf::from(vad));
        }

        if let Ok(language) = std::env::var("STREAMSCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.language = Some(language);
        }

        if let Ok(dict) = std::env::var("STREAMSCRIBE_DICTIONARY_FILE")
            && !dict.is_empty()
        {
            self.dictionary_file = Some(PathBuf::from(dict));
        }

        self
    }

    /// Default configuration file path
    /// (`~/.config/streamscribe/config.toml` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("streamscribe").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ConfigFile::load_or_default(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn parses_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "model = \"/models/ggml-small.en.bin\"").unwrap();
        writeln!(file, "language = \"en\"").unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.model, Some(PathBuf::from("/models/ggml-small.en.bin")));
        assert_eq!(config.language, Some("en".to_string()));
        assert_eq!(config.silero_vad, None);
        assert_eq!(config.capture_id, None);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [unclosed").unwrap();

        let result = ConfigFile::load_or_default(&path);
        assert!(result.is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = ConfigFile {
            model: Some(PathBuf::from("/m.bin")),
            silero_vad: Some(PathBuf::from("/v.onnx")),
            language: Some("de".to_string()),
            threads: Some(4),
            capture_id: Some(1),
            dictionary_file: Some(PathBuf::from("words.txt")),
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: ConfigFile = toml::from_str(&text).unwrap();
        assert_eq!(config, parsed);
    }
}
