//! Error types for streamscribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Unknown language '{language}'")]
    UnknownLanguage { language: String },

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Audio file errors
    #[error("Failed to decode WAV file '{path}': {message}")]
    WavDecode { path: String, message: String },

    // VAD errors
    #[error("VAD model not found at {path}")]
    VadModelNotFound { path: String },

    #[error("VAD inference failed: {message}")]
    VadInference { message: String },

    #[error("VAD session error: {message}")]
    VadSession { message: String },

    // Acoustic model errors
    #[error("Acoustic model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Failed to load acoustic model: {message}")]
    ModelLoad { message: String },

    #[error("Decode failed: {message}")]
    Decode { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ScribeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_unknown_language_display() {
        let error = ScribeError::UnknownLanguage {
            language: "xx".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown language 'xx'");
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = ScribeError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_wav_decode_display() {
        let error = ScribeError::WavDecode {
            path: "/tmp/a.wav".to_string(),
            message: "no data chunk".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to decode WAV file '/tmp/a.wav': no data chunk"
        );
    }

    #[test]
    fn test_model_not_found_display() {
        let error = ScribeError::ModelNotFound {
            path: "/models/ggml-base.en.bin".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Acoustic model not found at /models/ggml-base.en.bin"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ScribeError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ScribeError>();
        assert_sync::<ScribeError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
