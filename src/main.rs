use clap::Parser;
use streamscribe::cli::Cli;
use std::process::ExitCode;

#[cfg(not(feature = "whisper"))]
fn main() -> ExitCode {
    eprintln!(
        "streamscribe: built without the `whisper` feature; rebuild with \
         `cargo build --release` (whisper is enabled by default)"
    );
    ExitCode::from(1)
}

#[cfg(feature = "whisper")]
fn main() -> ExitCode {
    run(Cli::parse())
}

#[cfg(feature = "whisper")]
fn run(cli: Cli) -> ExitCode {
    use std::sync::Arc;
    use streamscribe::audio::{CaptureRing, MicCapture};
    use streamscribe::cli::Settings;
    use streamscribe::config::ConfigFile;
    use streamscribe::defaults::SAMPLE_RATE;
    use streamscribe::dictionary::DictionaryManager;
    use streamscribe::events::{EventSink, LogitsLogWriter, StreamEvent};
    use streamscribe::pipeline::{Pipeline, runner};
    use streamscribe::stt::WhisperModel;
    use streamscribe::stt::whisper::known_language;
    use streamscribe::vad::SileroVad;

    let config_path = cli.config.clone().or_else(ConfigFile::default_path);
    let config = match config_path {
        Some(path) => match ConfigFile::load_or_default(&path) {
            Ok(config) => config.with_env_overrides(),
            Err(e) => {
                eprintln!("streamscribe: failed to load config '{}': {}", path.display(), e);
                return ExitCode::from(1);
            }
        },
        None => ConfigFile::default().with_env_overrides(),
    };

    let settings = Settings::resolve(cli, config);

    let Some(vad_model_path) = settings.vad_model.clone() else {
        eprintln!("streamscribe: error: --silero-vad path required");
        return ExitCode::from(1);
    };
    if !settings.model.exists() {
        eprintln!(
            "streamscribe: error: whisper model not found at '{}'",
            settings.model.display()
        );
        return ExitCode::from(1);
    }
    if !vad_model_path.exists() {
        eprintln!(
            "streamscribe: error: silero VAD model not found at '{}'",
            vad_model_path.display()
        );
        return ExitCode::from(1);
    }
    if settings.language != streamscribe::defaults::AUTO_LANGUAGE
        && !known_language(&settings.language)
    {
        eprintln!("streamscribe: error: unknown language '{}'", settings.language);
        return ExitCode::from(1);
    }

    let use_mic = settings.audio_file.is_none() && !settings.stdin_audio && !settings.stdin_pcm;
    let mut live_capture: Option<(Arc<CaptureRing>, MicCapture)> = None;
    if use_mic {
        let ring = Arc::new(CaptureRing::new(settings.effective_ring_ms(), SAMPLE_RATE));
        let capture = match MicCapture::init(settings.capture_id, Arc::clone(&ring)) {
            Ok(capture) => capture,
            Err(e) => {
                eprintln!("streamscribe: audio capture init failed: {}", e);
                return ExitCode::from(1);
            }
        };
        if !capture.resume() {
            eprintln!("streamscribe: failed to start audio capture");
            return ExitCode::from(1);
        }
        live_capture = Some((ring, capture));
    }

    let model = match WhisperModel::load(&settings.model, settings.use_gpu) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("streamscribe: {}", e);
            return ExitCode::from(2);
        }
    };

    let vad = match SileroVad::load(&vad_model_path) {
        Ok(vad) => vad,
        Err(e) => {
            eprintln!("streamscribe: failed to initialize Silero VAD: {}", e);
            return ExitCode::from(1);
        }
    };

    let log_writer = if settings.logits_file_enabled() {
        let path = settings
            .logits_log_path
            .clone()
            .unwrap_or_else(|| streamscribe::defaults::LOGITS_LOG_PATH.into());
        let path = std::path::absolute(&path).unwrap_or(path);
        match LogitsLogWriter::open(&path, settings.logits_flush_ms as u64) {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!(
                    "streamscribe: warning: failed to open '{}' for append: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    } else {
        None
    };

    let sink = EventSink::new(
        settings.stdout_logits_packets(),
        settings.dictionary_to_file(),
        log_writer,
    );

    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let dictionary_file = settings
        .dictionary_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let logits_log_path = sink
        .log_path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    eprintln!(
        "streamscribe ready: cwd='{}' dict='{}' send_prompt={} bias_decoding={} bias_first={:.3} bias_cont={:.3} logits_log='{}'",
        cwd,
        dictionary_file,
        settings.send_prompt as u8,
        settings.bias_decoding as u8,
        settings.bias_first_logit,
        settings.bias_continuation_logit,
        logits_log_path,
    );
    sink.emit(&StreamEvent::Ready {
        cwd,
        dictionary_file,
        send_prompt: settings.send_prompt,
        bias_decoding: settings.bias_decoding,
        bias_first_logit: settings.bias_first_logit,
        bias_continuation_logit: settings.bias_continuation_logit,
        logits_log_path,
        logits_log_enabled: sink.log_enabled(),
    });

    let dictionary = DictionaryManager::new(
        settings.dictionary_file.clone(),
        std::time::Duration::from_millis(settings.dictionary_poll_ms as u64),
        settings.verbose_dictionary_packets(),
        settings.debug,
    );

    let mut pipeline = Pipeline::new(
        model,
        vad,
        dictionary,
        sink,
        settings.segmenter_config(),
        settings.decode_options(),
        settings.emit_vad_events,
    );
    pipeline.startup_dictionary_reload();

    let result = if let Some((ring, capture)) = &live_capture {
        runner::run_live(&mut pipeline, capture, ring, settings.fetch_window_ms())
    } else if settings.stdin_audio {
        runner::run_stdin_audio(&mut pipeline)
    } else if settings.stdin_pcm {
        runner::run_stdin_pcm(&mut pipeline)
    } else if let Some(audio_file) = settings.audio_file.clone() {
        runner::run_offline(&mut pipeline, &audio_file, settings.debug)
    } else {
        Ok(())
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("streamscribe: {}", e);
            ExitCode::from(1)
        }
    }
}
