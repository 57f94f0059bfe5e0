/*!
 * Shared command-line driver for the per-provider binaries.
 *
 * Every binary (`gpt-subtrans`, `claude-subtrans`, ...) parses the same
 * argument set and calls `run` with its provider preset; the generic
 * `llm-subtrans` binary picks the provider from `--provider` or targets
 * a custom server.
 *
 * Exit codes: 0 success, 1 translation failed, 2 invalid arguments or
 * configuration, 3 user abort.
 */

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::project::{ProjectMode, SubtitleProject};
use crate::providers::{create_client, ProviderKind};
use crate::settings::Settings;
use crate::translation::SubtitleTranslator;

/// Exit code for a successful run
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when translation failed
pub const EXIT_TRANSLATION_FAILED: i32 = 1;
/// Exit code for invalid arguments or configuration
pub const EXIT_INVALID_CONFIG: i32 = 2;
/// Exit code when the user aborted the run
pub const EXIT_ABORTED: i32 = 3;

/// CLI wrapper for ProviderKind to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliProvider {
    OpenAI,
    Claude,
    Gemini,
    Mistral,
    DeepSeek,
    Bedrock,
    Custom,
}

impl From<CliProvider> for ProviderKind {
    fn from(provider: CliProvider) -> Self {
        match provider {
            CliProvider::OpenAI => ProviderKind::OpenAI,
            CliProvider::Claude => ProviderKind::Claude,
            CliProvider::Gemini => ProviderKind::Gemini,
            CliProvider::Mistral => ProviderKind::Mistral,
            CliProvider::DeepSeek => ProviderKind::DeepSeek,
            CliProvider::Bedrock => ProviderKind::Bedrock,
            CliProvider::Custom => ProviderKind::Custom,
        }
    }
}

/// CLI wrapper for ProjectMode to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliProjectMode {
    Persistent,
    Read,
    Write,
}

impl From<CliProjectMode> for ProjectMode {
    fn from(mode: CliProjectMode) -> Self {
        match mode {
            CliProjectMode::Persistent => ProjectMode::Persistent,
            CliProjectMode::Read => ProjectMode::Read,
            CliProjectMode::Write => ProjectMode::Write,
        }
    }
}

/// Translate subtitle files with an LLM provider
#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Translate subtitle files with an LLM provider")]
struct CliOptions {
    /// Subtitle file to translate (.srt, .vtt, .ass, .ssa or .subtrans)
    #[arg(value_name = "INPUT_PATH")]
    input: PathBuf,

    /// API key for the provider
    #[arg(short = 'k', long)]
    apikey: Option<String>,

    /// Model to request translations from
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Output path for the translated subtitles
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Language to translate into (name or ISO 639-1 code)
    #[arg(short = 'l', long)]
    target_language: Option<String>,

    /// Prompt template for the translation request
    #[arg(short = 'p', long)]
    prompt: Option<String>,

    /// Build prompts without contacting the provider
    #[arg(short = 'r', long)]
    preview: bool,

    /// File containing prompt and instruction sections
    #[arg(long = "instructions-file")]
    instructions_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Project file handling: persistent, read or write
    #[arg(long, value_enum)]
    project: Option<CliProjectMode>,

    /// Provider to translate with (when the binary has no preset)
    #[arg(long, value_enum)]
    provider: Option<CliProvider>,

    /// Address of a custom translation server
    #[arg(long)]
    server_address: Option<String>,

    /// Endpoint path on the custom server
    #[arg(long)]
    endpoint: Option<String>,
}

/// Coloured, timestamped stderr logger for the CLI
struct CliLogger {
    level: LevelFilter,
}

impl CliLogger {
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CliLogger { level }))?;
        log::set_max_level(level);
        Ok(())
    }

    fn colour_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CliLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {:5} {}\x1B[0m",
                Self::colour_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Expand an ISO 639-1 code to the language's English name; full names
/// pass through unchanged.
fn resolve_language(language: &str) -> String {
    if language.len() == 2 {
        if let Some(resolved) = isolang::Language::from_639_1(&language.to_lowercase()) {
            return resolved.to_name().to_string();
        }
    }
    language.to_string()
}

/// Parse an instructions file with `### prompt`, `### instructions` and
/// `### retry_instructions` sections.
fn parse_instructions_file(content: &str) -> Settings {
    fn flush(section: Option<&str>, buffer: &mut Vec<&str>, settings: &mut Settings) {
        if let Some(key) = section {
            let text = buffer.join("\n").trim().to_string();
            if !text.is_empty() {
                settings.set(key, text);
            }
        }
        buffer.clear();
    }

    let mut settings = Settings::new();
    let mut section: Option<&str> = None;
    let mut buffer: Vec<&str> = Vec::new();

    for line in content.lines() {
        if let Some(heading) = line.strip_prefix("###") {
            flush(section, &mut buffer, &mut settings);
            section = match heading.trim() {
                "prompt" => Some("prompt"),
                "instructions" => Some("instructions"),
                "retry_instructions" => Some("retry_instructions"),
                _ => None,
            };
        } else if section.is_some() {
            buffer.push(line);
        }
    }
    flush(section, &mut buffer, &mut settings);

    settings
}

/// Read and parse an instructions file
fn load_instructions(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read instructions file {}", path.display()))?;
    Ok(parse_instructions_file(&content))
}

fn build_settings(options: &CliOptions) -> Settings {
    let mut settings = Settings::new();

    if let Some(instructions_file) = &options.instructions_file {
        match load_instructions(instructions_file) {
            Ok(instructions) => {
                settings.update(&instructions);
                settings.set(
                    "instruction_file",
                    instructions_file.display().to_string(),
                );
            }
            Err(error) => warn!("{error:#}"),
        }
    }

    if let Some(language) = &options.target_language {
        settings.set("target_language", resolve_language(language));
    }
    if let Some(model) = &options.model {
        settings.set("model", model.clone());
    }
    if let Some(key) = &options.apikey {
        settings.set("api_key", key.clone());
    }
    if let Some(prompt) = &options.prompt {
        settings.set("prompt", prompt.clone());
    }
    if let Some(server_address) = &options.server_address {
        settings.set("server_address", server_address.clone());
    }
    if let Some(endpoint) = &options.endpoint {
        settings.set("endpoint", endpoint.clone());
    }
    if options.preview {
        settings.set("preview", true);
    }

    settings
}

/// Run the CLI with an optional provider preset. Returns the exit code.
pub async fn run(preset: Option<ProviderKind>) -> i32 {
    let options = match CliOptions::try_parse() {
        Ok(options) => options,
        Err(error) => {
            // clap renders its own message; usage problems are exit 2
            let _ = error.print();
            return EXIT_INVALID_CONFIG;
        }
    };

    let level = if options.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    // Ignore failure when a logger is already installed (tests)
    let _ = CliLogger::init(level);

    let provider = preset
        .or_else(|| options.provider.clone().map(ProviderKind::from))
        .or_else(|| options.server_address.is_some().then_some(ProviderKind::Custom));
    let Some(provider) = provider else {
        error!("No provider selected; pass --provider or --server-address");
        return EXIT_INVALID_CONFIG;
    };

    let settings = build_settings(&options);

    let mut project = match &options.project {
        Some(mode) => SubtitleProject::with_mode(mode.clone().into()),
        None => SubtitleProject::new(),
    };

    if let Err(error) = project.initialise_project(
        &options.input,
        options.output.as_deref(),
        false,
    ) {
        error!("Could not load {}: {error}", options.input.display());
        return EXIT_INVALID_CONFIG;
    }

    project.update_project_settings(&settings);
    if options.output.is_none() {
        if let Err(error) = project.update_output_path(None, None) {
            error!("Could not determine output path: {error}");
            return EXIT_INVALID_CONFIG;
        }
    }

    // Translator settings: project settings overlaid with CLI settings
    let mut translator_settings = project.subtitles.lock().settings.clone();
    translator_settings.update(&settings);

    let client = match create_client(provider, &translator_settings) {
        Ok(client) => client,
        Err(error) => {
            error!("{error}");
            return EXIT_INVALID_CONFIG;
        }
    };

    info!(
        "Translating {} with {}",
        options.input.display(),
        provider.display_name()
    );

    let translator = Arc::new(SubtitleTranslator::new(translator_settings, client));

    // Progress bar driven by translation events
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} batches {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    {
        let bar = progress.clone();
        translator.events.preprocessed.connect(move |scenes| {
            let batches: usize = scenes.iter().map(|scene| scene.batches.len()).sum();
            bar.set_length(batches as u64);
        });
        let bar = progress.clone();
        translator.events.batch_translated.connect(move |batch| {
            bar.inc(1);
            bar.set_message(format!("scene {} batch {}", batch.scene, batch.number));
        });
        let bar = progress.clone();
        translator.events.warning.connect(move |message: &str| {
            bar.println(format!("warning: {message}"));
        });
    }

    // Ctrl-C requests a cooperative abort
    {
        let translator = translator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                translator.stop_translating();
            }
        });
    }

    let outcome = project.translate_subtitles(&translator).await;
    progress.finish_and_clear();

    match outcome {
        Ok(()) if translator.is_aborted() => {
            warn!("Translation aborted by user");
            EXIT_ABORTED
        }
        Ok(()) => {
            info!("Translation complete");
            EXIT_SUCCESS
        }
        Err(error) if matches!(error, crate::errors::TranslationError::ProviderConfiguration(_)) => {
            error!("{error}");
            EXIT_INVALID_CONFIG
        }
        Err(error) => {
            error!("{error}");
            EXIT_TRANSLATION_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_language_shouldExpandIsoCodes() {
        assert_eq!(resolve_language("fr"), "French");
        assert_eq!(resolve_language("es"), "Spanish");
        assert_eq!(resolve_language("Portuguese"), "Portuguese");
        assert_eq!(resolve_language("zz"), "zz");
    }

    #[test]
    fn test_parse_instructions_file_shouldSplitSections() {
        let content = "### prompt\nTranslate into {target_language}\n\n### instructions\nBe terse.\nKeep markup.\n\n### retry_instructions\nTranslate every line.\n";
        let settings = parse_instructions_file(content);

        assert_eq!(
            settings.get_str("prompt").as_deref(),
            Some("Translate into {target_language}")
        );
        assert_eq!(
            settings.get_str("instructions").as_deref(),
            Some("Be terse.\nKeep markup.")
        );
        assert_eq!(
            settings.get_str("retry_instructions").as_deref(),
            Some("Translate every line.")
        );
    }
}
