use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod convert;
pub mod extractor;
pub mod logging;
mod paths;
pub mod progress;
pub mod providers;
pub mod references;
pub mod settings;
pub mod store;
pub mod translations;
pub mod translator;

#[cfg(test)]
mod test_util;

pub use paths::FilePatterns;
pub use providers::{Backend, BackendError, BackendImpl, ProviderKind};
pub use store::{TranslationEntry, TranslationRecord, TranslationStore};
pub use translator::{TranslateOptions, TranslateReport, Translator};

#[derive(Debug, Clone)]
pub struct Config {
    pub locale: String,
    pub settings_path: Option<String>,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    Gentodo {
        input: PathBuf,
        output: PathBuf,
    },
    Translate {
        file: PathBuf,
        limit: Option<usize>,
        chunk_size: Option<usize>,
        model: Option<String>,
        key: Option<String>,
    },
    Generate {
        data: PathBuf,
        readme: PathBuf,
    },
    Convert {
        input: PathBuf,
        output: PathBuf,
        rules: Option<PathBuf>,
        only: Vec<String>,
        test_mode: bool,
    },
}

pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    settings.validate_locale(&config.locale)?;

    match config.command {
        Command::Gentodo { input, output } => {
            let patterns = FilePatterns::new(&settings.patterns)?;
            let summary =
                extractor::extract_directory(&input, &output, &settings.locales, &patterns)?;
            Ok(format!(
                "gentodo: {} of {} files written, {} failed, {} new entries",
                summary.files_written, summary.files_seen, summary.files_failed, summary.new_entries
            ))
        }
        Command::Translate {
            file,
            limit,
            chunk_size,
            model,
            key,
        } => {
            let mut store = TranslationStore::load(&file)?;
            let selection = providers::resolve_provider_selection(
                model.as_deref(),
                &settings.backend.provider,
                settings.backend.model.as_deref(),
            )?;
            let key = providers::resolve_key(selection.provider, key.as_deref())
                .with_context(|| "no API key found for selected provider")?;
            let backend = providers::build_backend(
                selection.provider,
                key,
                selection.requested_model,
                providers::HttpOptions {
                    max_tokens: settings.backend.max_tokens,
                    timeout: Duration::from_secs(settings.backend.timeout_secs),
                },
            );

            let mut options = TranslateOptions::from_settings(&settings, config.locale.as_str());
            options.limit = limit;
            if let Some(chunk_size) = chunk_size {
                options.chunk_size = chunk_size;
            }
            let mut translator = Translator::new(backend, settings);
            let report = translator.translate(&mut store, &options).await?;
            Ok(format_translate_report(store.path(), &options.locale, &report))
        }
        Command::Generate { data, readme } => {
            let progress = progress::analyze_progress(&data, &config.locale)?;
            progress::write_progress(&readme, &config.locale, progress)?;
            Ok(format!(
                "{} translation progress: {}/{} ({:.1}%)",
                config.locale,
                progress.translated,
                progress.total,
                progress.percent()
            ))
        }
        Command::Convert {
            input,
            output,
            rules,
            only,
            test_mode,
        } => {
            let rules = match rules {
                Some(path) => convert::ConvertRules::load(&path)?,
                None => convert::ConvertRules::builtin()?,
            };
            let options = convert::ConvertOptions { only, test_mode };
            let summary = convert::convert_directory(&input, &output, &rules, &options)?;
            Ok(format!(
                "convert: {} written, {} skipped, {} failed",
                summary.written, summary.skipped, summary.failed
            ))
        }
    }
}

fn format_translate_report(path: &Path, locale: &str, report: &TranslateReport) -> String {
    if report.selected == 0 {
        return format!("{}: nothing to translate for {}", path.display(), locale);
    }
    let mut output = format!(
        "{}: translated {}/{} for {} ({} untranslated, {} chunks skipped)",
        path.display(),
        report.translated,
        report.attempted,
        locale,
        report.selected - report.translated,
        report.chunks_skipped
    );
    if report.persist_failures > 0 {
        output.push_str(&format!("\nwarning: {} saves failed", report.persist_failures));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lines() {
        let path = Path::new("data/Items.json");
        assert_eq!(
            format_translate_report(path, "zh-CN", &TranslateReport::default()),
            "data/Items.json: nothing to translate for zh-CN"
        );
        let report = TranslateReport {
            selected: 5,
            attempted: 4,
            translated: 2,
            chunks_applied: 1,
            chunks_skipped: 1,
            persist_failures: 1,
        };
        assert_eq!(
            format_translate_report(path, "en", &report),
            "data/Items.json: translated 2/4 for en (3 untranslated, 1 chunks skipped)\nwarning: 1 saves failed"
        );
    }

    #[tokio::test]
    async fn unknown_locale_is_rejected_before_any_work() {
        let config = Config {
            locale: "fr".to_string(),
            settings_path: None,
            command: Command::Generate {
                data: PathBuf::from("does-not-exist"),
                readme: PathBuf::from("does-not-exist/README.md"),
            },
        };
        let err = run(config).await.unwrap_err();
        assert!(err.to_string().contains("unknown locale 'fr'"));
    }
}
