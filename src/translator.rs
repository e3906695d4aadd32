use anyhow::{Result, anyhow};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::providers::{Backend, BackendError};
use crate::references::{self, RandomSampler, Sampler};
use crate::settings::Settings;
use crate::store::{TranslationEntry, TranslationRecord, TranslationStore};
use crate::translations::{self, ResponseShapeError};

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub locale: String,
    pub chunk_size: usize,
    pub limit: Option<usize>,
    pub reference_limit: usize,
}

impl TranslateOptions {
    pub fn from_settings(settings: &Settings, locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            chunk_size: settings.chunk_size,
            limit: None,
            reference_limit: settings.reference_limit,
        }
    }
}

/// Outcome of one `translate` call. Chunk failures are counted here rather
/// than returned as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslateReport {
    pub selected: usize,
    pub attempted: usize,
    pub translated: usize,
    pub chunks_applied: usize,
    pub chunks_skipped: usize,
    pub persist_failures: usize,
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("unusable response: {source}")]
    ResponseShape {
        #[source]
        source: ResponseShapeError,
        response: String,
    },
}

pub struct Translator<B: Backend> {
    backend: B,
    settings: Settings,
    sampler: Box<dyn Sampler + Send>,
}

impl<B: Backend> Translator<B> {
    pub fn new(backend: B, settings: Settings) -> Self {
        Self {
            backend,
            settings,
            sampler: Box::new(RandomSampler::new()),
        }
    }

    pub fn with_sampler(mut self, sampler: impl Sampler + Send + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Fills in missing translations for `options.locale`, one chunk per
    /// backend request, saving the store after every applied chunk.
    ///
    /// Only setup problems (a zero chunk size, a broken prompt template) are
    /// returned as errors. Backend failures and unusable responses skip their
    /// chunk; failed saves are logged and retried by the next save.
    pub async fn translate(
        &mut self,
        store: &mut TranslationStore,
        options: &TranslateOptions,
    ) -> Result<TranslateReport> {
        if options.chunk_size == 0 {
            return Err(anyhow!("chunk size must be greater than zero"));
        }
        let locale = options.locale.as_str();
        let mut report = TranslateReport::default();

        let mut selection = select_untranslated(store.entries(), locale);
        report.selected = selection.len();
        if selection.is_empty() {
            info!("{}: nothing to do for {}", store.path().display(), locale);
            return Ok(report);
        }
        if let Some(limit) = options.limit {
            selection.truncate(limit);
        }
        report.attempted = selection.len();
        info!(
            "{}: {} untranslated entries for {}, translating {}",
            store.path().display(),
            report.selected,
            locale,
            report.attempted
        );

        let profile = self.settings.profile(locale);
        let references = references::reference_block(
            store.entries(),
            locale,
            options.reference_limit,
            self.sampler.as_mut(),
        );
        let author = self.backend.model_id().to_string();
        let chunks = partition(&selection, options.chunk_size);
        let total_chunks = chunks.len();
        let mut unsaved = false;

        for (position, chunk) in chunks.into_iter().enumerate() {
            let number = position + 1;
            info!(
                "processing chunk {}/{} ({} items)",
                number,
                total_chunks,
                chunk.len()
            );
            let texts: Vec<&str> = chunk
                .iter()
                .map(|&index| store.entries()[index].raw.as_str())
                .collect();
            let prompt = translations::render_chunk_prompt(locale, &profile, &references, &texts)?;
            debug!("chunk {} prompt:\n{}", number, prompt);

            let translated = match self.request_chunk(prompt, texts.len()).await {
                Ok(translated) => translated,
                Err(ChunkError::ResponseShape { source, response }) => {
                    warn!("skipping chunk {}: {}", number, source);
                    warn!("chunk {} response content: {}", number, response);
                    report.chunks_skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!("skipping chunk {}: {}", number, err);
                    report.chunks_skipped += 1;
                    continue;
                }
            };

            apply_chunk(store, chunk, translated, locale, &author);
            report.chunks_applied += 1;
            report.translated += chunk.len();
            info!("translated {} items in chunk {}", chunk.len(), number);

            match store.save() {
                Ok(()) => unsaved = false,
                Err(err) => {
                    report.persist_failures += 1;
                    unsaved = true;
                    error!("failed to save after chunk {}: {:#}", number, err);
                }
            }
        }

        if unsaved {
            match store.save() {
                Ok(()) => info!("saved {} on final attempt", store.path().display()),
                Err(err) => {
                    report.persist_failures += 1;
                    error!(
                        "translations for {} were not saved: {:#}",
                        store.path().display(),
                        err
                    );
                }
            }
        }

        info!(
            "{}: {} of {} attempted entries translated ({} chunks applied, {} skipped)",
            store.path().display(),
            report.translated,
            report.attempted,
            report.chunks_applied,
            report.chunks_skipped
        );
        Ok(report)
    }

    async fn request_chunk(&self, prompt: String, expected: usize) -> Result<Vec<String>, ChunkError> {
        let response = self.backend.send(prompt).await?;
        translations::parse_chunk_response(&response, expected)
            .map_err(|source| ChunkError::ResponseShape { source, response })
    }
}

/// Indices of entries lacking a non-blank translation for `locale`, in
/// store order.
pub fn select_untranslated(entries: &[TranslationEntry], locale: &str) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| !entry.is_translated(locale))
        .map(|(index, _)| index)
        .collect()
}

/// Consecutive chunks of `chunk_size` items; only the last may be shorter.
pub fn partition<T>(items: &[T], chunk_size: usize) -> Vec<&[T]> {
    items.chunks(chunk_size.max(1)).collect()
}

fn apply_chunk(
    store: &mut TranslationStore,
    chunk: &[usize],
    translated: Vec<String>,
    locale: &str,
    author: &str,
) {
    for (&index, text) in chunk.iter().zip(translated) {
        if let Some(entry) = store.entry_mut(index) {
            entry.set_translation(locale, TranslationRecord::new(text, author));
        }
    }
}
