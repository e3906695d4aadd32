use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author: String,
}

impl TranslationRecord {
    pub fn new(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
        }
    }

    pub fn is_translated(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationEntry {
    pub raw: String,
    #[serde(default)]
    pub translation: BTreeMap<String, TranslationRecord>,
}

impl TranslationEntry {
    /// A fresh entry with an empty record for every locale.
    pub fn new<S: AsRef<str>>(raw: impl Into<String>, locales: &[S]) -> Self {
        Self {
            raw: raw.into(),
            translation: locales
                .iter()
                .map(|locale| (locale.as_ref().to_string(), TranslationRecord::default()))
                .collect(),
        }
    }

    pub fn record(&self, locale: &str) -> Option<&TranslationRecord> {
        self.translation.get(locale)
    }

    pub fn is_translated(&self, locale: &str) -> bool {
        self.record(locale)
            .map(TranslationRecord::is_translated)
            .unwrap_or(false)
    }

    pub fn set_translation(&mut self, locale: &str, record: TranslationRecord) {
        self.translation.insert(locale.to_string(), record);
    }

    /// Adds empty records for locales the entry does not know yet.
    /// Returns true when anything was added.
    fn backfill<S: AsRef<str>>(&mut self, locales: &[S]) -> bool {
        let mut changed = false;
        for locale in locales {
            let locale = locale.as_ref();
            if !self.translation.contains_key(locale) {
                self.translation
                    .insert(locale.to_string(), TranslationRecord::default());
                changed = true;
            }
        }
        changed
    }

    /// Folds a duplicate of the same `raw` into this entry, keeping any
    /// translation this entry lacks.
    fn absorb(&mut self, duplicate: TranslationEntry) {
        for (locale, record) in duplicate.translation {
            match self.translation.entry(locale) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if !slot.get().is_translated() && record.is_translated() {
                        slot.insert(record);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub new: usize,
    pub updated: usize,
}

/// Merges freshly extracted source strings into existing entries.
///
/// Existing entries are never dropped, even when their source string is no
/// longer extracted, so translation memory survives upstream edits. Every
/// entry ends up with a record for each of `locales`; entries that needed a
/// backfill are counted as `updated`. The result is sorted by `raw` and
/// holds exactly one entry per distinct `raw`.
pub fn reconcile<S: AsRef<str>>(
    existing: Vec<TranslationEntry>,
    fresh: &[String],
    locales: &[S],
) -> (Vec<TranslationEntry>, ReconcileStats) {
    let mut merged: BTreeMap<String, TranslationEntry> = BTreeMap::new();
    for entry in existing {
        match merged.entry(entry.raw.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(mut slot) => slot.get_mut().absorb(entry),
        }
    }

    let mut stats = ReconcileStats::default();
    for raw in fresh {
        if !merged.contains_key(raw) {
            merged.insert(raw.clone(), TranslationEntry::new(raw.clone(), locales));
            stats.new += 1;
        }
    }

    for entry in merged.values_mut() {
        if entry.backfill(locales) {
            stats.updated += 1;
        }
    }

    (merged.into_values().collect(), stats)
}

/// One persisted translation file.
#[derive(Debug, Clone)]
pub struct TranslationStore {
    path: PathBuf,
    entries: Vec<TranslationEntry>,
}

impl TranslationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_entries(path: impl Into<PathBuf>, entries: Vec<TranslationEntry>) -> Self {
        Self {
            path: path.into(),
            entries,
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read translation file: {}", path.display()))?;
        let entries: Vec<TranslationEntry> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse translation file: {}", path.display()))?;
        Ok(Self { path, entries })
    }

    /// Loads the store at `path`, or starts an empty one when the file does
    /// not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new(path))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut TranslationEntry> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reconcile<S: AsRef<str>>(&mut self, fresh: &[String], locales: &[S]) -> ReconcileStats {
        let existing = std::mem::take(&mut self.entries);
        let (merged, stats) = reconcile(existing, fresh, locales);
        self.entries = merged;
        stats
    }

    /// Number of entries with a non-blank translation for `locale`.
    pub fn translated_count(&self, locale: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.is_translated(locale))
            .count()
    }

    /// Serialized form: entries sorted by `raw`, two-space indentation,
    /// non-ASCII left unescaped.
    pub fn to_json(&self) -> Result<String> {
        let mut sorted: Vec<&TranslationEntry> = self.entries.iter().collect();
        sorted.sort_by(|left, right| left.raw.cmp(&right.raw));
        let mut content = serde_json::to_string_pretty(&sorted)
            .with_context(|| "failed to serialize translation entries")?;
        content.push('\n');
        Ok(content)
    }

    /// Rewrites the whole file. The content goes to a sibling temp file that
    /// is renamed over the target, so a crash mid-write leaves the previous
    /// version intact.
    pub fn save(&self) -> Result<()> {
        let content = self.to_json()?;
        write_atomic(&self.path, content.as_bytes())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    let mut file = tempfile::Builder::new()
        .prefix(".linkura-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    file.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush temp file for {}", path.display()))?;
    file.persist(path)
        .with_context(|| format!("failed to replace translation file: {}", path.display()))?;
    Ok(())
}
