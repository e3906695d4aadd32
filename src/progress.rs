use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::paths::{self, FilePatterns};
use crate::store::TranslationStore;

const SECTION_HEADING: &str = "## translation progress";
const SECTION_END: &str = "---";
const DEFAULT_README: &str = "# translation\n\n---\n\n## translation progress\n\n---\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub translated: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.translated as f64 / self.total as f64 * 100.0
        }
    }
}

/// Counts distinct source strings across every store under `data_dir`, and
/// how many of them are translated for `locale` in at least one store.
pub fn analyze_progress(data_dir: &Path, locale: &str) -> Result<Progress> {
    if !data_dir.is_dir() {
        warn!("data directory not found: {}", data_dir.display());
        return Ok(Progress::default());
    }
    let patterns = FilePatterns::new(&["**/*.json"])?;
    let mut raws: HashSet<String> = HashSet::new();
    let mut translated: HashSet<String> = HashSet::new();
    for path in paths::collect_matching_files(data_dir, &patterns)? {
        let store = match TranslationStore::load(&path) {
            Ok(store) => store,
            Err(err) => {
                warn!("skipping {}: {:#}", path.display(), err);
                continue;
            }
        };
        for entry in store.entries() {
            if entry.is_translated(locale) {
                translated.insert(entry.raw.clone());
            }
            raws.insert(entry.raw.clone());
        }
    }
    Ok(Progress {
        total: raws.len(),
        translated: translated.len(),
    })
}

fn shields_locale(locale: &str) -> String {
    locale.replace('-', "--")
}

pub fn badge_markdown(locale: &str, progress: Progress) -> String {
    format!(
        "![translation {}](https://img.shields.io/badge/translation_{}-{:.1}%25%7C{}%2F{}-blue)",
        locale,
        shields_locale(locale),
        progress.percent(),
        progress.translated,
        progress.total
    )
}

/// Puts `badge` into the progress section of a README, replacing the
/// locale's previous badge if there is one.
pub fn patch_progress_section(content: &str, locale: &str, badge: &str) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let marker = format!("translation_{}", shields_locale(locale));
    let start = lines
        .iter()
        .position(|line| line.to_lowercase().contains(SECTION_HEADING));

    match start {
        None => {
            lines.extend(
                ["", SECTION_HEADING, "", badge, "", SECTION_END]
                    .into_iter()
                    .map(str::to_string),
            );
        }
        Some(start) => {
            let end = lines[start + 1..]
                .iter()
                .position(|line| line.trim() == SECTION_END)
                .map(|offset| start + 1 + offset);
            let existing =
                (start + 1..end.unwrap_or(lines.len())).find(|&index| lines[index].contains(&marker));
            match (existing, end) {
                (Some(index), _) => lines[index] = badge.to_string(),
                (None, Some(end)) => lines.insert(end, badge.to_string()),
                (None, None) => {
                    lines.push(badge.to_string());
                    lines.push(SECTION_END.to_string());
                }
            }
        }
    }

    let mut patched = lines.join("\n");
    patched.push('\n');
    patched
}

pub fn write_progress(readme: &Path, locale: &str, progress: Progress) -> Result<()> {
    let content = if readme.exists() {
        fs::read_to_string(readme)
            .with_context(|| format!("failed to read {}", readme.display()))?
    } else {
        DEFAULT_README.to_string()
    };
    let patched = patch_progress_section(&content, locale, &badge_markdown(locale, progress));
    fs::write(readme, patched).with_context(|| format!("failed to write {}", readme.display()))?;
    info!(
        "updated {} translation progress: {}/{} ({:.1}%)",
        locale,
        progress.translated,
        progress.total,
        progress.percent()
    );
    Ok(())
}
