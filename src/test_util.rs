use crate::store::{TranslationEntry, TranslationRecord};

/// Builds an entry from `(locale, text)` pairs; non-empty texts get a
/// `tester` author.
pub(crate) fn entry(raw: &str, records: &[(&str, &str)]) -> TranslationEntry {
    TranslationEntry {
        raw: raw.to_string(),
        translation: records
            .iter()
            .map(|(locale, text)| {
                let author = if text.is_empty() { "" } else { "tester" };
                (locale.to_string(), TranslationRecord::new(*text, author))
            })
            .collect(),
    }
}

pub(crate) fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub(crate) fn write_file(dir: &std::path::Path, relative: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(&path, content).expect("write file");
    path
}
