use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::paths::{self, FilePatterns};
use crate::store::{ReconcileStats, TranslationStore};

/// Hiragana, Katakana, CJK Unified Ideographs and Fullwidth Forms.
const SOURCE_RANGES: [(u32, u32); 4] = [
    (0x3040, 0x309F),
    (0x30A0, 0x30FF),
    (0x4E00, 0x9FAF),
    (0xFF00, 0xFFEF),
];

/// Raw game data as a tree of scalars, sequences and mappings.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Leaf value; only string leaves carry text.
    Scalar(Option<String>),
    Sequence(Vec<RawValue>),
    Mapping(Vec<(String, RawValue)>),
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => RawValue::Scalar(Some(text)),
            Value::Array(items) => RawValue::Sequence(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => RawValue::Mapping(
                map.into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
            Value::Null | Value::Bool(_) | Value::Number(_) => RawValue::Scalar(None),
        }
    }
}

/// Decodes literal `\uXXXX` sequences. Sequences that do not name a valid
/// scalar value (lone surrogates, short hex) are kept verbatim.
pub fn decode_unicode_escapes(text: &str) -> String {
    if !text.contains("\\u") {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("\\u") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let decoded = after
            .get(..4)
            .filter(|hex| hex.chars().all(|ch| ch.is_ascii_hexdigit()))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &after[4..];
            }
            None => {
                out.push_str("\\u");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// True when any character falls in the Japanese ranges. A single matching
/// character is enough.
pub fn is_source_text(text: &str) -> bool {
    text.chars().any(|ch| {
        let code = ch as u32;
        SOURCE_RANGES
            .iter()
            .any(|(start, end)| (*start..=*end).contains(&code))
    })
}

/// Every qualifying string in `document`, decoded, deduplicated and sorted.
pub fn extract_source_strings(document: &RawValue) -> Vec<String> {
    let mut found = BTreeSet::new();
    collect_strings(document, &mut found);
    found.into_iter().collect()
}

fn collect_strings(value: &RawValue, found: &mut BTreeSet<String>) {
    match value {
        RawValue::Scalar(Some(text)) => {
            if text.trim().is_empty() {
                return;
            }
            let decoded = decode_unicode_escapes(text);
            if is_source_text(&decoded) {
                found.insert(decoded);
            }
        }
        RawValue::Scalar(None) => {}
        RawValue::Sequence(items) => {
            for item in items {
                collect_strings(item, found);
            }
        }
        RawValue::Mapping(fields) => {
            for (_, field) in fields {
                collect_strings(field, found);
            }
        }
    }
}

pub fn extract_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read source file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse source file: {}", path.display()))?;
    Ok(extract_source_strings(&RawValue::from(value)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files_seen: usize,
    pub files_written: usize,
    pub files_failed: usize,
    pub new_entries: usize,
}

#[derive(Debug, Clone, Copy)]
struct FileOutcome {
    extracted: usize,
    stats: ReconcileStats,
    total: usize,
    written: bool,
}

/// Mirrors every matching file under `input_dir` into a translation store at
/// the same relative path under `output_dir`.
///
/// A file that cannot be read or parsed is skipped, as is a file whose
/// existing store cannot be parsed; the store is left untouched in that case.
pub fn extract_directory<S: AsRef<str>>(
    input_dir: &Path,
    output_dir: &Path,
    locales: &[S],
    patterns: &FilePatterns,
) -> Result<ExtractSummary> {
    if !input_dir.is_dir() {
        return Err(anyhow!(
            "input directory does not exist: {}",
            input_dir.display()
        ));
    }
    if paths::same_location(input_dir, output_dir) {
        return Err(anyhow!("input and output directories cannot be the same"));
    }

    let files = paths::collect_matching_files(input_dir, patterns)?;
    let mut summary = ExtractSummary::default();
    if files.is_empty() {
        warn!("no source files found in {}", input_dir.display());
        return Ok(summary);
    }
    info!("found {} source files in {}", files.len(), input_dir.display());

    for source in files {
        summary.files_seen += 1;
        let relative = source.strip_prefix(input_dir).unwrap_or(&source);
        let target = output_dir.join(relative);
        match extract_into_store(&source, &target, locales) {
            Ok(outcome) => {
                if outcome.written {
                    summary.files_written += 1;
                    summary.new_entries += outcome.stats.new;
                    info!(
                        "{} -> {}: extracted {}, new {}, updated {}, total {}",
                        source.display(),
                        target.display(),
                        outcome.extracted,
                        outcome.stats.new,
                        outcome.stats.updated,
                        outcome.total
                    );
                } else {
                    info!("{}: no source text", source.display());
                }
            }
            Err(err) => {
                summary.files_failed += 1;
                warn!("skipping {}: {:#}", source.display(), err);
            }
        }
    }

    info!(
        "extraction finished: {} files written, {} failed, {} new entries",
        summary.files_written, summary.files_failed, summary.new_entries
    );
    Ok(summary)
}

fn extract_into_store<S: AsRef<str>>(
    source: &Path,
    target: &Path,
    locales: &[S],
) -> Result<FileOutcome> {
    let fresh = extract_file(source)?;
    let mut store = TranslationStore::open(target)?;
    if fresh.is_empty() && store.is_empty() && !target.exists() {
        return Ok(FileOutcome {
            extracted: 0,
            stats: ReconcileStats::default(),
            total: 0,
            written: false,
        });
    }
    let stats = store.reconcile(&fresh, locales);
    store.save()?;
    Ok(FileOutcome {
        extracted: fresh.len(),
        stats,
        total: store.len(),
        written: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_file;
    use serde_json::json;
    use tempfile::tempdir;

    fn extract(value: Value) -> Vec<String> {
        extract_source_strings(&RawValue::from(value))
    }

    #[test]
    fn escaped_value_field_is_decoded_and_classified() {
        let doc = json!({"value": "\\u3053\\u3093\\u306b\\u3061\\u306f"});
        assert_eq!(extract(doc), vec!["こんにちは"]);
    }

    #[test]
    fn differently_escaped_strings_collapse() {
        let doc = json!(["こんにちは", "\\u3053\\u3093\\u306b\\u3061\\u306f", "こ\\u3093にちは"]);
        assert_eq!(extract(doc), vec!["こんにちは"]);
    }

    #[test]
    fn nested_values_are_found_regardless_of_key() {
        let doc = json!({
            "Id": 1,
            "Name": "スキルハート",
            "Nested": {"Descriptions": [{"Text": "ボルテージ上昇"}, {"Text": "plain"}]},
            "Flags": [true, null, 3.5],
            "value": "メンタル"
        });
        assert_eq!(extract(doc), vec!["スキルハート", "ボルテージ上昇", "メンタル"]);
    }

    #[test]
    fn classification_covers_each_range() {
        assert!(is_source_text("あ"));
        assert!(is_source_text("ア"));
        assert!(is_source_text("漢"));
        assert!(is_source_text("Ｌｉｖｅ"));
        assert!(is_source_text("Live！"));
        assert!(!is_source_text("Live!"));
        assert!(!is_source_text("안녕"));
        assert!(!is_source_text(""));
    }

    #[test]
    fn blank_and_non_source_strings_are_ignored() {
        let doc = json!(["  ", "hello", "", "1234"]);
        assert!(extract(doc).is_empty());
    }

    #[test]
    fn output_is_sorted_and_unique() {
        let doc = json!(["ん", "あ", "ん", {"k": "か"}]);
        assert_eq!(extract(doc), vec!["あ", "か", "ん"]);
    }

    #[test]
    fn invalid_escapes_are_kept_verbatim() {
        assert_eq!(decode_unicode_escapes("\\uZZZZ"), "\\uZZZZ");
        assert_eq!(decode_unicode_escapes("\\u30"), "\\u30");
        assert_eq!(decode_unicode_escapes("\\ud800x"), "\\ud800x");
        assert_eq!(decode_unicode_escapes("a\\u3042b"), "aあb");
    }

    #[test]
    fn extract_directory_mirrors_layout_and_preserves_translations() {
        let input = tempdir().expect("input");
        let output = tempdir().expect("output");
        write_file(input.path(), "Items.json", r#"[{"Name": "薬"}, {"Name": "剣"}]"#);
        write_file(input.path(), "sub/Units.json", r#"{"value": "スリーズブーケ"}"#);
        write_file(input.path(), "Empty.json", r#"{"Name": "english only"}"#);
        write_file(input.path(), "Broken.json", "{");
        write_file(
            output.path(),
            "Items.json",
            r#"[{"raw": "古い", "translation": {"zh-CN": {"text": "旧", "author": "human"}}}]"#,
        );

        let patterns = FilePatterns::new(&["**/*.json"]).expect("patterns");
        let summary =
            extract_directory(input.path(), output.path(), &["zh-CN", "en"], &patterns)
                .expect("extract");
        assert_eq!(summary.files_seen, 4);
        assert_eq!(summary.files_written, 2);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.new_entries, 3);

        let items = TranslationStore::load(output.path().join("Items.json")).expect("items");
        let raws: Vec<&str> = items.entries().iter().map(|e| e.raw.as_str()).collect();
        assert_eq!(raws, vec!["剣", "古い", "薬"]);
        let old = &items.entries()[1];
        assert_eq!(old.record("zh-CN").map(|r| r.text.as_str()), Some("旧"));
        assert!(old.record("en").is_some());

        assert!(output.path().join("sub/Units.json").exists());
        assert!(!output.path().join("Empty.json").exists());
        assert!(!output.path().join("Broken.json").exists());
    }

    #[test]
    fn unreadable_existing_store_is_left_alone() {
        let input = tempdir().expect("input");
        let output = tempdir().expect("output");
        write_file(input.path(), "Items.json", r#"["薬"]"#);
        let store_path = write_file(output.path(), "Items.json", "not json");

        let patterns = FilePatterns::new(&["**/*.json"]).expect("patterns");
        let summary =
            extract_directory(input.path(), output.path(), &["zh-CN"], &patterns).expect("extract");
        assert_eq!(summary.files_failed, 1);
        assert_eq!(fs::read_to_string(store_path).expect("read"), "not json");
    }

    #[test]
    fn same_input_and_output_is_rejected() {
        let dir = tempdir().expect("dir");
        let patterns = FilePatterns::new(&["**/*.json"]).expect("patterns");
        let err = extract_directory(dir.path(), dir.path(), &["zh-CN"], &patterns).unwrap_err();
        assert!(err.to_string().contains("cannot be the same"));
    }

    #[test]
    fn missing_input_is_rejected() {
        let dir = tempdir().expect("dir");
        let patterns = FilePatterns::new(&["**/*.json"]).expect("patterns");
        let err = extract_directory(&dir.path().join("raw"), dir.path(), &["zh-CN"], &patterns)
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
