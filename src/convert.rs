//! Turns game master-data YAML dumps into the diff JSON documents consumed
//! by the patch tooling: one `{ "rules", "data" }` file per document, holding
//! only the fields worth translating.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::paths;

const BUILTIN_RULES: &str = include_str!("../convert_rules.toml");
const TEST_SUFFIX: &str = "TEST";
const VERTICAL_TAB: char = '\u{0b}';
/// Private-use stand-in for vertical tabs, which the YAML parser rejects.
const VERTICAL_TAB_STANDIN: char = '\u{e00b}';

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DocumentRule {
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl DocumentRule {
    /// Primary keys first, then the translatable fields.
    pub fn all_paths(&self) -> Vec<&str> {
        self.primary_keys
            .iter()
            .chain(self.fields.iter())
            .map(String::as_str)
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.primary_keys.is_empty() && self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvertRules {
    #[serde(default)]
    documents: BTreeMap<String, DocumentRule>,
}

impl ConvertRules {
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_RULES).with_context(|| "failed to parse built-in convert rules")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read convert rules: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to parse convert rules: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Rule for a document; rules that keep nothing count as absent.
    pub fn get(&self, name: &str) -> Option<&DocumentRule> {
        self.documents.get(name).filter(|rule| !rule.is_empty())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Restricts conversion to these document names when non-empty.
    pub only: Vec<String>,
    /// Appends `TEST` to every translatable string so patched text is easy
    /// to spot in game.
    pub test_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub files_seen: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Serialize)]
struct DiffDocument<'a> {
    rules: DiffRules<'a>,
    data: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiffRules<'a> {
    primary_keys: &'a [String],
}

/// Value at a dotted path. Lists of objects along the way yield a list with
/// one slot per element, `null` where the element has no such value.
pub fn get_nested_value(value: &Value, path: &[&str]) -> Option<Value> {
    let Some((key, rest)) = path.split_first() else {
        return Some(value.clone());
    };
    let child = value.as_object()?.get(*key)?;
    if rest.is_empty() {
        return Some(child.clone());
    }
    match child {
        Value::Object(_) => get_nested_value(child, rest),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(_) => get_nested_value(item, rest).unwrap_or(Value::Null),
                    _ => Value::Null,
                })
                .collect(),
        )),
        _ => None,
    }
}

/// Writes `value` into `target` under `path`, rebuilding the nesting that
/// [`get_nested_value`] walked through.
pub fn merge_nested_value(target: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((key, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        target.insert(key.to_string(), value);
        return;
    }

    match value {
        Value::Array(items) => {
            let slot = target
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            let Value::Array(slots) = slot else {
                return;
            };
            if slots.len() < items.len() {
                slots.resize(items.len(), Value::Null);
            }
            for (index, item) in items.into_iter().enumerate() {
                if item.is_null() {
                    continue;
                }
                if !slots[index].is_object() {
                    slots[index] = Value::Object(Map::new());
                }
                if let Value::Object(child) = &mut slots[index] {
                    merge_nested_value(child, rest, item);
                }
            }
        }
        value => {
            let slot = target
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                merge_nested_value(child, rest, value);
            }
        }
    }
}

/// Copy of `record` holding only the paths named by `rule`.
pub fn filter_record(record: &Value, rule: &DocumentRule, test_mode: bool) -> Value {
    let mut filtered = Map::new();
    for path_str in rule.all_paths() {
        let path: Vec<&str> = path_str.split('.').collect();
        let Some(mut value) = get_nested_value(record, &path) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if test_mode && rule.fields.iter().any(|field| field == path_str) {
            value = mark_for_test(value);
        }
        merge_nested_value(&mut filtered, &path, value);
    }
    Value::Object(filtered)
}

fn mark_for_test(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(format!("{}{}", text, TEST_SUFFIX)),
        Value::Array(items) if items.iter().all(Value::is_string) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => Value::String(format!("{}{}", text, TEST_SUFFIX)),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

fn has_path(value: &Value, path: &[&str]) -> bool {
    let Some((key, rest)) = path.split_first() else {
        return false;
    };
    let Some(child) = value.as_object().and_then(|object| object.get(*key)) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    match child {
        Value::Object(_) => has_path(child, rest),
        Value::Array(items) => items
            .iter()
            .any(|item| item.is_object() && has_path(item, rest)),
        _ => false,
    }
}

/// Moves the first record that carries every path to the front, since the
/// consumer infers the document's field types from the first record.
/// Returns false when no record is complete.
pub fn promote_complete_record(records: &mut Vec<Value>, paths: &[&str]) -> bool {
    let split: Vec<Vec<&str>> = paths.iter().map(|path| path.split('.').collect()).collect();
    let Some(index) = records
        .iter()
        .position(|record| split.iter().all(|path| has_path(record, path)))
    else {
        return false;
    };
    let record = records.remove(index);
    records.insert(0, record);
    true
}

/// Patches constructs the dumps emit that a strict YAML parser rejects or
/// reads differently: vertical tabs, bare tab values, and literal blocks
/// whose trailing newlines must be kept. Vertical tabs come back through
/// [`restore_vertical_tabs`].
pub fn preprocess_yaml(text: &str) -> String {
    text.replace(VERTICAL_TAB, &VERTICAL_TAB_STANDIN.to_string())
        .replace(": \t", ": \"\t\"")
        .replace("|\n", "|+\n")
}

fn restore_vertical_tabs(text: String) -> String {
    if text.contains(VERTICAL_TAB_STANDIN) {
        text.replace(VERTICAL_TAB_STANDIN, &VERTICAL_TAB.to_string())
    } else {
        text
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(flag) => Value::Bool(flag),
        serde_yaml::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Value::from(int)
            } else if let Some(uint) = number.as_u64() {
                Value::from(uint)
            } else {
                number
                    .as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(text) => Value::String(restore_vertical_tabs(text)),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(key, value)| (yaml_key(key), yaml_to_json(value)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(text) => restore_vertical_tabs(text),
        serde_yaml::Value::Number(number) => number.to_string(),
        serde_yaml::Value::Bool(flag) => flag.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => yaml_to_json(other).to_string(),
    }
}

/// Builds the diff document for one YAML dump. `None` when the dump holds no
/// records.
pub fn convert_document(content: &str, rule: &DocumentRule, test_mode: bool) -> Result<Option<String>> {
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(&preprocess_yaml(content)).with_context(|| "failed to parse YAML")?;
    let records = match yaml_to_json(parsed) {
        Value::Array(records) => records,
        Value::Null => Vec::new(),
        _ => return Err(anyhow!("expected a list of records")),
    };
    if records.is_empty() {
        return Ok(None);
    }

    let mut data: Vec<Value> = records
        .iter()
        .map(|record| filter_record(record, rule, test_mode))
        .collect();
    if !promote_complete_record(&mut data, &rule.all_paths()) {
        warn!("no record carries every configured field");
    }

    let document = DiffDocument {
        rules: DiffRules {
            primary_keys: &rule.primary_keys,
        },
        data,
    };
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    document
        .serialize(&mut serializer)
        .with_context(|| "failed to serialize diff document")?;
    let mut json = String::from_utf8(out).with_context(|| "diff document is not UTF-8")?;
    json.push('\n');
    Ok(Some(json))
}

/// Converts every `*.yaml` under `input_dir` that has a rule into
/// `output_dir/<name>.json`.
pub fn convert_directory(
    input_dir: &Path,
    output_dir: &Path,
    rules: &ConvertRules,
    options: &ConvertOptions,
) -> Result<ConvertSummary> {
    if !input_dir.is_dir() {
        return Err(anyhow!(
            "input directory does not exist: {}",
            input_dir.display()
        ));
    }
    let files: Vec<_> = paths::collect_directory_files(input_dir)?
        .into_iter()
        .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
        .collect();
    let total = files.len();
    let mut summary = ConvertSummary::default();

    for (position, source) in files.into_iter().enumerate() {
        summary.files_seen += 1;
        let Some(name) = source.file_stem().and_then(|stem| stem.to_str()) else {
            summary.skipped += 1;
            continue;
        };
        if !options.only.is_empty() && !options.only.iter().any(|only| only == name) {
            summary.skipped += 1;
            continue;
        }
        let Some(rule) = rules.get(name) else {
            summary.skipped += 1;
            continue;
        };

        info!("converting {} ({}/{})", source.display(), position + 1, total);
        let target = output_dir.join(format!("{}.json", name));
        match convert_file(&source, &target, rule, options.test_mode) {
            Ok(true) => summary.written += 1,
            Ok(false) => {
                info!("{}: no records", source.display());
                summary.skipped += 1;
            }
            Err(err) => {
                warn!("skipping {}: {:#}", source.display(), err);
                summary.failed += 1;
            }
        }
    }

    info!(
        "conversion finished: {} written, {} skipped, {} failed",
        summary.written, summary.skipped, summary.failed
    );
    Ok(summary)
}

fn convert_file(source: &Path, target: &Path, rule: &DocumentRule, test_mode: bool) -> Result<bool> {
    let content = fs::read_to_string(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    let Some(json) = convert_document(&content, rule, test_mode)? else {
        return Ok(false);
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    fs::write(target, json).with_context(|| format!("failed to write {}", target.display()))?;
    Ok(true)
}
