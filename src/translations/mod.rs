use anyhow::{Context, Result};
use serde_json::Value;
use tera::{Context as TeraContext, Tera};
use thiserror::Error;

use crate::settings::LocaleProfile;

const CHUNK_PROMPT_TEMPLATE: &str = include_str!("prompts/chunk_prompt.tera");

/// Why a backend reply could not be applied to its chunk.
#[derive(Debug, Error)]
pub enum ResponseShapeError {
    #[error("response is not valid JSON: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
    #[error("response is not a JSON array")]
    NotAnArray,
    #[error("response item {index} is not a string")]
    NotAString { index: usize },
    #[error("expected {expected} translations, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Full prompt for one chunk: instructions and glossary for the locale, the
/// optional reference block, then the source strings as a JSON array.
pub fn render_chunk_prompt(
    locale: &str,
    profile: &LocaleProfile,
    references: &str,
    texts: &[&str],
) -> Result<String> {
    let texts_json =
        serde_json::to_string_pretty(texts).with_context(|| "failed to encode source texts")?;
    let mut context = TeraContext::new();
    context.insert("locale", locale);
    context.insert("language", profile.name.as_str());
    context.insert("has_glossary", &!profile.glossary.is_empty());
    context.insert("glossary", &profile.glossary);
    context.insert("references", references.trim());
    context.insert("count", &texts.len());
    context.insert("texts", &texts_json);

    Tera::one_off(CHUNK_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render chunk prompt")
}

/// Decodes a backend reply into exactly `expected` translations.
pub fn parse_chunk_response(
    response: &str,
    expected: usize,
) -> Result<Vec<String>, ResponseShapeError> {
    let value: Value = serde_json::from_str(response.trim())
        .map_err(|source| ResponseShapeError::Decode { source })?;
    let Value::Array(items) = value else {
        return Err(ResponseShapeError::NotAnArray);
    };
    if items.len() != expected {
        return Err(ResponseShapeError::LengthMismatch {
            expected,
            actual: items.len(),
        });
    }
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(text) => Ok(text),
            _ => Err(ResponseShapeError::NotAString { index }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::GlossaryTerm;

    fn profile() -> LocaleProfile {
        LocaleProfile {
            name: "Simplified Chinese".to_string(),
            glossary: vec![
                GlossaryTerm::new("蓮ノ空", "莲之空"),
                GlossaryTerm::new("スクールアイドル", "学园偶像"),
            ],
        }
    }

    #[test]
    fn prompt_contains_every_section() {
        let prompt = render_chunk_prompt(
            "zh-CN",
            &profile(),
            "おはよう: 早上好",
            &["こんにちは", "蓮ノ空の<br>スクールアイドル"],
        )
        .expect("prompt");

        assert!(prompt.starts_with("## Character\n"));
        assert!(prompt.contains("into **Simplified Chinese** (zh-CN)"));
        assert!(prompt.contains("Element i of your output is the translation of element i"));
        assert!(prompt.contains("must contain exactly 2 strings"));
        assert!(prompt.contains("  - 蓮ノ空 - 莲之空\n  - スクールアイドル - 学园偶像\n"));
        assert!(prompt.contains("## Translation Reference Examples:\nおはよう: 早上好\n"));
        assert!(prompt.contains(
            "## Original Texts to Translate:\n[\n  \"こんにちは\",\n  \"蓮ノ空の<br>スクールアイドル\"\n]\n"
        ));
        assert!(prompt.contains("Return ONLY a JSON array"));
    }

    #[test]
    fn empty_references_and_glossary_are_omitted() {
        let profile = LocaleProfile {
            name: "English".to_string(),
            glossary: Vec::new(),
        };
        let prompt = render_chunk_prompt("en", &profile, "  ", &["一"]).expect("prompt");
        assert!(!prompt.contains("Reference Examples"));
        assert!(!prompt.contains("Specific translations"));
        assert!(prompt.contains("keep the original content.\n\nUsers may provide"));
        assert!(prompt.contains("follow them when present.\n\n## Original Texts"));
    }

    #[test]
    fn response_with_matching_length_is_accepted() {
        let parsed = parse_chunk_response("  [\"你好\", \"再见\"]\n", 2).expect("parse");
        assert_eq!(parsed, vec!["你好", "再见"]);
    }

    #[test]
    fn response_shape_violations_are_rejected() {
        assert!(matches!(
            parse_chunk_response("```json\n[\"你好\"]\n```", 1),
            Err(ResponseShapeError::Decode { .. })
        ));
        assert!(matches!(
            parse_chunk_response("{\"text\": \"你好\"}", 1),
            Err(ResponseShapeError::NotAnArray)
        ));
        assert!(matches!(
            parse_chunk_response("[\"你好\"]", 2),
            Err(ResponseShapeError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            parse_chunk_response("[\"你好\", 3]", 2),
            Err(ResponseShapeError::NotAString { index: 1 })
        ));
    }
}
