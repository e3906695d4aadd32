use anyhow::{Context, Result, anyhow};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub locales: Vec<String>,
    pub chunk_size: usize,
    pub reference_limit: usize,
    pub patterns: Vec<String>,
    pub backend: BackendSettings,
    pub profiles: HashMap<String, LocaleProfile>,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub provider: String,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// Per-locale prompt material: the human-readable language name and the
/// fixed term translations every request must honour, in the order the
/// settings list them.
#[derive(Debug, Clone, Default)]
pub struct LocaleProfile {
    pub name: String,
    pub glossary: Vec<GlossaryTerm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlossaryTerm {
    pub source: String,
    pub target: String,
}

impl GlossaryTerm {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl LocaleProfile {
    pub fn term(&self, source: &str) -> Option<&str> {
        self.glossary
            .iter()
            .find(|term| term.source == source)
            .map(|term| term.target.as_str())
    }

    /// Replaces an existing term in place, or appends a new one.
    fn set_term(&mut self, source: String, target: String) {
        match self.glossary.iter_mut().find(|term| term.source == source) {
            Some(term) => term.target = target,
            None => self.glossary.push(GlossaryTerm { source, target }),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            locales: vec!["zh-CN".to_string(), "en".to_string()],
            chunk_size: 24,
            reference_limit: 40,
            patterns: vec!["**/*.json".to_string()],
            backend: BackendSettings {
                provider: "claude".to_string(),
                model: None,
                max_tokens: 4000,
                timeout_secs: 120,
            },
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    system: Option<SystemSettings>,
    backend: Option<BackendSection>,
    locales: Option<HashMap<String, LocaleSection>>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemSettings {
    locales: Option<Vec<String>>,
    chunk_size: Option<usize>,
    reference_limit: Option<usize>,
    patterns: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendSection {
    provider: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LocaleSection {
    name: Option<String>,
    #[serde(default, deserialize_with = "ordered_glossary")]
    glossary: Option<Vec<(String, String)>>,
}

/// Reads a glossary table keeping the document order of its keys.
fn ordered_glossary<'de, D>(deserializer: D) -> Result<Option<Vec<(String, String)>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct GlossaryVisitor;

    impl<'de> Visitor<'de> for GlossaryVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a table of term translations")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut terms = Vec::new();
            while let Some((source, target)) = map.next_entry::<String, String>()? {
                terms.push((source, target));
            }
            Ok(terms)
        }
    }

    deserializer.deserialize_map(GlossaryVisitor).map(Some)
}

/// Settings compiled into the binary, without looking at the filesystem.
pub fn builtin_settings() -> Result<Settings> {
    let mut settings = Settings::default();
    let parsed: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse built-in settings")?;
    settings.merge(parsed);
    Ok(settings)
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = builtin_settings()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            settings.merge_file(&path)?;
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn is_known_locale(&self, locale: &str) -> bool {
        self.locales.iter().any(|known| known == locale)
    }

    pub fn validate_locale(&self, locale: &str) -> Result<()> {
        if self.is_known_locale(locale) {
            return Ok(());
        }
        Err(anyhow!(
            "unknown locale '{}' (known: {})",
            locale,
            self.locales.join(", ")
        ))
    }

    /// Profile for `locale`; locales without a configured profile fall back
    /// to their identifier and an empty glossary.
    pub fn profile(&self, locale: &str) -> LocaleProfile {
        match self.profiles.get(locale) {
            Some(profile) => profile.clone(),
            None => LocaleProfile {
                name: locale.to_string(),
                glossary: Vec::new(),
            },
        }
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(system) = incoming.system {
            if let Some(locales) = system.locales {
                let locales: Vec<String> = locales
                    .into_iter()
                    .map(|locale| locale.trim().to_string())
                    .filter(|locale| !locale.is_empty())
                    .collect();
                if !locales.is_empty() {
                    self.locales = locales;
                }
            }
            if let Some(size) = system.chunk_size
                && size > 0
            {
                self.chunk_size = size;
            }
            if let Some(limit) = system.reference_limit {
                self.reference_limit = limit;
            }
            if let Some(patterns) = system.patterns
                && !patterns.is_empty()
            {
                self.patterns = patterns;
            }
        }
        if let Some(backend) = incoming.backend {
            if let Some(provider) = backend.provider
                && !provider.trim().is_empty()
            {
                self.backend.provider = provider.trim().to_string();
            }
            if let Some(model) = backend.model
                && !model.trim().is_empty()
            {
                self.backend.model = Some(model.trim().to_string());
            }
            if let Some(max_tokens) = backend.max_tokens
                && max_tokens > 0
            {
                self.backend.max_tokens = max_tokens;
            }
            if let Some(timeout) = backend.timeout_secs
                && timeout > 0
            {
                self.backend.timeout_secs = timeout;
            }
        }
        if let Some(locales) = incoming.locales {
            for (locale, section) in locales {
                let profile = self
                    .profiles
                    .entry(locale.clone())
                    .or_insert_with(|| LocaleProfile {
                        name: locale.clone(),
                        glossary: Vec::new(),
                    });
                if let Some(name) = section.name
                    && !name.trim().is_empty()
                {
                    profile.name = name;
                }
                if let Some(glossary) = section.glossary {
                    for (source, target) in glossary {
                        profile.set_term(source, target);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_settings_know_default_locales() {
        let settings = builtin_settings().expect("builtin settings");
        assert_eq!(settings.locales, vec!["zh-CN", "en"]);
        assert_eq!(settings.chunk_size, 24);
        assert_eq!(settings.reference_limit, 40);
        let profile = settings.profile("en");
        assert_eq!(profile.name, "English");
        assert_eq!(profile.term("蓮ノ空"), Some("Hasu no Sora"));
    }

    #[test]
    fn extra_settings_override_and_extend() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("extra.toml");
        fs::write(
            &path,
            r#"
[system]
locales = ["zh-CN", "en", "ko"]
chunk_size = 8

[backend]
model = "claude-test"

[locales.ko]
name = "Korean"

[locales.en.glossary]
"メンタル" = "Stamina"
"ライブグランプリ" = "Live Grand Prix"
"#,
        )
        .expect("write settings");

        let mut settings = builtin_settings().expect("builtin settings");
        settings.merge_file(&path).expect("merge");
        assert!(settings.is_known_locale("ko"));
        assert_eq!(settings.chunk_size, 8);
        assert_eq!(settings.backend.model.as_deref(), Some("claude-test"));
        assert_eq!(settings.profile("ko").name, "Korean");
        let en = settings.profile("en");
        assert_eq!(en.term("メンタル"), Some("Stamina"));
        assert_eq!(en.term("ボルテージ"), Some("Voltage"));
        let position = |source: &str| en.glossary.iter().position(|term| term.source == source);
        assert!(position("ボルテージ") < position("メンタル"));
        assert!(position("メンタル") < position("スキルハート"));
        assert_eq!(
            en.glossary.last(),
            Some(&GlossaryTerm::new("ライブグランプリ", "Live Grand Prix"))
        );
    }

    #[test]
    fn glossary_keeps_settings_order() {
        let settings = builtin_settings().expect("builtin settings");
        let zh = settings.profile("zh-CN");
        let sources: Vec<&str> = zh.glossary.iter().map(|term| term.source.as_str()).collect();
        assert_eq!(sources.first(), Some(&"おとむねこずえ"));
        assert_eq!(sources.last(), Some(&"みらくらぱーく！"));
        let position = |source: &str| sources.iter().position(|known| *known == source);
        assert!(position("かつらぎいずみ") < position("蓮ノ空"));
        assert!(position("蓮ノ空") < position("スクールアイドル"));
    }

    #[test]
    fn unknown_locale_is_rejected() {
        let settings = Settings::default();
        assert!(settings.validate_locale("zh-CN").is_ok());
        let err = settings.validate_locale("fr").unwrap_err();
        assert!(err.to_string().contains("unknown locale 'fr'"));
    }

    #[test]
    fn missing_profile_falls_back_to_locale_id() {
        let settings = Settings::default();
        let profile = settings.profile("ja");
        assert_eq!(profile.name, "ja");
        assert!(profile.glossary.is_empty());
    }
}
