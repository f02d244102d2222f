use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tera::{Context as TeraContext, Tera};
use tracing::debug;

use crate::providers::{Provider, ProviderUsage, ToolSpec};
use crate::script::SceneRecord;

pub const TOOL_NAME: &str = "deliver_translation";
pub const TARGET_LANGUAGE: &str = "ko";

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/translation_prompt.tera");

/// Synchronous text-to-Korean oracle used while laying out panels.
pub trait Translate {
    fn translate(&self, text: &str) -> Result<String>;
}

impl<F> Translate for F
where
    F: Fn(&str) -> Result<String>,
{
    fn translate(&self, text: &str) -> Result<String> {
        self(text)
    }
}

/// Translations computed ahead of composition, keyed by source text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationTable {
    entries: HashMap<String, String>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<String>, translation: impl Into<String>) {
        self.entries.insert(source.into(), translation.into());
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.entries.get(source).map(String::as_str)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.entries.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Translate for TranslationTable {
    fn translate(&self, text: &str) -> Result<String> {
        self.get(text)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no translation prepared for '{}'", text))
    }
}

/// Result of translating every panel: the lookup table plus what it cost.
#[derive(Debug, Clone, Default)]
pub struct SceneTranslations {
    pub table: TranslationTable,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone)]
pub struct TranslationOutput {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

pub fn tool_spec() -> ToolSpec {
    ToolSpec {
        name: TOOL_NAME.to_string(),
        description: "Return the Korean translation of the dialogue line.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "translation": {"type": "string"},
                "target_language": {"type": "string"}
            },
            "required": ["translation", "target_language"]
        }),
    }
}

pub fn render_system_prompt() -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("target_lang", TARGET_LANGUAGE);
    context.insert("tool_name", TOOL_NAME);
    Tera::one_off(SYSTEM_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render translation prompt")
}

#[derive(Debug, Deserialize)]
struct ToolArgs {
    translation: String,
    target_language: String,
}

fn parse_tool_args(value: Value) -> Result<String> {
    let args: ToolArgs =
        serde_json::from_value(value).with_context(|| "invalid translation tool arguments")?;
    if args.translation.trim().is_empty() {
        return Err(anyhow!("translation is empty"));
    }
    let target = normalize_lang_code(&args.target_language);
    if target != TARGET_LANGUAGE {
        return Err(anyhow!(
            "target_language mismatch: expected {}, got {}",
            TARGET_LANGUAGE,
            args.target_language.trim()
        ));
    }
    Ok(args.translation.trim().to_string())
}

fn normalize_lang_code(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

#[derive(Debug, Clone)]
pub struct Translator<P: Provider> {
    provider: P,
}

impl<P: Provider> Translator<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub async fn translate(&self, text: &str) -> Result<TranslationOutput> {
        let input = text.trim();
        if input.is_empty() {
            return Ok(TranslationOutput {
                text: String::new(),
                model: None,
                usage: None,
            });
        }
        let response = self
            .provider
            .clone()
            .register_tool(tool_spec())
            .append_system_input(render_system_prompt()?)
            .append_user_input(input.to_string())
            .call_tool(TOOL_NAME)
            .await?;
        let translated = parse_tool_args(response.args)?;
        debug!("translated '{}' -> '{}'", input, translated);
        Ok(TranslationOutput {
            text: translated,
            model: response.model,
            usage: response.usage,
        })
    }

    /// Translates the dialogue of every panel, one request at a time.
    ///
    /// Repeated lines are sent again; only empty dialogue skips the request.
    pub async fn translate_scenes(&self, scenes: &[SceneRecord]) -> Result<SceneTranslations> {
        let mut translations = SceneTranslations::default();
        for (index, scene) in scenes.iter().enumerate() {
            let output = self
                .translate(&scene.dialogue)
                .await
                .with_context(|| format!("failed to translate dialogue of panel {}", index))?;
            if output.model.is_some() {
                translations.model = output.model;
            }
            if let Some(usage) = output.usage.as_ref() {
                translations
                    .usage
                    .get_or_insert_with(ProviderUsage::default)
                    .accumulate(usage);
            }
            translations
                .table
                .insert(scene.dialogue.clone(), output.text);
        }
        Ok(translations)
    }
}
