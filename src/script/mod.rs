//! Four-panel script generation from a diary entry.

mod parse;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tera::{Context as TeraContext, Tera};
use tracing::{debug, info};

use crate::providers::{Provider, ProviderUsage};
use crate::settings::CharacterStyle;

pub use parse::{ScriptField, ScriptParseError, parse_script};

const SCRIPT_PROMPT_TEMPLATE: &str = include_str!("prompts/script_prompt.tera");
pub const SCRIPT_TEMPERATURE: f32 = 0.7;

/// One panel of the comic: what is drawn and what is said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub scene: String,
    pub dialogue: String,
}

impl SceneRecord {
    pub fn new(scene: impl Into<String>, dialogue: impl Into<String>) -> Self {
        Self {
            scene: scene.into(),
            dialogue: dialogue.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Script {
    pub scenes: Vec<SceneRecord>,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Serialize)]
struct CharacterLine<'a> {
    gender: &'a str,
    description: &'a str,
}

pub fn render_script_prompt(
    user_name: &str,
    diary: &str,
    characters: &BTreeMap<String, CharacterStyle>,
) -> Result<String> {
    let lines: Vec<CharacterLine<'_>> = characters
        .iter()
        .filter(|(_, style)| !style.script.trim().is_empty())
        .map(|(gender, style)| CharacterLine {
            gender,
            description: style.script.trim(),
        })
        .collect();
    let mut context = TeraContext::new();
    context.insert("user_name", user_name);
    context.insert("diary", diary.trim());
    context.insert("characters", &lines);
    Tera::one_off(SCRIPT_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render script prompt")
}

#[derive(Debug, Clone)]
pub struct ScriptWriter<P: Provider> {
    provider: P,
    characters: BTreeMap<String, CharacterStyle>,
}

impl<P: Provider> ScriptWriter<P> {
    pub fn new(provider: P, characters: BTreeMap<String, CharacterStyle>) -> Self {
        Self {
            provider,
            characters,
        }
    }

    pub async fn write(&self, user_name: &str, diary: &str) -> Result<Script> {
        let prompt = render_script_prompt(user_name, diary, &self.characters)?;
        info!("requesting 4-panel script");
        let completion = self
            .provider
            .clone()
            .with_temperature(SCRIPT_TEMPERATURE)
            .append_user_input(prompt)
            .complete()
            .await
            .with_context(|| "script generation failed")?;
        debug!("script response:\n{}", completion.text);
        let scenes = parse_script(&completion.text)?;
        Ok(Script {
            scenes,
            model: completion.model,
            usage: completion.usage,
        })
    }
}
