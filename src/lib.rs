use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub mod illustration;
pub mod logging;
pub mod overlay;
pub mod providers;
pub mod script;
pub mod settings;
#[cfg(test)]
mod test_util;
pub mod translator;

pub use illustration::{GeneratedImage, ImageGenerator, OpenAIImages, build_image_prompt};
pub use overlay::{OverlayError, OverlayOptions, PanelLayout, PanelTextComposer};
pub use providers::{Claude, OpenAI, Provider, ProviderImpl, ProviderKind, ProviderUsage};
pub use script::{SceneRecord, Script, ScriptWriter};
pub use settings::{CharacterStyle, Settings};
pub use translator::{SceneTranslations, Translate, TranslationTable, Translator};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub user_name: Option<String>,
    pub gender: Option<String>,
    pub font_path: Option<String>,
    pub output: Option<String>,
    pub image_path: Option<String>,
    pub model: Option<String>,
    pub translation_model: Option<String>,
    pub image_model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
    pub dump_script: bool,
    pub with_using_tokens: bool,
    pub with_using_model: bool,
}

/// Where the 2x2 illustration comes from.
pub enum Illustration<'a> {
    Existing(RgbaImage),
    Generate(&'a dyn ImageGenerator),
}

#[derive(Debug, Clone)]
pub struct ComicRequest<'a> {
    pub diary: &'a str,
    pub user_name: &'a str,
    pub character: &'a CharacterStyle,
    pub font_path: Option<&'a Path>,
    pub overlay: &'a OverlayOptions,
}

#[derive(Debug, Clone)]
pub struct Comic {
    pub image: RgbaImage,
    pub script: Script,
    pub panels: Vec<PanelLayout>,
    pub image_model: Option<String>,
    pub translation_model: Option<String>,
    pub translation_usage: Option<ProviderUsage>,
}

/// Script, illustration, translation, then the dialogue overlay.
pub async fn make_comic<S: Provider, T: Provider>(
    request: &ComicRequest<'_>,
    writer: &ScriptWriter<S>,
    translator: &Translator<T>,
    illustration: Illustration<'_>,
) -> Result<Comic> {
    let script = writer.write(request.user_name, request.diary).await?;
    info!("script ready: {} panels", script.scenes.len());

    let (mut image, image_model) = match illustration {
        Illustration::Existing(image) => (image, None),
        Illustration::Generate(generator) => {
            let prompt =
                build_image_prompt(&script.scenes, request.user_name, &request.character.image);
            let generated = generator
                .generate(&prompt)
                .await
                .with_context(|| "image generation failed")?;
            if let Some(revised) = generated.revised_prompt.as_deref() {
                info!("revised image prompt: {}", revised);
            }
            (generated.image, Some(generated.model))
        }
    };

    let translations = translator.translate_scenes(&script.scenes).await?;
    let panels = overlay::compose(
        &mut image,
        &script.scenes,
        request.font_path,
        request.overlay,
        &translations.table,
    )?;

    Ok(Comic {
        image,
        script,
        panels,
        image_model,
        translation_model: translations.model,
        translation_usage: translations.usage,
    })
}

pub async fn run(config: Config, input: Option<String>) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;

    let input = input.unwrap_or_default();
    let diary = input.trim();
    if diary.is_empty() {
        return Err(anyhow!("diary text is empty"));
    }

    let user_name = non_empty(config.user_name).unwrap_or_else(|| settings.user_name.clone());
    let gender = non_empty(config.gender)
        .map(|gender| gender.trim().to_lowercase())
        .unwrap_or_else(|| settings.gender.clone());
    let character = settings.character(&gender);
    if character.image.trim().is_empty() {
        warn!("no character style configured for '{}'", gender);
    }

    let script_model = config.model.as_deref().or(settings.script_model.as_deref());
    let writer = ScriptWriter::new(
        provider_for(script_model, config.key.as_deref())?,
        settings.characters.clone(),
    );

    if config.dump_script {
        let script = writer.write(&user_name, diary).await?;
        return serde_json::to_string_pretty(&script.scenes)
            .with_context(|| "failed to serialize script");
    }

    let translation_model = config
        .translation_model
        .as_deref()
        .or(settings.translation_model.as_deref());
    let translator = Translator::new(provider_for(translation_model, config.key.as_deref())?);

    let generator: OpenAIImages;
    let illustration = match non_empty(config.image_path) {
        Some(path) => Illustration::Existing(load_image(Path::new(&path))?),
        None => {
            let key = providers::resolve_key(ProviderKind::OpenAI, config.key.as_deref())
                .with_context(|| "image generation needs an OpenAI API key")?;
            let model = config
                .image_model
                .or_else(|| settings.image_model.clone())
                .unwrap_or_default();
            generator = OpenAIImages::new(key).with_model(model);
            Illustration::Generate(&generator)
        }
    };

    let font_path = non_empty(config.font_path)
        .map(PathBuf::from)
        .or_else(|| settings.font_path.clone());
    let request = ComicRequest {
        diary,
        user_name: &user_name,
        character: &character,
        font_path: font_path.as_deref(),
        overlay: &settings.overlay,
    };
    let comic = make_comic(&request, &writer, &translator, illustration).await?;

    let output = non_empty(config.output)
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.output.clone());
    save_png(&comic.image, &output)?;
    info!("saved {}", output.display());

    Ok(format_summary(
        &output,
        &comic,
        config.with_using_model,
        config.with_using_tokens,
    ))
}

fn provider_for(model_arg: Option<&str>, key: Option<&str>) -> Result<ProviderImpl> {
    let selection = providers::resolve_provider_selection(model_arg, key)?;
    let key = providers::resolve_key(selection.provider, key)
        .with_context(|| "no API key found for selected provider")?;
    Ok(providers::build_provider(
        selection.provider,
        key,
        selection.requested_model,
    ))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub fn load_image(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to open image: {}", path.display()))?;
    Ok(image.to_rgba8())
}

pub fn save_png(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to write image: {}", path.display()))
}

fn format_summary(
    output: &Path,
    comic: &Comic,
    with_using_model: bool,
    with_using_tokens: bool,
) -> String {
    let mut lines = vec![format!("saved: {}", output.display())];
    for panel in &comic.panels {
        lines.push(format!(
            "panel {}: {}px, {} line(s){}",
            panel.index + 1,
            panel.layout.font_size,
            panel.layout.lines.len(),
            if panel.layout.truncated {
                ", truncated"
            } else {
                ""
            }
        ));
    }

    if with_using_model {
        let script = comic.script.model.as_deref().unwrap_or("unavailable");
        lines.push(format!("script model: {}", script));
        let translation = comic.translation_model.as_deref().unwrap_or("unavailable");
        lines.push(format!("translation model: {}", translation));
        let image = comic.image_model.as_deref().unwrap_or("provided");
        lines.push(format!("image model: {}", image));
    }
    if with_using_tokens {
        lines.push(format!("script {}", format_usage(comic.script.usage.as_ref())));
        lines.push(format!(
            "translation {}",
            format_usage(comic.translation_usage.as_ref())
        ));
    }
    lines.join("\n")
}

fn format_usage(usage: Option<&ProviderUsage>) -> String {
    let Some(usage) = usage else {
        return "tokens: unavailable".to_string();
    };
    let total = usage.total();

    let mut parts = Vec::new();
    if let Some(prompt) = usage.prompt_tokens {
        parts.push(format!("prompt={}", prompt));
    }
    if let Some(completion) = usage.completion_tokens {
        parts.push(format!("completion={}", completion));
    }
    if let Some(total) = total {
        parts.push(format!("total={}", total));
    }

    if parts.is_empty() {
        "tokens: unavailable".to_string()
    } else {
        format!("tokens: {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{LayoutResult, PanelGeometry};

    fn comic() -> Comic {
        let geometry = PanelGeometry::quadrants(100, 100, 0.5)[0];
        Comic {
            image: RgbaImage::new(1, 1),
            script: Script {
                scenes: Vec::new(),
                model: Some("gpt-4o".to_string()),
                usage: Some(ProviderUsage {
                    prompt_tokens: Some(300),
                    completion_tokens: Some(120),
                    total_tokens: None,
                }),
            },
            panels: vec![PanelLayout {
                index: 0,
                geometry,
                text: "안녕".to_string(),
                layout: LayoutResult {
                    font_size: 14,
                    lines: vec!["안녕...".to_string()],
                    truncated: true,
                },
            }],
            image_model: None,
            translation_model: Some("claude-3-5-haiku".to_string()),
            translation_usage: Some(ProviderUsage {
                prompt_tokens: Some(200),
                completion_tokens: Some(40),
                total_tokens: Some(240),
            }),
        }
    }

    #[test]
    fn summary_lists_panels_and_metadata() {
        let summary = format_summary(Path::new("out/comic.png"), &comic(), true, true);
        assert_eq!(
            summary,
            "saved: out/comic.png\npanel 1: 14px, 1 line(s), truncated\nscript model: gpt-4o\ntranslation model: claude-3-5-haiku\nimage model: provided\nscript tokens: prompt=300, completion=120, total=420\ntranslation tokens: prompt=200, completion=40, total=240"
        );
    }

    #[test]
    fn usage_without_counts_is_unavailable() {
        assert_eq!(format_usage(None), "tokens: unavailable");
        let empty = ProviderUsage {
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
        };
        assert_eq!(format_usage(Some(&empty)), "tokens: unavailable");
    }

    #[test]
    fn save_png_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/comic.png");
        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(1, 1, image::Rgba([1, 2, 3, 255]));
        save_png(&image, &path).expect("save");
        let loaded = load_image(&path).expect("load");
        assert_eq!(loaded.get_pixel(1, 1).0, [1, 2, 3, 255]);
    }

    #[test]
    fn missing_image_reports_path() {
        let err = load_image(Path::new("/definitely/missing.png")).unwrap_err();
        assert!(err.to_string().contains("/definitely/missing.png"));
    }
}
