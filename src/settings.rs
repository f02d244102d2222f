use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::overlay::OverlayOptions;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CharacterStyle {
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub user_name: String,
    pub gender: String,
    pub output: PathBuf,
    pub overlay: OverlayOptions,
    pub font_path: Option<PathBuf>,
    pub script_model: Option<String>,
    pub translation_model: Option<String>,
    pub image_model: Option<String>,
    pub characters: BTreeMap<String, CharacterStyle>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_name: "나".to_string(),
            gender: "female".to_string(),
            output: PathBuf::from("comic.png"),
            overlay: OverlayOptions::default(),
            font_path: None,
            script_model: None,
            translation_model: None,
            image_model: None,
            characters: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Style for `gender`; unknown genders get an empty description.
    pub fn character(&self, gender: &str) -> CharacterStyle {
        self.characters
            .get(&gender.trim().to_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    comic: Option<ComicSettings>,
    overlay: Option<OverlaySettings>,
    models: Option<ModelSettings>,
    characters: Option<BTreeMap<String, CharacterStyle>>,
}

#[derive(Debug, Default, Deserialize)]
struct ComicSettings {
    user_name: Option<String>,
    gender: Option<String>,
    output: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySettings {
    base_font_size: Option<u32>,
    min_font_size: Option<u32>,
    box_height_ratio: Option<f64>,
    padding: Option<u32>,
    max_chars_per_line: Option<usize>,
    max_lines: Option<usize>,
    text_color: Option<String>,
    box_fill: Option<String>,
    box_outline: Option<String>,
    font_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelSettings {
    script: Option<String>,
    translation: Option<String>,
    image: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("<embedded>"))?);
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge(parse_settings(&content, &path)?);
        }
    }

    Ok(settings)
}

fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile> {
    toml::from_str(content).with_context(|| format!("failed to parse settings: {}", path.display()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(comic) = incoming.comic {
            if let Some(name) = non_empty(comic.user_name) {
                self.user_name = name;
            }
            if let Some(gender) = non_empty(comic.gender) {
                self.gender = gender.trim().to_lowercase();
            }
            if let Some(output) = non_empty(comic.output) {
                self.output = PathBuf::from(output);
            }
        }
        if let Some(overlay) = incoming.overlay {
            self.merge_overlay(overlay);
        }
        if let Some(models) = incoming.models {
            if let Some(model) = non_empty(models.script) {
                self.script_model = Some(model);
            }
            if let Some(model) = non_empty(models.translation) {
                self.translation_model = Some(model);
            }
            if let Some(model) = non_empty(models.image) {
                self.image_model = Some(model);
            }
        }
        if let Some(characters) = incoming.characters {
            for (gender, style) in characters {
                let entry = self.characters.entry(gender.to_lowercase()).or_default();
                if !style.script.trim().is_empty() {
                    entry.script = style.script;
                }
                if !style.image.trim().is_empty() {
                    entry.image = style.image;
                }
            }
        }
    }

    fn merge_overlay(&mut self, overlay: OverlaySettings) {
        let options = &mut self.overlay;
        if let Some(size) = overlay.base_font_size {
            options.base_font_size = size;
        }
        if let Some(size) = overlay.min_font_size {
            options.min_font_size = size;
        }
        if let Some(ratio) = overlay.box_height_ratio {
            options.box_height_ratio = ratio;
        }
        if let Some(padding) = overlay.padding {
            options.padding = padding;
        }
        if let Some(chars) = overlay.max_chars_per_line {
            options.max_chars_per_line = chars;
        }
        if let Some(lines) = overlay.max_lines {
            options.max_lines = lines;
        }
        if let Some(color) = non_empty(overlay.text_color) {
            options.text_color = color;
        }
        if let Some(color) = non_empty(overlay.box_fill) {
            options.box_fill = color;
        }
        if let Some(color) = non_empty(overlay.box_outline) {
            options.box_outline = color;
        }
        if let Some(path) = non_empty(overlay.font_path) {
            self.font_path = Some(PathBuf::from(path));
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".diary-comic-rust"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn embedded_defaults_are_loaded() {
        with_temp_home(|home| {
            let settings = load_settings(None).expect("settings");
            assert_eq!(settings.user_name, "나");
            assert_eq!(settings.gender, "female");
            assert_eq!(settings.overlay, OverlayOptions::default());
            assert_eq!(settings.script_model.as_deref(), Some("openai:gpt-4o"));
            assert_eq!(settings.image_model.as_deref(), Some("dall-e-3"));
            assert!(!settings.character("female").image.is_empty());
            assert!(!settings.character("Male").script.is_empty());
            assert_eq!(settings.character("robot"), CharacterStyle::default());
            assert!(home.join(".diary-comic-rust/settings.toml").exists());
        });
    }

    #[test]
    fn home_local_settings_override_defaults() {
        with_temp_home(|home| {
            let dir = home.join(".diary-comic-rust");
            fs::create_dir_all(&dir).expect("mkdir");
            fs::write(
                dir.join("settings.local.toml"),
                "[comic]\ngender = \"Male\"\n\n[overlay]\nmax_lines = 3\nbox_fill = \"#fffbe6\"\nfont_path = \"/fonts/NanumGothic.ttf\"\n\n[characters.male]\nimage = \"A tall man.\"\n",
            )
            .expect("write");
            let settings = load_settings(None).expect("settings");
            assert_eq!(settings.gender, "male");
            assert_eq!(settings.overlay.max_lines, 3);
            assert_eq!(settings.overlay.box_fill, "#fffbe6");
            assert_eq!(settings.overlay.base_font_size, 28);
            assert_eq!(
                settings.font_path.as_deref(),
                Some(Path::new("/fonts/NanumGothic.ttf"))
            );
            let male = settings.character("male");
            assert_eq!(male.image, "A tall man.");
            assert!(!male.script.is_empty());
        });
    }

    #[test]
    fn explicit_settings_file_must_exist() {
        with_temp_home(|home| {
            let missing = home.join("nope.toml");
            let err = load_settings(Some(&missing)).unwrap_err();
            assert!(err.to_string().contains("settings file not found"));

            let extra = home.join("extra.toml");
            fs::write(&extra, "[comic]\nuser_name = \"민지\"\noutput = \"out/today.png\"\n")
                .expect("write");
            let settings = load_settings(Some(&extra)).expect("settings");
            assert_eq!(settings.user_name, "민지");
            assert_eq!(settings.output, PathBuf::from("out/today.png"));
        });
    }

    #[test]
    fn broken_settings_file_reports_path() {
        with_temp_home(|home| {
            let extra = home.join("broken.toml");
            fs::write(&extra, "[overlay\nmax_lines = 3").expect("write");
            let err = load_settings(Some(&extra)).unwrap_err();
            assert!(err.to_string().contains("broken.toml"));
        });
    }
}
