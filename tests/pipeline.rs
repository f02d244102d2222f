use anyhow::anyhow;
use diary_comic_rust::illustration::ImageFuture;
use diary_comic_rust::providers::{
    CompletionFuture, ProviderCompletion, ProviderFuture, ProviderResponse, ToolSpec,
};
use diary_comic_rust::{
    CharacterStyle, ComicRequest, GeneratedImage, ImageGenerator, Illustration, OverlayOptions,
    Provider, ProviderUsage, ScriptWriter, Translator, make_comic,
};
use image::{Rgba, RgbaImage};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const SCRIPT: &str = "[Panel 1]\nScene: 민지 wakes up.\nDialogue: Good morning!\n\n[Panel 2]\nScene: She jogs.\nDialogue: So fresh.\n\n[Panel 3]\nScene: Coffee with a friend.\nDialogue: Long time!\n\n[Panel 4]\nScene: Diary at night.\nDialogue: Good morning!";

/// Answers completions with a fixed script and tool calls with a tagged echo.
#[derive(Clone, Default)]
struct FakeModel {
    user: Vec<String>,
    tool_calls: Arc<Mutex<usize>>,
}

impl Provider for FakeModel {
    fn append_system_input(self, _input: String) -> Self {
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.user.push(input);
        self
    }

    fn register_tool(self, _tool: ToolSpec) -> Self {
        self
    }

    fn with_temperature(self, _temperature: f32) -> Self {
        self
    }

    fn call_tool(self, _tool_name: &str) -> ProviderFuture {
        Box::pin(async move {
            *self.tool_calls.lock().expect("lock") += 1;
            let line = self.user.last().cloned().unwrap_or_default();
            Ok(ProviderResponse {
                args: json!({"translation": format!("[ko] {}", line), "target_language": "ko"}),
                model: Some("fake-translator".to_string()),
                usage: Some(ProviderUsage {
                    prompt_tokens: Some(12),
                    completion_tokens: Some(3),
                    total_tokens: None,
                }),
            })
        })
    }

    fn complete(self) -> CompletionFuture {
        Box::pin(async move {
            if self.user.is_empty() {
                return Err(anyhow!("no prompt"));
            }
            Ok(ProviderCompletion {
                text: SCRIPT.to_string(),
                model: Some("fake-writer".to_string()),
                usage: None,
            })
        })
    }
}

struct FlatImage {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ImageGenerator for FlatImage {
    fn generate(&self, prompt: &str) -> ImageFuture {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        Box::pin(async {
            Ok(GeneratedImage {
                image: RgbaImage::from_pixel(1024, 1024, Rgba([40, 40, 40, 255])),
                model: "fake-painter".to_string(),
                revised_prompt: None,
            })
        })
    }
}

fn character() -> CharacterStyle {
    CharacterStyle {
        script: "A woman with a ponytail.".to_string(),
        image: "A cheerful woman with a ponytail.".to_string(),
    }
}

#[tokio::test]
async fn diary_becomes_captioned_comic() {
    let model = FakeModel::default();
    let tool_calls = model.tool_calls.clone();
    let writer = ScriptWriter::new(model.clone(), BTreeMap::new());
    let translator = Translator::new(model);
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let painter = FlatImage {
        prompts: prompts.clone(),
    };
    let character = character();
    let options = OverlayOptions::default();
    let request = ComicRequest {
        diary: "오늘은 친구를 만났다.",
        user_name: "민지",
        character: &character,
        font_path: None,
        overlay: &options,
    };

    let comic = make_comic(&request, &writer, &translator, Illustration::Generate(&painter))
        .await
        .expect("comic");

    assert_eq!(comic.script.scenes.len(), 4);
    assert_eq!(comic.script.model.as_deref(), Some("fake-writer"));
    assert_eq!(comic.image_model.as_deref(), Some("fake-painter"));
    // panels 1 and 4 repeat a line; both are still translated
    assert_eq!(*tool_calls.lock().expect("lock"), 4);
    assert_eq!(comic.translation_model.as_deref(), Some("fake-translator"));
    assert_eq!(
        comic.translation_usage,
        Some(ProviderUsage {
            prompt_tokens: Some(48),
            completion_tokens: Some(12),
            total_tokens: Some(60),
        })
    );

    let prompts = prompts.lock().expect("lock");
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("The main character is 민지. A cheerful woman with a ponytail."));
    assert!(prompts[0].contains("[Panel 3] Scene: Coffee with a friend.. Dialogue: Long time!"));

    let texts: Vec<&str> = comic.panels.iter().map(|panel| panel.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["[ko] Good morning!", "[ko] So fresh.", "[ko] Long time!", "[ko] Good morning!"]
    );
    assert_eq!(comic.image.get_pixel(500, 505).0, [255, 255, 255, 255]);
    assert_eq!(comic.image.get_pixel(10, 10).0, [40, 40, 40, 255]);
}

#[tokio::test]
async fn existing_illustration_skips_generation() {
    let model = FakeModel::default();
    let writer = ScriptWriter::new(model.clone(), BTreeMap::new());
    let translator = Translator::new(model);
    let character = CharacterStyle::default();
    let options = OverlayOptions::default();
    let request = ComicRequest {
        diary: "diary",
        user_name: "나",
        character: &character,
        font_path: None,
        overlay: &options,
    };
    let provided = RgbaImage::from_pixel(600, 600, Rgba([0, 0, 0, 255]));

    let comic = make_comic(
        &request,
        &writer,
        &translator,
        Illustration::Existing(provided),
    )
    .await
    .expect("comic");

    assert!(comic.image_model.is_none());
    assert_eq!(comic.image.dimensions(), (600, 600));
    assert_eq!(comic.panels.len(), 4);
}
