//! The 2x2 comic illustration behind the dialogue boxes.

mod openai;

use anyhow::Result;
use image::RgbaImage;
use std::future::Future;
use std::pin::Pin;

use crate::script::SceneRecord;

pub use openai::OpenAIImages;

pub const IMAGE_SIZE: u32 = 1024;

pub type ImageFuture = Pin<Box<dyn Future<Output = Result<GeneratedImage>> + Send>>;

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: RgbaImage,
    pub model: String,
    pub revised_prompt: Option<String>,
}

/// Turns a prompt into one square image.
pub trait ImageGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> ImageFuture;
}

/// Combined prompt asking for all four panels in a single image.
pub fn build_image_prompt(scenes: &[SceneRecord], user_name: &str, character: &str) -> String {
    let mut prompt = format!(
        "The main character is {}. {} Do not use speech bubbles.Create a 4-panel wholesome slice-of-life comic. Each panel is described below:\n",
        user_name, character
    );
    for (index, scene) in scenes.iter().enumerate() {
        prompt.push_str(&format!(
            "[Panel {}] Scene: {}. Dialogue: {}\n",
            index + 1,
            scene.scene,
            scene.dialogue
        ));
    }
    prompt.push_str(&format!(
        "Draw all 4 panels in a single {size}x{size} image, arranged in 2x2 layout. \
         Do not include any text for image generation. Asian style art, and consistent Korean characters. \
         Avoid violence, sensitive topics, or anything that violates content policies.",
        size = IMAGE_SIZE
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_panels_in_order() {
        let scenes = vec![
            SceneRecord::new("Morning", "\"Hi\""),
            SceneRecord::new("Noon", "\"Lunch!\""),
        ];
        let prompt = build_image_prompt(&scenes, "민지", "A woman.");
        assert!(prompt.starts_with("The main character is 민지. A woman. Do not use speech bubbles."));
        assert!(prompt.contains("[Panel 1] Scene: Morning. Dialogue: \"Hi\"\n[Panel 2] Scene: Noon."));
        assert!(prompt.ends_with("anything that violates content policies."));
    }

    #[test]
    fn empty_character_keeps_spacing() {
        let prompt = build_image_prompt(&[], "나", "");
        assert!(prompt.starts_with("The main character is 나.  Do not use speech bubbles."));
    }
}
