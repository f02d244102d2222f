//! Korean dialogue boxes burned into the four panels of a comic image.
//!
//! Every panel gets a full-width box across the bottom of its quadrant. The
//! dialogue is translated, wrapped by character count and drawn at the largest
//! font size whose block fits the box; when nothing fits, the smallest size is
//! used and the text is cut with an ellipsis.
//!
//! Composition is all-or-nothing: translations and layouts for all panels are
//! computed before the image is touched, and the overlay is rendered on its
//! own layer before being blended in.

mod font;
mod layout;
mod render;

use image::RgbaImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::script::SceneRecord;
use crate::translator::Translate;

pub use font::{DEFAULT_FAMILY, FALLBACK_FAMILIES, FontFace, OverlayFont, SizedFont};
pub use layout::{
    BoxPx, ELLIPSIS, LINE_GAP, LayoutResult, PanelGeometry, block_height, fit_text, line_advance,
    wrap_text,
};
pub use render::{Surface, SvgSurface, TextAnchor, blend_onto};

pub const PANEL_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayOptions {
    pub base_font_size: u32,
    pub min_font_size: u32,
    pub box_height_ratio: f64,
    pub padding: u32,
    pub max_chars_per_line: usize,
    pub max_lines: usize,
    pub text_color: String,
    pub box_fill: String,
    pub box_outline: String,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            base_font_size: 28,
            min_font_size: 14,
            box_height_ratio: 0.22,
            padding: 20,
            max_chars_per_line: 20,
            max_lines: 5,
            text_color: "black".to_string(),
            box_fill: "white".to_string(),
            box_outline: "white".to_string(),
        }
    }
}

impl OverlayOptions {
    pub fn validate(&self) -> Result<(), OverlayError> {
        if self.min_font_size == 0 {
            return Err(OverlayError::InvalidOptions(
                "min_font_size must be positive".to_string(),
            ));
        }
        if self.min_font_size > self.base_font_size {
            return Err(OverlayError::InvalidOptions(format!(
                "min_font_size ({}) is larger than base_font_size ({})",
                self.min_font_size, self.base_font_size
            )));
        }
        if !(self.box_height_ratio > 0.0 && self.box_height_ratio <= 1.0) {
            return Err(OverlayError::InvalidOptions(format!(
                "box_height_ratio must be in (0, 1] (got {})",
                self.box_height_ratio
            )));
        }
        if self.max_chars_per_line == 0 {
            return Err(OverlayError::InvalidOptions(
                "max_chars_per_line must be positive".to_string(),
            ));
        }
        if self.max_lines == 0 {
            return Err(OverlayError::InvalidOptions(
                "max_lines must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("expected {expected} scene records, got {found}")]
    Precondition { expected: usize, found: usize },

    #[error("invalid overlay options: {0}")]
    InvalidOptions(String),

    #[error("failed to load font {}", path.display())]
    FontLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to translate dialogue of panel {panel}")]
    Translation {
        panel: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to render overlay")]
    Render(#[source] anyhow::Error),
}

/// Everything decided for one panel before drawing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelLayout {
    pub index: usize,
    pub geometry: PanelGeometry,
    pub text: String,
    pub layout: LayoutResult,
}

impl PanelLayout {
    /// Top-left anchors of each line, top to bottom.
    pub fn line_anchors(&self, padding: u32) -> Vec<TextAnchor> {
        let clip = self.geometry.text_box();
        let advance = line_advance(self.layout.font_size);
        (0..self.layout.lines.len() as u32)
            .map(|row| TextAnchor {
                x: self.geometry.x + padding,
                y: clip.y + padding + row * advance,
                clip,
            })
            .collect()
    }
}

pub struct PanelTextComposer<'a, T: Translate + ?Sized> {
    options: &'a OverlayOptions,
    font: OverlayFont,
    translator: &'a T,
}

impl<'a, T: Translate + ?Sized> PanelTextComposer<'a, T> {
    pub fn new(
        options: &'a OverlayOptions,
        font_path: Option<&Path>,
        translator: &'a T,
    ) -> Result<Self, OverlayError> {
        options.validate()?;
        let font = OverlayFont::load(font_path).map_err(|source| OverlayError::FontLoad {
            path: font_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FAMILY)),
            source,
        })?;
        match font.path() {
            Some(path) => debug!("overlay font {} ({})", font.family(), path.display()),
            None => debug!("no overlay font given; using system font {}", font.family()),
        }
        Ok(Self {
            options,
            font,
            translator,
        })
    }

    pub fn font(&self) -> &OverlayFont {
        &self.font
    }

    /// Translates and fits every panel without drawing anything.
    ///
    /// `scenes` must hold exactly four records.
    pub fn layout(
        &self,
        width: u32,
        height: u32,
        scenes: &[SceneRecord],
    ) -> Result<Vec<PanelLayout>, OverlayError> {
        if scenes.len() != PANEL_COUNT {
            return Err(OverlayError::Precondition {
                expected: PANEL_COUNT,
                found: scenes.len(),
            });
        }

        let quadrants =
            PanelGeometry::quadrants(width, height, self.options.box_height_ratio);
        let mut panels = Vec::with_capacity(PANEL_COUNT);
        for (index, (scene, geometry)) in scenes.iter().zip(quadrants).enumerate() {
            let text = self
                .translator
                .translate(&scene.dialogue)
                .map_err(|source| OverlayError::Translation {
                    panel: index,
                    source,
                })?;
            let layout = fit_text(&text, geometry.box_height, self.options);
            debug!(
                "panel {}: font size {}, {} line(s){}",
                index,
                layout.font_size,
                layout.lines.len(),
                if layout.truncated { ", truncated" } else { "" }
            );
            panels.push(PanelLayout {
                index,
                geometry,
                text,
                layout,
            });
        }
        Ok(panels)
    }

    pub fn draw<S: Surface>(&self, surface: &mut S, panels: &[PanelLayout]) {
        let padding = self.options.padding;
        for panel in panels {
            surface.draw_filled_rect(
                panel.geometry.text_box(),
                &self.options.box_fill,
                &self.options.box_outline,
            );
            let font = self.font.at_size(panel.layout.font_size);
            let missing = self.font.missing_glyphs(&panel.text);
            if !missing.is_empty() {
                warn!(
                    "panel {}: font {} has no glyphs for {:?}",
                    panel.index,
                    self.font.family(),
                    missing.iter().collect::<String>()
                );
            }
            let max_width = panel.geometry.width.saturating_sub(padding * 2) as f32;
            for (line, anchor) in panel.layout.lines.iter().zip(panel.line_anchors(padding)) {
                if font.measure_width_px(line) > max_width {
                    warn!(
                        "panel {}: line wider than its box, clipping: {}",
                        panel.index, line
                    );
                }
                surface.draw_text(anchor, line, &self.options.text_color, &font);
            }
        }
    }

    pub fn compose(
        &self,
        image: &mut RgbaImage,
        scenes: &[SceneRecord],
    ) -> Result<Vec<PanelLayout>, OverlayError> {
        let (width, height) = image.dimensions();
        let panels = self.layout(width, height, scenes)?;
        let mut surface = SvgSurface::new(width, height);
        self.draw(&mut surface, &panels);
        let layer = surface.rasterize(&self.font).map_err(OverlayError::Render)?;
        blend_onto(image, &layer);
        Ok(panels)
    }
}

/// Draws the translated dialogue of `scenes` onto the four quadrants of `image`.
///
/// On error the image is left as it was.
pub fn compose<T: Translate + ?Sized>(
    image: &mut RgbaImage,
    scenes: &[SceneRecord],
    font_path: Option<&Path>,
    options: &OverlayOptions,
    translator: &T,
) -> Result<Vec<PanelLayout>, OverlayError> {
    PanelTextComposer::new(options, font_path, translator)?.compose(image, scenes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::RefCell;

    fn scenes(dialogues: &[&str]) -> Vec<SceneRecord> {
        dialogues
            .iter()
            .enumerate()
            .map(|(idx, dialogue)| SceneRecord::new(format!("scene {}", idx + 1), *dialogue))
            .collect()
    }

    fn identity(text: &str) -> anyhow::Result<String> {
        Ok(text.to_string())
    }

    #[derive(Default)]
    struct RecordingSurface {
        rects: Vec<(BoxPx, String, String)>,
        texts: Vec<(TextAnchor, String, String, u32)>,
    }

    impl Surface for RecordingSurface {
        fn draw_filled_rect(&mut self, rect: BoxPx, fill: &str, outline: &str) {
            self.rects.push((rect, fill.to_string(), outline.to_string()));
        }

        fn draw_text(
            &mut self,
            anchor: TextAnchor,
            text: &str,
            color: &str,
            font: &SizedFont<'_>,
        ) {
            self.texts
                .push((anchor, text.to_string(), color.to_string(), font.size));
        }
    }

    #[test]
    fn draws_box_and_lines_per_quadrant() {
        let options = OverlayOptions::default();
        let translator = identity;
        let composer = PanelTextComposer::new(&options, None, &translator).expect("composer");
        let panels = composer
            .layout(
                1024,
                1024,
                &scenes(&["one", "two", "aaaaaaaaa bbbbbbbbb ccccccccc", "four"]),
            )
            .expect("layout");

        let mut surface = RecordingSurface::default();
        composer.draw(&mut surface, &panels);

        let boxes: Vec<(u32, u32)> = surface.rects.iter().map(|(rect, ..)| (rect.x, rect.y)).collect();
        assert_eq!(boxes, vec![(0, 400), (512, 400), (0, 912), (512, 912)]);
        assert!(surface
            .rects
            .iter()
            .all(|(rect, fill, outline)| rect.w == 512 && rect.h == 112 && fill == "white" && outline == "white"));

        assert_eq!(surface.texts.len(), 5);
        let (anchor, text, color, size) = &surface.texts[0];
        assert_eq!((anchor.x, anchor.y), (20, 420));
        assert_eq!(text, "one");
        assert_eq!(color, "black");
        assert_eq!(*size, 28);

        let third: Vec<_> = surface
            .texts
            .iter()
            .filter(|(anchor, ..)| anchor.clip.x == 0 && anchor.clip.y == 912)
            .map(|(anchor, text, ..)| (anchor.x, anchor.y, text.clone()))
            .collect();
        assert_eq!(
            third,
            vec![
                (20, 932, "aaaaaaaaa bbbbbbbbb".to_string()),
                (20, 966, "ccccccccc".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_wrong_scene_count_before_translating() {
        let options = OverlayOptions::default();
        let calls = RefCell::new(0usize);
        let translator = |text: &str| -> anyhow::Result<String> {
            *calls.borrow_mut() += 1;
            Ok(text.to_string())
        };
        let composer = PanelTextComposer::new(&options, None, &translator).expect("composer");
        let err = composer
            .layout(1024, 1024, &scenes(&["a", "b", "c"]))
            .expect_err("three scenes");
        assert!(matches!(
            err,
            OverlayError::Precondition {
                expected: 4,
                found: 3
            }
        ));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn translation_failure_names_panel() {
        let options = OverlayOptions::default();
        let translator = |text: &str| -> anyhow::Result<String> {
            if text == "boom" {
                Err(anyhow!("translation service unavailable"))
            } else {
                Ok(text.to_string())
            }
        };
        let composer = PanelTextComposer::new(&options, None, &translator).expect("composer");
        let err = composer
            .layout(1024, 1024, &scenes(&["a", "b", "boom", "d"]))
            .expect_err("translation error");
        match err {
            OverlayError::Translation { panel, source } => {
                assert_eq!(panel, 2);
                assert_eq!(source.to_string(), "translation service unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_options_are_rejected() {
        let translator = identity;
        let mut options = OverlayOptions::default();
        options.min_font_size = 30;
        assert!(matches!(
            PanelTextComposer::new(&options, None, &translator),
            Err(OverlayError::InvalidOptions(_))
        ));

        let mut options = OverlayOptions::default();
        options.box_height_ratio = 0.0;
        assert!(matches!(
            PanelTextComposer::new(&options, None, &translator),
            Err(OverlayError::InvalidOptions(_))
        ));
    }

    #[test]
    fn bad_font_path_is_a_font_load_error() {
        let options = OverlayOptions::default();
        let translator = identity;
        let err = PanelTextComposer::new(
            &options,
            Some(Path::new("/nonexistent/NanumGothic.ttf")),
            &translator,
        )
        .err()
        .expect("font error");
        match err {
            OverlayError::FontLoad { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/NanumGothic.ttf"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_dialogue_draws_only_the_box() {
        let options = OverlayOptions::default();
        let translator = identity;
        let composer = PanelTextComposer::new(&options, None, &translator).expect("composer");
        let panels = composer
            .layout(512, 512, &scenes(&["", "", "", ""]))
            .expect("layout");
        let mut surface = RecordingSurface::default();
        composer.draw(&mut surface, &panels);
        assert_eq!(surface.rects.len(), 4);
        assert!(surface.texts.is_empty());
        assert!(panels.iter().all(|panel| panel.layout.font_size == 28));
    }
}
