use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use resvg::render;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use super::font::{OverlayFont, SizedFont};
use super::layout::BoxPx;

/// Top-left corner of a text line and the box it must stay inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextAnchor {
    pub x: u32,
    pub y: u32,
    pub clip: BoxPx,
}

/// Drawing primitives the composer needs from an image surface.
pub trait Surface {
    fn draw_filled_rect(&mut self, rect: BoxPx, fill: &str, outline: &str);
    fn draw_text(&mut self, anchor: TextAnchor, text: &str, color: &str, font: &SizedFont<'_>);
}

/// Collects drawing calls as an SVG document sized like the target image.
pub struct SvgSurface {
    width: u32,
    height: u32,
    body: String,
    clip_count: usize,
}

impl SvgSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            body: String::new(),
            clip_count: 0,
        }
    }

    pub fn to_svg(&self) -> String {
        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        ));
        svg.push_str(&self.body);
        svg.push_str("</svg>");
        svg
    }

    /// Renders the collected overlay on a transparent layer.
    pub fn rasterize(&self, font: &OverlayFont) -> Result<RgbaImage> {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        if !font.is_system() {
            db.load_font_data(font.data().to_vec());
        }
        let options = Options {
            fontdb: Arc::new(db),
            ..Options::default()
        };
        let svg = self.to_svg();
        let tree = Tree::from_str(&svg, &options).with_context(|| "failed to parse overlay SVG")?;
        let mut pixmap = Pixmap::new(self.width, self.height)
            .ok_or_else(|| anyhow!("empty overlay size {}x{}", self.width, self.height))?;
        render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        let mut layer = RgbaImage::new(self.width, self.height);
        for (pixel, source) in layer.pixels_mut().zip(pixmap.pixels()) {
            let color = source.demultiply();
            pixel.0 = [color.red(), color.green(), color.blue(), color.alpha()];
        }
        Ok(layer)
    }
}

impl Surface for SvgSurface {
    fn draw_filled_rect(&mut self, rect: BoxPx, fill: &str, outline: &str) {
        self.body.push_str(&format!(
            r##"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="{fill}" stroke="{stroke}" stroke-width="1"/>"##,
            x = rect.x,
            y = rect.y,
            w = rect.w,
            h = rect.h,
            fill = escape_xml(fill),
            stroke = escape_xml(outline)
        ));
    }

    fn draw_text(&mut self, anchor: TextAnchor, text: &str, color: &str, font: &SizedFont<'_>) {
        let clip_id = format!("clip-{}", self.clip_count);
        self.clip_count += 1;
        let BoxPx { x, y, w, h } = anchor.clip;
        self.body.push_str(&format!(
            r#"<clipPath id="{id}"><rect x="{x}" y="{y}" width="{w}" height="{h}"/></clipPath>"#,
            id = clip_id,
        ));
        // SVG positions text by its baseline; the anchor is the line's top edge.
        self.body.push_str(&format!(
            r#"<text x="{x}" y="{y}" font-size="{size}" fill="{color}" font-family="{family}" clip-path="url(#{clip})">{text}</text>"#,
            x = anchor.x,
            y = anchor.y + font.size,
            size = font.size,
            color = escape_xml(color),
            family = escape_xml(font.font.family()),
            clip = clip_id,
            text = escape_xml(text)
        ));
    }
}

/// Alpha-blends `layer` over `image`; both must share dimensions.
pub fn blend_onto(image: &mut RgbaImage, layer: &RgbaImage) {
    image::imageops::overlay(image, layer, 0, 0);
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn svg_contains_box_and_escaped_text() {
        let font = OverlayFont::load(None).expect("system font");
        let mut surface = SvgSurface::new(100, 80);
        let rect = BoxPx {
            x: 0,
            y: 50,
            w: 50,
            h: 30,
        };
        surface.draw_filled_rect(rect, "white", "#000000");
        surface.draw_text(
            TextAnchor {
                x: 4,
                y: 54,
                clip: rect,
            },
            "<안녕> & \"hi\"",
            "black",
            &font.at_size(14),
        );
        let svg = surface.to_svg();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(r##"<rect x="0" y="50" width="50" height="30" fill="white" stroke="#000000""##));
        assert!(svg.contains(&format!(
            r#"<text x="4" y="68" font-size="14" fill="black" font-family="{}" clip-path="url(#clip-0)">"#,
            escape_xml(font.family())
        )));
        assert!(svg.contains("&lt;안녕&gt; &amp; &quot;hi&quot;"));
        assert!(svg.ends_with("</svg>"));
    }

    #[test]
    fn rasterized_text_leaves_glyph_pixels() {
        let font = OverlayFont::load(None).expect("system font");
        let mut surface = SvgSurface::new(200, 60);
        let rect = BoxPx {
            x: 0,
            y: 0,
            w: 200,
            h: 60,
        };
        surface.draw_filled_rect(rect, "white", "white");
        surface.draw_text(
            TextAnchor { x: 10, y: 10, clip: rect },
            "Hello World",
            "black",
            &font.at_size(28),
        );
        let layer = surface.rasterize(&font).expect("rasterize");
        let dark = layer
            .pixels()
            .filter(|pixel| pixel.0[3] == 255 && pixel.0[0] < 128)
            .count();
        assert!(dark > 50, "only {dark} dark pixels for {}", font.family());
    }

    #[test]
    fn rasterized_box_blends_over_image() {
        let font = OverlayFont::load(None).expect("system font");
        let mut surface = SvgSurface::new(40, 40);
        surface.draw_filled_rect(
            BoxPx {
                x: 0,
                y: 20,
                w: 40,
                h: 20,
            },
            "white",
            "white",
        );
        let layer = surface.rasterize(&font).expect("rasterize");
        let mut image = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255]));
        blend_onto(&mut image, &layer);
        assert_eq!(image.get_pixel(20, 30), &Rgba([255, 255, 255, 255]));
        assert_eq!(image.get_pixel(20, 5), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn empty_surface_cannot_rasterize() {
        let font = OverlayFont::load(None).expect("system font");
        let surface = SvgSurface::new(0, 0);
        assert!(surface.rasterize(&font).is_err());
    }
}
