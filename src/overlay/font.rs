use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

pub const DEFAULT_FAMILY: &str = "sans-serif";

/// Installed families tried, in order, when no font file is given. Korean
/// faces come first so Hangul dialogue gets real glyphs.
pub const FALLBACK_FAMILIES: &[&str] = &[
    "Noto Sans CJK KR",
    "Noto Sans KR",
    "NanumGothic",
    "Apple SD Gothic Neo",
    "Malgun Gothic",
    "DejaVu Sans",
    "Liberation Sans",
    "Arial",
];

#[derive(Debug, Clone)]
pub struct FontFace {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
    face_index: u32,
}

impl FontFace {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

/// Font used for the dialogue text.
///
/// `System` is the first installed face matching [`FALLBACK_FAMILIES`] or the
/// generic sans-serif family, so the SVG always names a family the renderer
/// can find.
#[derive(Debug, Clone)]
pub enum OverlayFont {
    File { path: PathBuf, face: FontFace },
    System { face: FontFace },
}

/// A font paired with the point size chosen for one panel.
#[derive(Debug, Clone, Copy)]
pub struct SizedFont<'a> {
    pub font: &'a OverlayFont,
    pub size: u32,
}

impl OverlayFont {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            let mut db = fontdb::Database::new();
            db.load_system_fonts();
            let face = resolve_system_face(&db)?;
            return Ok(Self::System { face });
        };
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font: {}", path.display()))?;
        let face = parse_font_face(data)
            .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))?;
        Ok(Self::File {
            path: path.to_path_buf(),
            face,
        })
    }

    pub fn face(&self) -> &FontFace {
        match self {
            Self::File { face, .. } | Self::System { face } => face,
        }
    }

    pub fn family(&self) -> &str {
        self.face().family().unwrap_or(DEFAULT_FAMILY)
    }

    pub fn data(&self) -> &[u8] {
        self.face().data()
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::System { .. } => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// Characters of `text` the face has no glyph for.
    pub fn missing_glyphs(&self, text: &str) -> Vec<char> {
        let face = self.face();
        let Ok(parsed) = Face::parse(&face.data, face.face_index) else {
            return Vec::new();
        };
        let mut missing: Vec<char> = text
            .chars()
            .filter(|ch| !ch.is_whitespace() && parsed.glyph_index(*ch).is_none())
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }

    pub fn at_size(&self, size: u32) -> SizedFont<'_> {
        SizedFont { font: self, size }
    }
}

impl SizedFont<'_> {
    pub fn measure_width_px(&self, text: &str) -> f32 {
        let font_size = self.size as f32;
        let face = self.font.face();
        let Ok(parsed) = Face::parse(&face.data, face.face_index) else {
            return estimate_text_width_units(text) * font_size;
        };
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == ' ' {
                advance = advance.saturating_add(face.space_advance as u32);
                continue;
            }
            let glyph_advance = parsed
                .glyph_index(ch)
                .and_then(|glyph| parsed.glyph_hor_advance(glyph))
                .unwrap_or(face.space_advance);
            advance = advance.saturating_add(glyph_advance as u32);
        }
        let units = face.units_per_em.max(1) as f32;
        advance as f32 * (font_size / units)
    }
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0xAC00..=0xD7A3 | 0x1100..=0x11FF | 0x3130..=0x318F | 0x4E00..=0x9FFF | 0x3040..=0x30FF
    ) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units).sum()
}

fn resolve_system_face(db: &fontdb::Database) -> Result<FontFace> {
    let mut families: Vec<fontdb::Family<'_>> = FALLBACK_FAMILIES
        .iter()
        .map(|name| fontdb::Family::Name(name))
        .collect();
    families.push(fontdb::Family::SansSerif);

    for family in &families {
        let query = fontdb::Query {
            families: std::slice::from_ref(family),
            ..Default::default()
        };
        if let Some(id) = db.query(&query)
            && let Some(face) = face_from_db(db, id)
        {
            return Ok(face);
        }
    }

    db.faces()
        .find_map(|info| face_from_db(db, info.id))
        .ok_or_else(|| anyhow!("no usable system font found"))
}

fn face_from_db(db: &fontdb::Database, id: fontdb::ID) -> Option<FontFace> {
    db.with_face_data(id, |data, index| parse_face_at(Arc::new(data.to_vec()), index))
        .flatten()
}

fn parse_font_face(data: Vec<u8>) -> Result<FontFace> {
    let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
    let data = Arc::new(data);
    (0..count)
        .find_map(|index| parse_face_at(Arc::clone(&data), index))
        .ok_or_else(|| anyhow!("no parsable face in font data"))
}

fn parse_face_at(data: Arc<Vec<u8>>, index: u32) -> Option<FontFace> {
    let face = Face::parse(&data, index).ok()?;
    let units_per_em = face.units_per_em().max(1);
    let space_advance = face
        .glyph_index(' ')
        .and_then(|id| face.glyph_hor_advance(id))
        .unwrap_or(units_per_em / 2);
    let family = extract_family_name(&face);
    drop(face);
    Some(FontFace {
        data,
        units_per_em,
        space_advance,
        family,
        face_index: index,
    })
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
