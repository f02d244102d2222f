use std::fmt;
use thiserror::Error;

use super::SceneRecord;
use crate::overlay::PANEL_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptField {
    Scene,
    Dialogue,
}

impl ScriptField {
    fn prefix(self) -> &'static str {
        match self {
            ScriptField::Scene => "scene:",
            ScriptField::Dialogue => "dialogue:",
        }
    }
}

impl fmt::Display for ScriptField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptField::Scene => f.write_str("Scene"),
            ScriptField::Dialogue => f.write_str("Dialogue"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptParseError {
    #[error("[Panel {panel}] not found in script output")]
    MissingPanel { panel: usize },

    #[error("expected [Panel {expected}] but found [Panel {found}]")]
    UnexpectedPanel { expected: usize, found: usize },

    #[error("[Panel {panel}] has no '{field}:' line")]
    MissingField { panel: usize, field: ScriptField },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    SeekingPanel,
    InPanel,
    InScene,
    InDialogue,
    Done,
}

#[derive(Debug)]
struct PanelDraft {
    panel: usize,
    scene: Option<String>,
    dialogue: Option<String>,
}

impl PanelDraft {
    fn new(panel: usize) -> Self {
        Self {
            panel,
            scene: None,
            dialogue: None,
        }
    }

    fn finish(self) -> Result<SceneRecord, ScriptParseError> {
        let scene = self.scene.ok_or(ScriptParseError::MissingField {
            panel: self.panel,
            field: ScriptField::Scene,
        })?;
        let dialogue = self.dialogue.ok_or(ScriptParseError::MissingField {
            panel: self.panel,
            field: ScriptField::Dialogue,
        })?;
        Ok(SceneRecord { scene, dialogue })
    }
}

struct ScriptParser {
    state: ParseState,
    scenes: Vec<SceneRecord>,
    draft: Option<PanelDraft>,
}

impl ScriptParser {
    fn new() -> Self {
        Self {
            state: ParseState::SeekingPanel,
            scenes: Vec::with_capacity(PANEL_COUNT),
            draft: None,
        }
    }

    fn feed(&mut self, line: &str) -> Result<(), ScriptParseError> {
        if self.state == ParseState::Done {
            return Ok(());
        }
        let line = line.trim();

        if let Some((found, rest)) = panel_marker(line) {
            self.close_panel()?;
            if self.scenes.len() == PANEL_COUNT {
                self.state = ParseState::Done;
                return Ok(());
            }
            let expected = self.scenes.len() + 1;
            if found != expected {
                return Err(ScriptParseError::UnexpectedPanel { expected, found });
            }
            self.draft = Some(PanelDraft::new(found));
            self.state = ParseState::InPanel;
            return if rest.is_empty() {
                Ok(())
            } else {
                self.feed(rest)
            };
        }

        let Some(draft) = self.draft.as_mut() else {
            return Ok(());
        };
        if line.is_empty() {
            self.state = ParseState::InPanel;
            return Ok(());
        }
        if let Some(value) = field_value(line, ScriptField::Scene) {
            draft.scene = Some(value);
            self.state = ParseState::InScene;
        } else if let Some(value) = field_value(line, ScriptField::Dialogue) {
            draft.dialogue = Some(value);
            self.state = ParseState::InDialogue;
        } else {
            match self.state {
                ParseState::InScene => append_continuation(&mut draft.scene, line),
                ParseState::InDialogue => append_continuation(&mut draft.dialogue, line),
                _ => {}
            }
        }
        Ok(())
    }

    fn close_panel(&mut self) -> Result<(), ScriptParseError> {
        if let Some(draft) = self.draft.take() {
            self.scenes.push(draft.finish()?);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<SceneRecord>, ScriptParseError> {
        self.close_panel()?;
        if self.scenes.len() < PANEL_COUNT {
            return Err(ScriptParseError::MissingPanel {
                panel: self.scenes.len() + 1,
            });
        }
        Ok(self.scenes)
    }
}

/// Parses the `[Panel N]` / `Scene:` / `Dialogue:` format into four records.
///
/// Markers may carry markdown decoration (`**[Panel 1]**`, `**Scene:**`).
/// Non-blank lines right after a field continue it; a blank line ends the
/// field. Anything before `[Panel 1]` or from a fifth marker on is ignored.
pub fn parse_script(text: &str) -> Result<Vec<SceneRecord>, ScriptParseError> {
    let mut parser = ScriptParser::new();
    for line in text.lines() {
        parser.feed(line)?;
    }
    parser.finish()
}

/// Finds `[Panel N]` anywhere in the line; returns N and the text after it.
fn panel_marker(line: &str) -> Option<(usize, &str)> {
    let lower = line.to_ascii_lowercase();
    let start = lower.find("[panel")?;
    let after = &line[start + "[panel".len()..];
    let digits_start = after.len() - after.trim_start().len();
    let tail = &after[digits_start..];
    let digits_len = tail.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 || !tail[digits_len..].starts_with(']') {
        return None;
    }
    let number = tail[..digits_len].parse().ok()?;
    let rest = tail[digits_len + 1..].trim_matches(|ch: char| ch == '*' || ch.is_whitespace());
    Some((number, rest))
}

fn field_value(line: &str, field: ScriptField) -> Option<String> {
    let stripped = line.trim_start_matches(|ch: char| ch == '*' || ch == '-' || ch.is_whitespace());
    let prefix = field.prefix();
    let head = stripped.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let value = stripped[prefix.len()..].trim_matches(|ch: char| ch == '*' || ch.is_whitespace());
    Some(value.to_string())
}

fn append_continuation(target: &mut Option<String>, line: &str) {
    let value = target.get_or_insert_with(String::new);
    if !value.is_empty() {
        value.push(' ');
    }
    value.push_str(line);
}
