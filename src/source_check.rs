use serde::Serialize;

/// Result of a quick textual sanity check of a scene component.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SourceCheck {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SourceCheck {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Catches the usual mistakes in generated scenes before a render is spent
/// on them. This is not a parser; the render toolchain has the final word.
pub fn check_scene_source(content: &str) -> SourceCheck {
    let mut check = SourceCheck::default();

    if content.trim().is_empty() {
        check.errors.push("scene source is empty".to_string());
        return check;
    }
    if !content.contains("import React") && !content.contains("import * as React") {
        check.errors.push("missing React import".to_string());
    }
    if !content.contains("from \"remotion\"") && !content.contains("from 'remotion'") {
        check
            .warnings
            .push("no import from remotion (e.g. AbsoluteFill)".to_string());
    }
    if !content.contains("export default") && !content.contains("export const") {
        check.errors.push("missing component export".to_string());
    }
    if !content.contains("function") && !content.contains("=>") {
        check.errors.push("no component definition found".to_string());
    }
    if !content.contains("return") && !content.contains("=> (") {
        check
            .warnings
            .push("component may be missing a return statement".to_string());
    }
    check
}
