use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const MANIFEST_VERSION: &str = "1.0.0";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const DEFAULT_THEME: &str = "tech";

/// Theme presets understood by the render toolchain.
pub const KNOWN_THEMES: &[&str] = &[
    "tech",
    "cyberpunk",
    "elegant",
    "warm",
    "nature",
    "minimal",
    "ocean",
    "sunset",
];

/// Global render parameters a fresh manifest starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderDefaults {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub theme: String,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 1920,
            height: 1080,
            theme: DEFAULT_THEME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDescriptor {
    pub id: String,
    pub name: String,
    pub duration_in_frames: u32,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub version: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub theme: String,
    pub scenes: Vec<SceneDescriptor>,
    /// Keys written by other tools are carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn with_defaults(defaults: &RenderDefaults) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            fps: defaults.fps,
            width: defaults.width,
            height: defaults.height,
            theme: defaults.theme.clone(),
            scenes: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.scenes.iter().position(|scene| scene.id == id)
    }

    /// Replaces the descriptor with the same id in place, or appends it.
    /// Returns `true` when an existing entry was replaced.
    pub fn upsert(&mut self, descriptor: SceneDescriptor) -> bool {
        match self.position(&descriptor.id) {
            Some(index) => {
                self.scenes[index] = descriptor;
                true
            }
            None => {
                self.scenes.push(descriptor);
                false
            }
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.scenes
            .iter()
            .map(|scene| u64::from(scene.duration_in_frames))
            .sum()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::with_defaults(&RenderDefaults::default())
    }
}

/// One scene upload: the descriptor fields plus the source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenePush {
    #[serde(alias = "scene_id")]
    pub id: String,
    #[serde(alias = "scene_name")]
    pub name: String,
    pub duration: i64,
    #[serde(alias = "code_content")]
    pub content: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub props: Option<Map<String, Value>>,
    #[serde(default)]
    pub theme: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchPushRequest {
    /// Entries are decoded one by one so a malformed entry only fails itself.
    pub scenes: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetThemeRequest {
    pub theme: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRequest {
    #[serde(default, alias = "code_content")]
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResponse {
    pub success: bool,
    pub message: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub message: String,
    pub success_count: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenesResponse {
    pub success: bool,
    pub scenes: Vec<SceneDescriptor>,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestResponse {
    pub success: bool,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThemeResponse {
    pub success: bool,
    pub theme: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThemesResponse {
    pub success: bool,
    pub themes: Vec<&'static str>,
    pub default: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub scenes: Vec<ScenePush>,
    #[serde(default)]
    pub theme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderEvent {
    pub ts_ms: i64,
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
    pub scenes_pushed: BatchOutcome,
    pub sandbox_id: String,
    pub artifact_path: Option<String>,
    pub artifact_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRecord {
    pub id: Uuid,
    pub status: RenderStatus,
    pub scene_count: usize,
    pub theme: Option<String>,
    pub output: Option<RenderOutput>,
    pub error: Option<String>,
    #[serde(default)]
    pub events: Vec<RenderEvent>,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRenderResponse {
    pub id: Uuid,
    pub status: RenderStatus,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Manifest, SceneDescriptor};

    fn scene(id: &str, frames: u32) -> SceneDescriptor {
        SceneDescriptor {
            id: id.to_string(),
            name: id.to_uppercase(),
            duration_in_frames: frames,
            component: format!("{id}.tsx"),
            props: None,
        }
    }

    #[test]
    fn upsert_replaces_in_place_and_appends_new_ids() {
        let mut manifest = Manifest::default();
        assert!(!manifest.upsert(scene("a", 30)));
        assert!(!manifest.upsert(scene("b", 60)));
        assert!(manifest.upsert(scene("a", 90)));

        let ids: Vec<_> = manifest.scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(manifest.scenes[0].duration_in_frames, 90);
        assert_eq!(manifest.total_frames(), 150);
    }

    #[test]
    fn serializes_with_camel_case_frames_and_omits_missing_props() {
        let value = serde_json::to_value(scene("intro", 90)).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "intro",
                "name": "INTRO",
                "durationInFrames": 90,
                "component": "intro.tsx"
            })
        );
    }

    #[test]
    fn preserves_unknown_manifest_keys() {
        let raw = json!({
            "version": "1.0.0",
            "fps": 24,
            "width": 1280,
            "height": 720,
            "theme": "ocean",
            "scenes": [],
            "audioTrack": "bgm.mp3"
        });
        let manifest: Manifest = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(manifest.fps, 24);
        assert_eq!(serde_json::to_value(&manifest).unwrap(), raw);
    }

    #[test]
    fn default_manifest_matches_documented_values() {
        let manifest = Manifest::default();
        assert_eq!(manifest.version, "1.0.0");
        assert_eq!((manifest.fps, manifest.width, manifest.height), (30, 1920, 1080));
        assert_eq!(manifest.theme, "tech");
        assert!(manifest.scenes.is_empty());
    }
}
