use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::{
    error::{StudioError, StudioResult},
    fs::{FileSystem, is_not_found},
    models::{
        BatchOutcome, MANIFEST_FILE, Manifest, RenderDefaults, SceneDescriptor, ScenePush,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Added,
    Updated,
}

/// Ordered scene list plus render settings, persisted as `manifest.json`
/// next to the scene sources it indexes.
///
/// The same registry drives the local project tree and the scenes directory
/// inside a sandbox; only the [`FileSystem`] differs.
#[derive(Clone)]
pub struct SceneRegistry {
    fs: Arc<dyn FileSystem>,
    scenes_dir: PathBuf,
    defaults: RenderDefaults,
    /// Baseline file no push may overwrite.
    protected_component: Option<String>,
    write_lock: Arc<Mutex<()>>,
}

impl SceneRegistry {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        scenes_dir: impl Into<PathBuf>,
        defaults: RenderDefaults,
    ) -> Self {
        Self {
            fs,
            scenes_dir: scenes_dir.into(),
            defaults,
            protected_component: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_protected_component(mut self, component: Option<String>) -> Self {
        self.protected_component = component;
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.scenes_dir.join(MANIFEST_FILE)
    }

    pub fn scene_path(&self, component: &str) -> PathBuf {
        self.scenes_dir.join(component)
    }

    /// Absence or corruption of the persisted manifest yields the defaults.
    pub async fn load_manifest(&self) -> Manifest {
        let path = self.manifest_path();
        let raw = match self.fs.read(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "manifest not readable, using defaults");
                return Manifest::with_defaults(&self.defaults);
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "manifest is not valid json, using defaults");
                Manifest::with_defaults(&self.defaults)
            }
        }
    }

    /// Loader for read-modify-write paths. Only a missing manifest yields the
    /// defaults; any other failure aborts before anything is written.
    async fn load_manifest_for_update(&self) -> StudioResult<Manifest> {
        let path = self.manifest_path();
        let raw = match self.fs.read(&path).await {
            Ok(raw) => raw,
            Err(err) if is_not_found(&err) => {
                return Ok(Manifest::with_defaults(&self.defaults));
            }
            Err(err) => {
                return Err(StudioError::persistence(
                    "failed to read manifest",
                    format!("{err:#}"),
                ));
            }
        };
        serde_json::from_slice(&raw)
            .map_err(|err| StudioError::persistence("manifest is not valid json", err))
    }

    pub async fn save_manifest(&self, manifest: &Manifest) -> StudioResult<()> {
        let body = serde_json::to_vec_pretty(manifest)
            .map_err(|err| StudioError::persistence("failed to encode manifest", err))?;
        let path = self.manifest_path();
        self.fs
            .write(&path, &body)
            .await
            .map_err(|err| StudioError::persistence("failed to write manifest", err))
    }

    /// Writes the scene source, then upserts its descriptor by id.
    ///
    /// The file goes first: a failure between the two writes leaves an
    /// orphaned source file instead of a manifest entry with no file.
    pub async fn push_scene(&self, push: ScenePush) -> StudioResult<PushOutcome> {
        let descriptor = descriptor_for(&push)?;
        if self.protected_component.as_deref() == Some(descriptor.component.as_str()) {
            return Err(StudioError::Validation(format!(
                "component file name {} is reserved",
                descriptor.component
            )));
        }
        let theme = match push.theme.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(theme) => Some(theme.to_string()),
        };

        let _guard = self.write_lock.lock().await;
        let mut manifest = self.load_manifest_for_update().await?;
        let scene_path = self.scene_path(&descriptor.component);
        self.fs
            .write(&scene_path, push.content.as_bytes())
            .await
            .map_err(|err| StudioError::persistence("failed to write scene file", err))?;

        if let Some(theme) = theme {
            manifest.theme = theme;
        }
        let scene_id = descriptor.id.clone();
        let outcome = if manifest.upsert(descriptor) {
            PushOutcome::Updated
        } else {
            PushOutcome::Added
        };
        self.save_manifest(&manifest).await?;

        tracing::info!(scene_id = %scene_id, outcome = ?outcome, theme = %manifest.theme, "scene pushed");
        Ok(outcome)
    }

    /// Best effort: every entry is attempted, failures are only counted.
    pub async fn push_batch(&self, pushes: Vec<ScenePush>) -> BatchOutcome {
        let total = pushes.len();
        let mut success_count = 0;
        for push in pushes {
            let scene_id = push.id.clone();
            match self.push_scene(push).await {
                Ok(_) => success_count += 1,
                Err(err) => {
                    tracing::warn!(scene_id = %scene_id, error = %err, "batch entry rejected");
                }
            }
        }
        tracing::info!(success_count, total, "batch push finished");
        BatchOutcome {
            success_count,
            total,
        }
    }

    pub async fn remove_scene(&self, id: &str) -> StudioResult<SceneDescriptor> {
        let _guard = self.write_lock.lock().await;
        let mut manifest = self.load_manifest_for_update().await?;
        let index = manifest
            .position(id)
            .ok_or_else(|| StudioError::NotFound(format!("scene {id}")))?;
        let removed = manifest.scenes.remove(index);

        match validate_component(&removed.component) {
            Ok(()) => {
                let path = self.scene_path(&removed.component);
                self.fs
                    .remove(&path)
                    .await
                    .map_err(|err| StudioError::persistence("failed to delete scene file", err))?;
            }
            Err(err) => {
                tracing::warn!(scene_id = %id, component = %removed.component, error = %err, "not deleting file outside scenes dir");
            }
        }

        self.save_manifest(&manifest).await?;
        tracing::info!(scene_id = %id, "scene removed");
        Ok(removed)
    }

    pub async fn set_theme(&self, theme: &str) -> StudioResult<()> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(StudioError::Validation("theme is empty".to_string()));
        }
        let _guard = self.write_lock.lock().await;
        let mut manifest = self.load_manifest_for_update().await?;
        manifest.theme = theme.to_string();
        self.save_manifest(&manifest).await?;
        tracing::info!(theme, "theme set");
        Ok(())
    }

    pub async fn get_theme(&self) -> String {
        self.load_manifest().await.theme
    }

    pub async fn list_scenes(&self) -> Vec<SceneDescriptor> {
        self.load_manifest().await.scenes
    }

    /// Persists a default manifest. Scene files are left alone.
    pub async fn reset(&self) -> StudioResult<()> {
        let _guard = self.write_lock.lock().await;
        self.save_manifest(&Manifest::with_defaults(&self.defaults))
            .await
    }
}

fn descriptor_for(push: &ScenePush) -> StudioResult<SceneDescriptor> {
    let id = push.id.trim();
    if id.is_empty() {
        return Err(StudioError::Validation("scene id is empty".to_string()));
    }
    if push.name.trim().is_empty() {
        return Err(StudioError::Validation(format!("scene {id} has no name")));
    }
    if push.duration <= 0 {
        return Err(StudioError::Validation(format!(
            "scene {id} duration must be a positive frame count, got {}",
            push.duration
        )));
    }
    let duration_in_frames = u32::try_from(push.duration).map_err(|_| {
        StudioError::Validation(format!("scene {id} duration {} is too large", push.duration))
    })?;

    let component = match push.filename.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{id}.tsx"),
    };
    validate_component(&component)?;

    Ok(SceneDescriptor {
        id: id.to_string(),
        name: push.name.trim().to_string(),
        duration_in_frames,
        component,
        props: push.props.clone(),
    })
}

/// Component names must be plain file names inside the scenes directory.
pub fn validate_component(component: &str) -> StudioResult<()> {
    let invalid = |reason: &str| {
        Err(StudioError::Validation(format!(
            "invalid component file name {component:?}: {reason}"
        )))
    };
    if component.is_empty() {
        return invalid("empty");
    }
    if component.contains(['/', '\\']) || Path::new(component).is_absolute() {
        return invalid("must not contain path separators");
    }
    if component == "." || component == ".." {
        return invalid("parent or current directory reference");
    }
    if component.contains('\0') {
        return invalid("contains a NUL byte");
    }
    if component.eq_ignore_ascii_case(MANIFEST_FILE) {
        return invalid("reserved for the manifest");
    }
    Ok(())
}
