use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    config::{StudioConfig, VerifyPolicy},
    error::{StudioError, StudioResult},
    fs::{FileSystem, is_not_found},
    metrics::MetricsRegistry,
    models::{MANIFEST_FILE, Manifest, RenderDefaults},
    registry::SceneRegistry,
    sandbox::{Sandbox, SandboxProvider},
};

/// Where user state lives inside every sandbox, relative to its root.
#[derive(Debug, Clone)]
pub struct SandboxLayout {
    pub app_dir: PathBuf,
    pub scenes_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Scene file shipped with the template. Scrubbing restores it to the
    /// content it had when the sandbox was created.
    pub protected_scene: Option<String>,
}

impl SandboxLayout {
    pub fn from_config(config: &StudioConfig) -> Self {
        Self {
            app_dir: PathBuf::from("."),
            scenes_dir: config.scenes_dir.clone(),
            output_dir: config.output_dir.clone(),
            protected_scene: config.pool.protected_scene.clone(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.scenes_dir.join(MANIFEST_FILE)
    }
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub template: String,
    pub capacity: usize,
    pub verify_policy: VerifyPolicy,
    pub defaults: RenderDefaults,
    pub layout: SandboxLayout,
}

impl PoolOptions {
    pub fn from_config(config: &StudioConfig) -> Self {
        Self {
            template: config.sandbox.template.clone(),
            capacity: config.pool.capacity,
            verify_policy: config.pool.verify_policy,
            defaults: config.defaults.clone(),
            layout: SandboxLayout::from_config(config),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrubReport {
    pub scenes_removed: usize,
    pub artifacts_removed: usize,
    pub manifest_reset: bool,
    /// False when the protected baseline could not be put back.
    pub baseline_intact: bool,
    pub failures: Vec<String>,
}

impl ScrubReport {
    /// A sandbox whose manifest could not be reset, or whose baseline scene
    /// may still hold another session's content, must not be reused.
    pub fn is_recyclable(&self) -> bool {
        self.manifest_reset && self.baseline_intact
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    UnknownSession,
    Pooled,
    Destroyed(DestroyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    ScrubFailed,
    VerificationFailed,
    PoolFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub checked_out: usize,
    pub capacity: usize,
}

#[derive(Default)]
struct PoolState {
    /// Most recently returned sandbox is at the end.
    idle: Vec<Arc<dyn Sandbox>>,
    checked_out: HashMap<String, Arc<dyn Sandbox>>,
    /// Sessions whose acquire is in flight.
    reserved: HashSet<String>,
    /// Protected scene content per sandbox id, captured at creation.
    baselines: HashMap<String, Vec<u8>>,
}

/// Reuses sandboxes across sessions. A sandbox only re-enters the idle set
/// after it has been scrubbed and verified clean.
///
/// The state lock covers collection updates only; provisioning, scrubbing
/// and teardown run without it so slow remote calls of one session never
/// stall another.
pub struct SandboxPool {
    provider: Arc<dyn SandboxProvider>,
    options: PoolOptions,
    metrics: Arc<MetricsRegistry>,
    state: Mutex<PoolState>,
}

impl SandboxPool {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        options: PoolOptions,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            provider,
            options,
            metrics,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.options.layout
    }

    pub fn defaults(&self) -> &RenderDefaults {
        &self.options.defaults
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            idle: state.idle.len(),
            checked_out: state.checked_out.len(),
            capacity: self.options.capacity,
        }
    }

    pub async fn acquire(&self, session: &str) -> StudioResult<Arc<dyn Sandbox>> {
        {
            let mut state = self.state.lock().await;
            if state.checked_out.contains_key(session) || !state.reserved.insert(session.to_string())
            {
                return Err(StudioError::Validation(format!(
                    "session {session} already holds a sandbox"
                )));
            }
        }

        let obtained = self.obtain(session).await;

        let mut state = self.state.lock().await;
        state.reserved.remove(session);
        let sandbox = obtained?;
        state
            .checked_out
            .insert(session.to_string(), sandbox.clone());
        Ok(sandbox)
    }

    /// Scoped acquisition: the sandbox goes back to the pool when the lease
    /// is released or dropped.
    pub async fn lease(self: &Arc<Self>, session: &str) -> StudioResult<SandboxLease> {
        let sandbox = self.acquire(session).await?;
        Ok(SandboxLease {
            pool: self.clone(),
            session: session.to_string(),
            sandbox,
            released: false,
        })
    }

    async fn obtain(&self, session: &str) -> StudioResult<Arc<dyn Sandbox>> {
        loop {
            let candidate = self.state.lock().await.idle.pop();
            let Some(sandbox) = candidate else {
                break;
            };

            // Re-check: the sandbox may have been touched since it was pooled.
            let report = self.scrub(sandbox.as_ref()).await;
            if report.is_recyclable() && self.verify(sandbox.as_ref()).await {
                tracing::info!(sandbox_id = sandbox.id(), session, "reusing pooled sandbox");
                self.metrics.sandbox_reused();
                return Ok(sandbox);
            }
            tracing::warn!(sandbox_id = sandbox.id(), "pooled sandbox failed re-check, discarding");
            self.teardown(sandbox.as_ref()).await;
        }

        let sandbox = self
            .provider
            .create(&self.options.template)
            .await
            .map_err(|err| StudioError::Provision(err.to_string()))?;
        tracing::info!(
            sandbox_id = sandbox.id(),
            session,
            provider = self.provider.name(),
            template = %self.options.template,
            "created sandbox"
        );
        self.metrics.sandbox_created();
        self.capture_baseline(sandbox.as_ref()).await;
        Ok(sandbox)
    }

    async fn capture_baseline(&self, sandbox: &dyn Sandbox) {
        let Some(protected) = self.options.layout.protected_scene.as_deref() else {
            return;
        };
        let path = self.options.layout.scenes_dir.join(protected);
        match sandbox.filesystem().read(&path).await {
            Ok(content) => {
                self.state
                    .lock()
                    .await
                    .baselines
                    .insert(sandbox.id().to_string(), content);
            }
            Err(err) if is_not_found(&err) => {}
            Err(err) => {
                // Without a snapshot the file is scrubbed like any other.
                tracing::warn!(sandbox_id = sandbox.id(), error = %err, "could not snapshot protected scene");
            }
        }
    }

    /// Ends the session's ownership of its sandbox: it is either pooled or
    /// destroyed. Unknown sessions are ignored.
    pub async fn release(&self, session: &str) -> ReleaseOutcome {
        let sandbox = self.state.lock().await.checked_out.remove(session);
        let Some(sandbox) = sandbox else {
            tracing::debug!(session, "release for unknown session ignored");
            return ReleaseOutcome::UnknownSession;
        };

        let report = self.scrub(sandbox.as_ref()).await;
        let verdict = if !report.is_recyclable() {
            Err(DestroyReason::ScrubFailed)
        } else if !self.verify(sandbox.as_ref()).await {
            self.metrics.verification_failed();
            Err(DestroyReason::VerificationFailed)
        } else {
            let mut state = self.state.lock().await;
            if state.idle.len() < self.options.capacity {
                state.idle.push(sandbox.clone());
                Ok(())
            } else {
                Err(DestroyReason::PoolFull)
            }
        };

        match verdict {
            Ok(()) => {
                tracing::info!(sandbox_id = sandbox.id(), session, "sandbox returned to pool");
                self.metrics.sandbox_pooled();
                ReleaseOutcome::Pooled
            }
            Err(reason) => {
                tracing::info!(sandbox_id = sandbox.id(), session, reason = ?reason, "destroying sandbox");
                self.teardown(sandbox.as_ref()).await;
                ReleaseOutcome::Destroyed(reason)
            }
        }
    }

    /// Removes every trace of user state: every file in the scenes directory
    /// except the manifest and the protected baseline, the manifest contents
    /// and everything in the output directory. The baseline is rewritten from
    /// its snapshot.
    /// Each step runs even when an earlier one failed.
    pub async fn scrub(&self, sandbox: &dyn Sandbox) -> ScrubReport {
        let layout = &self.options.layout;
        let fs = sandbox.filesystem();
        let mut report = ScrubReport {
            baseline_intact: true,
            ..ScrubReport::default()
        };

        let baseline = self.state.lock().await.baselines.get(sandbox.id()).cloned();
        let protected = layout
            .protected_scene
            .as_deref()
            .filter(|_| baseline.is_some());
        report.scenes_removed = remove_matching(
            fs.as_ref(),
            &layout.scenes_dir,
            |name| name != MANIFEST_FILE && Some(name) != protected,
            &mut report.failures,
        )
        .await;

        if let (Some(name), Some(content)) = (protected, baseline) {
            if let Err(err) = fs.write(&layout.scenes_dir.join(name), &content).await {
                report.baseline_intact = false;
                report.failures.push(format!("restore {name}: {err}"));
            }
        }

        let registry = SceneRegistry::new(
            fs.clone(),
            layout.scenes_dir.clone(),
            self.options.defaults.clone(),
        );
        match registry.reset().await {
            Ok(()) => report.manifest_reset = true,
            Err(err) => report.failures.push(format!("manifest reset: {err}")),
        }

        report.artifacts_removed = remove_matching(
            fs.as_ref(),
            &layout.output_dir,
            |_| true,
            &mut report.failures,
        )
        .await;

        if report.failures.is_empty() {
            tracing::debug!(
                sandbox_id = sandbox.id(),
                scenes_removed = report.scenes_removed,
                artifacts_removed = report.artifacts_removed,
                "sandbox scrubbed"
            );
        } else {
            tracing::warn!(
                sandbox_id = sandbox.id(),
                failures = ?report.failures,
                "sandbox scrub incomplete"
            );
        }
        report
    }

    /// A sandbox is clean when its manifest lists no scenes. An unreadable
    /// manifest is judged by the configured [`VerifyPolicy`].
    pub async fn verify(&self, sandbox: &dyn Sandbox) -> bool {
        let path = self.options.layout.manifest_path();
        let parsed = match sandbox.filesystem().read(&path).await {
            Ok(raw) => serde_json::from_slice::<Manifest>(&raw).map_err(anyhow::Error::from),
            Err(err) => Err(err),
        };
        match parsed {
            Ok(manifest) if manifest.scenes.is_empty() => true,
            Ok(manifest) => {
                tracing::warn!(
                    sandbox_id = sandbox.id(),
                    scenes = manifest.scenes.len(),
                    "manifest still lists scenes after scrub"
                );
                false
            }
            Err(err) => {
                let clean = self.options.verify_policy == VerifyPolicy::Lenient;
                tracing::warn!(
                    sandbox_id = sandbox.id(),
                    error = %err,
                    assume_clean = clean,
                    "manifest unreadable during verification"
                );
                clean
            }
        }
    }

    /// Tears down every sandbox, idle or checked out. Meant for shutdown.
    pub async fn destroy_all(&self) {
        let sandboxes: Vec<_> = {
            let mut state = self.state.lock().await;
            let mut all: Vec<_> = state.idle.drain(..).collect();
            all.extend(state.checked_out.drain().map(|(_, sandbox)| sandbox));
            all
        };
        let count = sandboxes.len();
        for sandbox in sandboxes {
            self.teardown(sandbox.as_ref()).await;
        }
        tracing::info!(count, "all sandboxes destroyed");
    }

    async fn teardown(&self, sandbox: &dyn Sandbox) {
        self.state.lock().await.baselines.remove(sandbox.id());
        match sandbox.destroy().await {
            Ok(()) => self.metrics.sandbox_destroyed(),
            Err(err) => {
                tracing::error!(sandbox_id = sandbox.id(), error = %err, "sandbox teardown failed");
            }
        }
    }
}

/// A checked-out sandbox tied to a session. Dropping an unreleased lease
/// schedules the release on the current runtime.
pub struct SandboxLease {
    pool: Arc<SandboxPool>,
    session: String,
    sandbox: Arc<dyn Sandbox>,
    released: bool,
}

impl SandboxLease {
    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub async fn release(mut self) -> ReleaseOutcome {
        self.released = true;
        self.pool.release(&self.session).await
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let pool = self.pool.clone();
        let session = std::mem::take(&mut self.session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.release(&session).await;
                });
            }
            Err(_) => {
                tracing::error!(session = %session, "lease dropped outside a runtime, sandbox stays checked out");
            }
        }
    }
}

async fn remove_matching(
    fs: &dyn FileSystem,
    dir: &Path,
    matches: impl Fn(&str) -> bool,
    failures: &mut Vec<String>,
) -> usize {
    let names = match fs.list(dir).await {
        Ok(names) => names,
        Err(err) => {
            failures.push(format!("list {}: {err}", dir.display()));
            return 0;
        }
    };

    let mut removed = 0;
    for name in names.into_iter().filter(|name| matches(name)) {
        match fs.remove(&dir.join(&name)).await {
            Ok(()) => removed += 1,
            Err(err) => failures.push(format!("remove {name}: {err}")),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        path::{Path, PathBuf},
        sync::{Arc, atomic::Ordering},
    };

    use super::{
        DestroyReason, PoolOptions, ReleaseOutcome, SandboxLayout, SandboxPool, ScrubReport,
    };
    use crate::{
        config::VerifyPolicy,
        error::StudioError,
        fs::FileSystem,
        metrics::MetricsRegistry,
        models::RenderDefaults,
        sandbox::{Sandbox, memory::MemoryProvider},
    };

    fn options(capacity: usize, verify_policy: VerifyPolicy) -> PoolOptions {
        PoolOptions {
            template: "base".to_string(),
            capacity,
            verify_policy,
            defaults: RenderDefaults::default(),
            layout: SandboxLayout {
                app_dir: PathBuf::from("."),
                scenes_dir: PathBuf::from("src/scenes"),
                output_dir: PathBuf::from("output"),
                protected_scene: Some("scene_1_intro.tsx".to_string()),
            },
        }
    }

    fn pool(provider: &Arc<MemoryProvider>, capacity: usize) -> Arc<SandboxPool> {
        Arc::new(SandboxPool::new(
            provider.clone(),
            options(capacity, VerifyPolicy::Strict),
            Arc::new(MetricsRegistry::new()),
        ))
    }

    const BASELINE: &str = "src/scenes/scene_1_intro.tsx";

    fn seeded_provider() -> Arc<MemoryProvider> {
        let provider = MemoryProvider::new();
        provider.seed(BASELINE, b"baseline");
        provider
    }

    fn dirty(provider: &MemoryProvider, id: &str) {
        let sandbox = provider.get(id).unwrap();
        sandbox.fs.insert("src/scenes/user-1-scene.tsx", b"code");
        sandbox.fs.insert("src/scenes/notes.md", b"private notes");
        sandbox.fs.insert(BASELINE, b"overwritten");
        sandbox.fs.insert(
            "src/scenes/manifest.json",
            br#"{"theme":"cyberpunk","scenes":[{"id":"s","name":"S","durationInFrames":9,"component":"user-1-scene.tsx"}]}"#,
        );
        sandbox.fs.insert("output/video.mp4", b"mp4");
        sandbox.fs.insert("output/render.log", b"log");
    }

    #[tokio::test]
    async fn scrub_removes_user_state_and_is_idempotent() {
        let provider = seeded_provider();
        let pool = pool(&provider, 2);
        let sandbox = pool.acquire("alice").await.unwrap();
        dirty(&provider, sandbox.id());

        let first = pool.scrub(sandbox.as_ref()).await;
        assert_eq!(first.scenes_removed, 2);
        assert_eq!(first.artifacts_removed, 2);
        assert!(first.is_recyclable());

        let mem = provider.get(sandbox.id()).unwrap();
        let after_first = mem.fs.paths();
        let second = pool.scrub(sandbox.as_ref()).await;
        assert_eq!(
            second,
            ScrubReport {
                scenes_removed: 0,
                artifacts_removed: 0,
                manifest_reset: true,
                baseline_intact: true,
                failures: Vec::new(),
            }
        );
        assert_eq!(mem.fs.paths(), after_first);
        assert_eq!(
            mem.fs.read(Path::new(BASELINE)).await.unwrap(),
            b"baseline"
        );
        assert!(!mem.fs.contains("output/render.log"));
        assert!(!mem.fs.contains("src/scenes/user-1-scene.tsx"));
        assert!(!mem.fs.contains("src/scenes/notes.md"));
        assert!(!mem.fs.contains("output/video.mp4"));
        assert!(pool.verify(sandbox.as_ref()).await);
    }

    #[tokio::test]
    async fn next_session_never_sees_previous_session_files() {
        let provider = seeded_provider();
        let pool = pool(&provider, 2);
        let first = pool.acquire("alice").await.unwrap();
        let fs = first.filesystem();
        fs.write(Path::new("src/scenes/secret.md"), b"ALICE SECRET")
            .await
            .unwrap();
        fs.write(Path::new(BASELINE), b"ALICE SECRET").await.unwrap();
        assert_eq!(pool.release("alice").await, ReleaseOutcome::Pooled);

        let second = pool.acquire("bob").await.unwrap();
        assert_eq!(second.id(), first.id());
        let fs = second.filesystem();
        assert!(fs.read(Path::new("src/scenes/secret.md")).await.is_err());
        assert_eq!(fs.read(Path::new(BASELINE)).await.unwrap(), b"baseline");
    }

    #[tokio::test]
    async fn protected_name_without_template_baseline_is_user_data() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 2);
        let sandbox = pool.acquire("alice").await.unwrap();
        let mem = provider.get(sandbox.id()).unwrap();
        mem.fs.insert(BASELINE, b"ALICE SECRET");

        let report = pool.scrub(sandbox.as_ref()).await;
        assert_eq!(report.scenes_removed, 1);
        assert!(!mem.fs.contains(BASELINE));
    }

    #[tokio::test]
    async fn released_sandbox_is_reused_lifo() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 2);

        let a = pool.acquire("a").await.unwrap();
        let b = pool.acquire("b").await.unwrap();
        let (a_id, b_id) = (a.id().to_string(), b.id().to_string());
        assert_eq!(pool.release("a").await, ReleaseOutcome::Pooled);
        assert_eq!(pool.release("b").await, ReleaseOutcome::Pooled);

        let next = pool.acquire("c").await.unwrap();
        assert_eq!(next.id(), b_id);
        let after = pool.acquire("d").await.unwrap();
        assert_eq!(after.id(), a_id);
        assert_eq!(provider.created().len(), 2);
    }

    #[tokio::test]
    async fn capacity_bounds_idle_set() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 2);
        for session in ["s1", "s2", "s3"] {
            pool.acquire(session).await.unwrap();
        }

        assert_eq!(pool.release("s1").await, ReleaseOutcome::Pooled);
        assert_eq!(pool.release("s2").await, ReleaseOutcome::Pooled);
        assert_eq!(
            pool.release("s3").await,
            ReleaseOutcome::Destroyed(DestroyReason::PoolFull)
        );

        let stats = pool.stats().await;
        assert_eq!((stats.idle, stats.checked_out), (2, 0));
        assert_eq!(provider.destroyed_count(), 1);
    }

    #[tokio::test]
    async fn dirty_manifest_after_scrub_is_destroyed_not_reused() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 4);
        let sandbox = pool.acquire("mallory").await.unwrap();
        let id = sandbox.id().to_string();
        dirty(&provider, &id);
        provider
            .get(&id)
            .unwrap()
            .fs
            .freeze_manifest
            .store(true, Ordering::SeqCst);

        assert_eq!(
            pool.release("mallory").await,
            ReleaseOutcome::Destroyed(DestroyReason::VerificationFailed)
        );
        assert!(provider.get(&id).unwrap().destroyed.load(Ordering::SeqCst));

        let next = pool.acquire("bob").await.unwrap();
        assert_ne!(next.id(), id);
    }

    #[tokio::test]
    async fn unreadable_manifest_follows_verify_policy() {
        for (policy, expect_clean) in [(VerifyPolicy::Strict, false), (VerifyPolicy::Lenient, true)] {
            let provider = MemoryProvider::new();
            let pool = SandboxPool::new(
                provider.clone(),
                options(2, policy),
                Arc::new(MetricsRegistry::new()),
            );
            let sandbox = pool.acquire("x").await.unwrap();
            provider
                .get(sandbox.id())
                .unwrap()
                .fs
                .fail_reads
                .store(true, Ordering::SeqCst);

            assert_eq!(pool.verify(sandbox.as_ref()).await, expect_clean);
        }
    }

    #[tokio::test]
    async fn double_release_is_a_no_op() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 2);
        pool.acquire("s").await.unwrap();

        assert_eq!(pool.release("s").await, ReleaseOutcome::Pooled);
        assert_eq!(pool.release("s").await, ReleaseOutcome::UnknownSession);
        assert_eq!(pool.release("never").await, ReleaseOutcome::UnknownSession);
        assert_eq!(pool.stats().await.idle, 1);
    }

    #[tokio::test]
    async fn provisioning_failure_surfaces_and_frees_session() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 2);
        provider.fail_create.store(true, Ordering::SeqCst);

        let Err(err) = pool.acquire("s").await else {
            panic!("acquire should fail while the provider is down");
        };
        assert!(matches!(err, StudioError::Provision(_)));
        assert_eq!(pool.stats().await.checked_out, 0);

        provider.fail_create.store(false, Ordering::SeqCst);
        assert!(pool.acquire("s").await.is_ok());
    }

    #[tokio::test]
    async fn same_session_cannot_hold_two_sandboxes() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 2);
        pool.acquire("s").await.unwrap();

        let Err(err) = pool.acquire("s").await else {
            panic!("second acquire for the same session should fail");
        };
        assert!(matches!(err, StudioError::Validation(_)));
        assert_eq!(provider.created().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_acquires_get_distinct_sandboxes() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 4);
        for session in ["warm-1", "warm-2"] {
            pool.acquire(session).await.unwrap();
        }
        pool.release("warm-1").await;
        pool.release("warm-2").await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                pool.acquire(&format!("user-{i}"))
                    .await
                    .unwrap()
                    .id()
                    .to_string()
            }));
        }
        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }

        assert_eq!(ids.len(), 16);
        assert_eq!(pool.stats().await.checked_out, 16);
        assert_eq!(provider.created().len(), 16);
    }

    #[tokio::test]
    async fn dropped_lease_is_released_in_background() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 2);

        {
            let lease = pool.lease("job-1").await.unwrap();
            assert_eq!(lease.session(), "job-1");
        }
        for _ in 0..50 {
            if pool.stats().await.idle == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let stats = pool.stats().await;
        assert_eq!((stats.idle, stats.checked_out), (1, 0));

        let lease = pool.lease("job-2").await.unwrap();
        assert_eq!(lease.release().await, ReleaseOutcome::Pooled);
    }

    #[tokio::test]
    async fn destroy_all_tears_down_idle_and_checked_out() {
        let provider = MemoryProvider::new();
        let pool = pool(&provider, 2);
        pool.acquire("a").await.unwrap();
        pool.acquire("b").await.unwrap();
        pool.release("a").await;

        pool.destroy_all().await;

        let stats = pool.stats().await;
        assert_eq!((stats.idle, stats.checked_out), (0, 0));
        assert_eq!(provider.destroyed_count(), 2);
        assert_eq!(pool.release("b").await, ReleaseOutcome::UnknownSession);
    }
}
