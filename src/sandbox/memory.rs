//! In-memory sandboxes with switchable faults, for exercising the pool and
//! the render worker without touching disk or spawning processes.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::bail;
use async_trait::async_trait;

use crate::{
    fs::FileSystem,
    models::MANIFEST_FILE,
    sandbox::{CommandSpec, ProcessExit, RemoteProcess, Sandbox, SandboxProvider},
};

pub const FAKE_ARTIFACT: &[u8] = b"FAKE-MP4";

#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    /// Manifest writes are accepted but dropped.
    pub freeze_manifest: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl MemoryFs {
    pub fn insert(&self, path: &str, content: &[u8]) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(PathBuf::from(path), content.to_vec());
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(Path::new(path)))
            .unwrap_or(false)
    }

    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .map(|files| files.keys().map(|p| p.display().to_string()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn write(&self, path: &Path, content: &[u8]) -> anyhow::Result<()> {
        let is_manifest = path.file_name().is_some_and(|name| name == MANIFEST_FILE);
        if is_manifest && self.freeze_manifest.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut files = self.files.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        files.insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    async fn read(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("injected read failure");
        }
        let files = self.files.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        files.get(path).cloned().ok_or_else(|| {
            anyhow::Error::new(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file {}", path.display()),
            ))
        })
    }

    async fn list(&self, dir: &Path) -> anyhow::Result<Vec<String>> {
        let files = self.files.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        Ok(files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .filter_map(|path| path.file_name()?.to_str().map(ToString::to_string))
            .collect())
    }

    async fn remove(&self, path: &Path) -> anyhow::Result<()> {
        let mut files = self.files.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        files.remove(path);
        Ok(())
    }
}

pub struct MemorySandbox {
    id: String,
    pub fs: Arc<MemoryFs>,
    pub destroyed: AtomicBool,
    pub artifact_path: PathBuf,
    pub exit_code: i32,
    pub commands: Mutex<Vec<String>>,
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn filesystem(&self) -> Arc<dyn FileSystem> {
        self.fs.clone()
    }

    async fn start(&self, spec: CommandSpec) -> anyhow::Result<Box<dyn RemoteProcess>> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(format!("{} {}", spec.command, spec.args.join(" ")));
        }
        Ok(Box::new(MemoryProcess {
            fs: self.fs.clone(),
            artifact_path: self.artifact_path.clone(),
            exit_code: self.exit_code,
        }))
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Pretends to render: writes a fixed artifact when it exits successfully.
struct MemoryProcess {
    fs: Arc<MemoryFs>,
    artifact_path: PathBuf,
    exit_code: i32,
}

#[async_trait]
impl RemoteProcess for MemoryProcess {
    async fn wait(&mut self, _timeout: Duration) -> anyhow::Result<ProcessExit> {
        if self.exit_code == 0 {
            self.fs.write(&self.artifact_path, FAKE_ARTIFACT).await?;
        }
        Ok(ProcessExit {
            stdout: "rendered".to_string(),
            stderr: String::new(),
            exit_code: self.exit_code,
            duration_ms: 1,
            timed_out: false,
        })
    }
}

#[derive(Default)]
pub struct MemoryProvider {
    next_id: AtomicUsize,
    pub fail_create: AtomicBool,
    pub exit_code: AtomicI32,
    /// Files every new sandbox starts with, like a template.
    seed: Mutex<Vec<(String, Vec<u8>)>>,
    created: Mutex<Vec<Arc<MemorySandbox>>>,
}

impl MemoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, path: &str, content: &[u8]) {
        if let Ok(mut seed) = self.seed.lock() {
            seed.push((path.to_string(), content.to_vec()));
        }
    }

    pub fn created(&self) -> Vec<Arc<MemorySandbox>> {
        self.created
            .lock()
            .map(|created| created.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<MemorySandbox>> {
        self.created().into_iter().find(|sandbox| sandbox.id == id)
    }

    pub fn destroyed_count(&self) -> usize {
        self.created()
            .iter()
            .filter(|sandbox| sandbox.destroyed.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl SandboxProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, _template: &str) -> anyhow::Result<Arc<dyn Sandbox>> {
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("provider quota exhausted");
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let fs = Arc::new(MemoryFs::default());
        if let Ok(seed) = self.seed.lock() {
            for (path, content) in seed.iter() {
                fs.insert(path, content);
            }
        }
        let sandbox = Arc::new(MemorySandbox {
            id: format!("mem-{n}"),
            fs,
            destroyed: AtomicBool::new(false),
            artifact_path: PathBuf::from("output/video.mp4"),
            exit_code: self.exit_code.load(Ordering::SeqCst),
            commands: Mutex::new(Vec::new()),
        });
        if let Ok(mut created) = self.created.lock() {
            created.push(sandbox.clone());
        }
        Ok(sandbox)
    }
}
