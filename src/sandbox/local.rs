use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    fs::{FileSystem, LocalFs},
    sandbox::{CommandSpec, ProcessExit, RemoteProcess, Sandbox, SandboxProvider},
};

/// Sandboxes backed by private directories on the local machine, each seeded
/// from `{templates_root}/{template}` when that directory exists.
pub struct LocalSandboxProvider {
    root: PathBuf,
    templates_root: Option<PathBuf>,
}

impl LocalSandboxProvider {
    pub fn new(root: PathBuf, templates_root: Option<PathBuf>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create sandbox root {}", root.display()))?;
        Ok(Self {
            root,
            templates_root,
        })
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create(&self, template: &str) -> anyhow::Result<Arc<dyn Sandbox>> {
        let id = format!("sbx-{}", Uuid::new_v4().as_simple());
        let dir = self.root.join(&id);

        let source = self
            .templates_root
            .as_ref()
            .map(|root| root.join(template))
            .filter(|path| path.is_dir());
        match source {
            Some(source) => {
                let target = dir.clone();
                tokio::task::spawn_blocking(move || copy_tree(&source, &target))
                    .await
                    .context("template copy task panicked")??;
            }
            None => {
                tokio::fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("failed to create sandbox dir {}", dir.display()))?;
            }
        }

        tracing::debug!(sandbox_id = %id, template, dir = %dir.display(), "local sandbox created");
        Ok(Arc::new(LocalSandbox {
            id,
            fs: Arc::new(LocalFs::new(dir)),
        }))
    }
}

pub struct LocalSandbox {
    id: String,
    fs: Arc<LocalFs>,
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn filesystem(&self) -> Arc<dyn FileSystem> {
        self.fs.clone()
    }

    async fn start(&self, spec: CommandSpec) -> anyhow::Result<Box<dyn RemoteProcess>> {
        let cwd = self.fs.resolve(&spec.cwd)?;
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {} in sandbox {}", spec.command, self.id))?;
        let stdout = child.stdout.take().context("missing stdout pipe")?;
        let stderr = child.stderr.take().context("missing stderr pipe")?;
        let limit = spec.max_output_bytes;

        Ok(Box::new(LocalProcess {
            child,
            stdout_task: Some(tokio::spawn(async move { read_limited(stdout, limit).await })),
            stderr_task: Some(tokio::spawn(async move { read_limited(stderr, limit).await })),
            started: Instant::now(),
        }))
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_dir_all(self.fs.root()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove sandbox dir {}", self.fs.root().display())),
        }
    }
}

struct LocalProcess {
    child: Child,
    stdout_task: Option<JoinHandle<Vec<u8>>>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    started: Instant,
}

#[async_trait]
impl RemoteProcess for LocalProcess {
    async fn wait(&mut self, timeout: Duration) -> anyhow::Result<ProcessExit> {
        let (exit_code, timed_out) = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
            Ok(Err(err)) => return Err(err).context("sandbox process wait failed"),
            Err(_) => {
                let _ = self.child.kill().await;
                (-1, true)
            }
        };

        let stdout = match self.stdout_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(ProcessExit {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code,
            duration_ms: self.started.elapsed().as_millis(),
            timed_out,
        })
    }
}

fn copy_tree(source: &Path, target: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(target)
        .with_context(|| format!("failed to create {}", target.display()))?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

async fn read_limited<R>(mut reader: R, limit: usize) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < limit {
                    let remaining = limit - out.len();
                    out.extend_from_slice(&chunk[..remaining.min(n)]);
                }
            }
            Err(_) => break,
        }
    }
    out
}
