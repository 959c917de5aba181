mod local;
#[cfg(test)]
pub(crate) mod memory;

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{config::StudioConfig, fs::FileSystem};

pub use local::LocalSandboxProvider;

/// Command to run inside a sandbox.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Working directory relative to the sandbox root.
    pub cwd: PathBuf,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u128,
    pub timed_out: bool,
}

#[async_trait]
pub trait RemoteProcess: Send {
    /// Blocks until the process exits or `timeout` elapses; a process that
    /// overruns is killed and reported with `timed_out`.
    async fn wait(&mut self, timeout: Duration) -> anyhow::Result<ProcessExit>;
}

/// One isolated execution context handed out by a [`SandboxProvider`].
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;
    fn filesystem(&self) -> Arc<dyn FileSystem>;
    async fn start(&self, spec: CommandSpec) -> anyhow::Result<Box<dyn RemoteProcess>>;
    async fn destroy(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn create(&self, template: &str) -> anyhow::Result<Arc<dyn Sandbox>>;
}

pub struct SandboxFactory;

impl SandboxFactory {
    pub fn from_config(config: &StudioConfig) -> anyhow::Result<Arc<dyn SandboxProvider>> {
        Ok(Arc::new(LocalSandboxProvider::new(
            config.sandbox.root.clone(),
            config.sandbox.templates_root.clone(),
        )?))
    }
}
