use std::{
    env,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use crate::models::RenderDefaults;

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub bind_addr: SocketAddr,
    pub project_root: PathBuf,
    pub scenes_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sandbox: SandboxConfig,
    pub pool: PoolConfig,
    pub render: RenderConfig,
    pub defaults: RenderDefaults,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub root: PathBuf,
    pub template: String,
    pub templates_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub capacity: usize,
    pub protected_scene: Option<String>,
    pub verify_policy: VerifyPolicy,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub artifact_path: PathBuf,
    pub max_output_bytes: usize,
    /// Finished render records are appended here as JSON lines when set.
    pub records_path: Option<PathBuf>,
    /// Finished render records kept in memory for status lookups.
    pub retention: usize,
}

/// What `verify` concludes when the remote manifest cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// Unreadable state is treated as dirty and the sandbox is discarded.
    #[default]
    Strict,
    /// Unreadable state is treated as clean and the sandbox is reused.
    Lenient,
}

impl FromStr for VerifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            _ => Err(format!("unsupported verify policy: {s}")),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        let defaults = RenderDefaults::default();
        Self {
            bind_addr: env_parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000))),
            project_root: env_parse("PROJECT_ROOT", PathBuf::from(".")),
            scenes_dir: env_parse("SCENES_DIR", PathBuf::from("src/scenes")),
            output_dir: env_parse("OUTPUT_DIR", PathBuf::from("output")),
            sandbox: SandboxConfig {
                root: env::var("SANDBOX_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| env::temp_dir().join("scene-studio-sandboxes")),
                template: env::var("SANDBOX_TEMPLATE").unwrap_or_else(|_| "base".to_string()),
                templates_root: env::var("TEMPLATES_ROOT").ok().map(PathBuf::from),
            },
            pool: PoolConfig {
                capacity: env_parse("POOL_CAPACITY", 5usize),
                protected_scene: env::var("PROTECTED_SCENE")
                    .map(|raw| raw.trim().to_string())
                    .map(|raw| (!raw.is_empty()).then_some(raw))
                    .unwrap_or_else(|_| Some("scene_1_intro.tsx".to_string())),
                verify_policy: env_parse("VERIFY_POLICY", VerifyPolicy::Strict),
            },
            render: RenderConfig {
                command: env::var("RENDER_COMMAND").unwrap_or_else(|_| "npm".to_string()),
                args: parse_csv("RENDER_ARGS", "run,render"),
                timeout: Duration::from_millis(env_parse("RENDER_TIMEOUT_MS", 600_000u64)),
                artifact_path: env_parse("RENDER_ARTIFACT", PathBuf::from("output/video.mp4")),
                max_output_bytes: env_parse("MAX_OUTPUT_BYTES", 64 * 1024usize),
                records_path: env::var("RENDER_RECORDS_PATH").ok().map(PathBuf::from),
                retention: env_parse("RENDER_RETENTION", 1000usize),
            },
            defaults: RenderDefaults {
                fps: env_parse("DEFAULT_FPS", defaults.fps),
                width: env_parse("DEFAULT_WIDTH", defaults.width),
                height: env_parse("DEFAULT_HEIGHT", defaults.height),
                theme: env::var("DEFAULT_THEME").unwrap_or(defaults.theme),
            },
            worker_count: env_parse("WORKER_COUNT", 4usize),
            queue_capacity: env_parse("QUEUE_CAPACITY", 256usize),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

fn parse_csv(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
