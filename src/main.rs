mod api;
mod config;
mod error;
mod fs;
mod metrics;
mod models;
mod pool;
mod registry;
mod render;
mod sandbox;
mod source_check;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{
    api::{AppState, routes},
    config::StudioConfig,
    fs::{FileSystem, LocalFs},
    metrics::MetricsRegistry,
    models::{ScenePush, SceneDescriptor},
    pool::{PoolOptions, SandboxPool},
    registry::{PushOutcome, SceneRegistry},
    render::{RenderStore, Scheduler, WorkerContext, spawn_worker_pool},
    sandbox::SandboxFactory,
    source_check::check_scene_source,
};

#[derive(Parser, Debug)]
#[command(name = "scene-studio", version, about = "Scene registry, sandbox pool and render service")]
struct Cli {
    /// Project tree that holds the scenes directory.
    #[arg(long, global = true, env = "PROJECT_ROOT")]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Print the scenes in playback order.
    List,
    /// Add or replace one scene.
    Push(PushArgs),
    /// Push every scene in a JSON file.
    Batch(BatchArgs),
    /// Remove a scene and its source file.
    Remove { id: String },
    /// Show the theme, or set it when one is given.
    Theme { theme: Option<String> },
    /// Lint a scene source file.
    Validate { file: PathBuf },
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<SocketAddr>,
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("source").required(true).args(["content", "file"])))]
struct PushArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    name: String,
    /// Length in frames.
    #[arg(long, allow_negative_numbers = true)]
    duration: i64,
    /// Scene source given inline.
    #[arg(long)]
    content: Option<String>,
    /// Read the scene source from this file.
    #[arg(long)]
    file: Option<PathBuf>,
    /// Component file name; defaults to `<id>.tsx`.
    #[arg(long)]
    filename: Option<String>,
    /// JSON object handed to the component.
    #[arg(long)]
    props: Option<String>,
    #[arg(long)]
    theme: Option<String>,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// A JSON array of scenes, or an object with a `scenes` array.
    #[arg(long)]
    json: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = StudioConfig::from_env();
    if let Some(root) = cli.project_root {
        config.project_root = root;
    }

    match cli.cmd {
        Command::Serve(args) => {
            if let Some(bind) = args.bind {
                config.bind_addr = bind;
            }
            init_tracing(&config, true);
            serve(config).await
        }
        cmd => {
            init_tracing(&config, false);
            run_command(cmd, &config).await
        }
    }
}

async fn serve(config: StudioConfig) -> anyhow::Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let project_fs: Arc<dyn FileSystem> = Arc::new(LocalFs::new(config.project_root.clone()));
    let registry = SceneRegistry::new(
        project_fs.clone(),
        config.scenes_dir.clone(),
        config.defaults.clone(),
    );

    let provider = SandboxFactory::from_config(&config).context("sandbox provider init failed")?;
    let pool = Arc::new(SandboxPool::new(
        provider,
        PoolOptions::from_config(&config),
        metrics.clone(),
    ));
    let store = Arc::new(
        RenderStore::new(config.render.records_path.clone())
            .with_retention(config.render.retention),
    );
    let scheduler = Scheduler::new(config.queue_capacity, metrics.clone());

    spawn_worker_pool(
        config.worker_count.max(1),
        scheduler.receiver(),
        WorkerContext {
            pool: pool.clone(),
            store: store.clone(),
            metrics: metrics.clone(),
            settings: config.render.clone(),
            output_fs: project_fs,
            output_dir: config.output_dir.clone(),
        },
    );

    let app = routes(AppState {
        registry,
        pool: pool.clone(),
        scheduler,
        store,
        metrics,
    });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .context("failed to bind listener")?;
    tracing::info!(
        addr = %config.bind_addr,
        project_root = %config.project_root.display(),
        pool_capacity = config.pool.capacity,
        workers = config.worker_count.max(1),
        "scene studio listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    pool.destroy_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        return;
    }
    tracing::info!("shutdown requested");
}

async fn run_command(cmd: Command, config: &StudioConfig) -> anyhow::Result<()> {
    let registry = SceneRegistry::new(
        Arc::new(LocalFs::new(config.project_root.clone())),
        config.scenes_dir.clone(),
        config.defaults.clone(),
    );

    match cmd {
        Command::Serve(_) => bail!("serve is handled by main"),
        Command::List => {
            let manifest = registry.load_manifest().await;
            println!(
                "theme: {}  {}x{} @ {} fps",
                manifest.theme, manifest.width, manifest.height, manifest.fps
            );
            for (index, scene) in manifest.scenes.iter().enumerate() {
                print_scene(index, scene);
            }
            let frames = manifest.total_frames();
            println!(
                "{} scene(s), {frames} frames ({:.1}s)",
                manifest.scenes.len(),
                frames as f64 / f64::from(manifest.fps.max(1))
            );
        }
        Command::Push(args) => {
            let push = scene_push(args).await?;
            let id = push.id.clone();
            let outcome = registry.push_scene(push).await?;
            let verb = match outcome {
                PushOutcome::Added => "added",
                PushOutcome::Updated => "updated",
            };
            println!("scene {id} {verb}");
        }
        Command::Batch(args) => {
            let raw = tokio::fs::read(&args.json)
                .await
                .with_context(|| format!("failed to read {}", args.json.display()))?;
            let entries = match serde_json::from_slice::<Value>(&raw)? {
                Value::Array(entries) => entries,
                Value::Object(mut object) => match object.remove("scenes") {
                    Some(Value::Array(entries)) => entries,
                    _ => bail!("expected a `scenes` array in {}", args.json.display()),
                },
                _ => bail!("expected a JSON array of scenes"),
            };

            let total = entries.len();
            let mut pushes = Vec::with_capacity(total);
            for (index, entry) in entries.into_iter().enumerate() {
                match serde_json::from_value::<ScenePush>(entry) {
                    Ok(push) => pushes.push(push),
                    Err(err) => tracing::warn!(index, error = %err, "malformed batch entry skipped"),
                }
            }
            let outcome = registry.push_batch(pushes).await;
            println!("{}/{total} scenes pushed", outcome.success_count);
        }
        Command::Remove { id } => {
            let removed = registry.remove_scene(&id).await?;
            println!("scene {} removed ({})", removed.id, removed.component);
        }
        Command::Theme { theme: Some(theme) } => {
            registry.set_theme(&theme).await?;
            println!("theme set to {}", theme.trim());
        }
        Command::Theme { theme: None } => {
            println!("{}", registry.get_theme().await);
        }
        Command::Validate { file } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let check = check_scene_source(&content);
            for error in &check.errors {
                println!("error: {error}");
            }
            for warning in &check.warnings {
                println!("warning: {warning}");
            }
            if !check.is_ok() {
                bail!("{} has {} error(s)", file.display(), check.errors.len());
            }
            println!("{} looks valid", file.display());
        }
    }
    Ok(())
}

fn print_scene(index: usize, scene: &SceneDescriptor) {
    println!(
        "{:>3}. {:<24} {:<32} {:>6} frames  {}",
        index + 1,
        scene.id,
        scene.name,
        scene.duration_in_frames,
        scene.component
    );
}

async fn scene_push(args: PushArgs) -> anyhow::Result<ScenePush> {
    let content = match (args.content, args.file) {
        (Some(content), _) => content,
        (None, Some(file)) => tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?,
        (None, None) => bail!("either --content or --file is required"),
    };
    let props = args
        .props
        .map(|raw| serde_json::from_str::<Map<String, Value>>(&raw))
        .transpose()
        .context("--props must be a JSON object")?;

    Ok(ScenePush {
        id: args.id,
        name: args.name,
        duration: args.duration,
        content,
        filename: args.filename,
        props,
        theme: args.theme,
    })
}

fn init_tracing(config: &StudioConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        builder
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
