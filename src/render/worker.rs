use std::{path::PathBuf, sync::Arc};

use tokio::sync::{Mutex, mpsc::Receiver};
use uuid::Uuid;

use crate::{
    config::RenderConfig,
    error::{StudioError, StudioResult},
    fs::FileSystem,
    metrics::MetricsRegistry,
    models::{RenderOutput, RenderRequest, RenderStatus},
    pool::SandboxPool,
    registry::SceneRegistry,
    render::{queue::RenderJob, store::RenderStore},
    sandbox::{CommandSpec, Sandbox},
};

/// Everything a render worker needs besides the job itself.
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: Arc<SandboxPool>,
    pub store: Arc<RenderStore>,
    pub metrics: Arc<MetricsRegistry>,
    pub settings: RenderConfig,
    /// Local tree that receives finished artifacts.
    pub output_fs: Arc<dyn FileSystem>,
    pub output_dir: PathBuf,
}

pub fn spawn_worker_pool(
    workers: usize,
    receiver: Arc<Mutex<Receiver<RenderJob>>>,
    context: WorkerContext,
) {
    for worker_id in 0..workers {
        let receiver = receiver.clone();
        let context = context.clone();
        tokio::spawn(async move {
            worker_loop(worker_id, receiver, context).await;
        });
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<Receiver<RenderJob>>>,
    context: WorkerContext,
) {
    loop {
        let job = {
            let mut locked = receiver.lock().await;
            locked.recv().await
        };
        let Some(job) = job else {
            tracing::info!(worker_id, "render queue closed, worker exiting");
            break;
        };
        process_job(worker_id, job, &context).await;
    }
}

struct Rendered {
    status: RenderStatus,
    output: RenderOutput,
    error: Option<String>,
}

pub(crate) async fn process_job(worker_id: usize, job: RenderJob, context: &WorkerContext) {
    let store = &context.store;
    let metrics = &context.metrics;
    let job_id = job.id;

    tracing::info!(worker_id, job_id = %job_id, scenes = job.request.scenes.len(), "starting render");
    metrics.render_started();
    store.mark_running(job_id);
    store.append_event(job_id, "worker", format!("worker-{worker_id} claimed job"));

    match execute(job_id, job.request, context).await {
        Ok(rendered) => {
            match rendered.status {
                RenderStatus::Succeeded => metrics.render_succeeded(),
                RenderStatus::TimedOut => metrics.render_timed_out(),
                _ => metrics.render_failed(),
            }
            tracing::info!(job_id = %job_id, status = ?rendered.status, "render finished");
            store
                .mark_finished(
                    job_id,
                    rendered.status,
                    Some(rendered.output),
                    rendered.error,
                )
                .await;
        }
        Err(err) => {
            tracing::warn!(job_id = %job_id, error = %err, "render failed");
            metrics.render_failed();
            store.append_event(job_id, "error", err.to_string());
            store
                .mark_finished(job_id, RenderStatus::Failed, None, Some(err.to_string()))
                .await;
        }
    }
}

async fn execute(
    job_id: Uuid,
    request: RenderRequest,
    context: &WorkerContext,
) -> StudioResult<Rendered> {
    let lease = context.pool.lease(&job_id.to_string()).await?;
    context.store.append_event(
        job_id,
        "sandbox",
        format!("acquired sandbox {}", lease.sandbox().id()),
    );

    let result = render_in(job_id, lease.sandbox().as_ref(), request, context).await;

    let outcome = lease.release().await;
    context
        .store
        .append_event(job_id, "sandbox", format!("released: {outcome:?}"));
    result
}

async fn render_in(
    job_id: Uuid,
    sandbox: &dyn Sandbox,
    request: RenderRequest,
    context: &WorkerContext,
) -> StudioResult<Rendered> {
    let layout = context.pool.layout();
    let settings = &context.settings;
    let registry = SceneRegistry::new(
        sandbox.filesystem(),
        layout.scenes_dir.clone(),
        context.pool.defaults().clone(),
    )
    .with_protected_component(layout.protected_scene.clone());

    let scenes_pushed = registry.push_batch(request.scenes).await;
    context.store.append_event(
        job_id,
        "scenes",
        format!(
            "{}/{} scenes pushed",
            scenes_pushed.success_count, scenes_pushed.total
        ),
    );
    if scenes_pushed.success_count == 0 {
        return Err(StudioError::Validation(
            "none of the submitted scenes could be pushed".to_string(),
        ));
    }
    if let Some(theme) = request.theme.as_deref().filter(|t| !t.trim().is_empty()) {
        registry.set_theme(theme).await?;
    }

    let mut process = sandbox
        .start(CommandSpec {
            command: settings.command.clone(),
            args: settings.args.clone(),
            cwd: layout.app_dir.clone(),
            max_output_bytes: settings.max_output_bytes,
        })
        .await
        .map_err(|err| StudioError::Internal(format!("failed to start render: {err:#}")))?;
    context.store.append_event(
        job_id,
        "render",
        format!("{} {}", settings.command, settings.args.join(" ")),
    );
    let exit = process
        .wait(settings.timeout)
        .await
        .map_err(|err| StudioError::Internal(format!("render process failed: {err:#}")))?;

    let mut output = RenderOutput {
        exit_code: exit.exit_code,
        stdout: exit.stdout,
        stderr: exit.stderr,
        duration_ms: exit.duration_ms,
        scenes_pushed,
        sandbox_id: sandbox.id().to_string(),
        artifact_path: None,
        artifact_bytes: None,
    };

    if exit.timed_out {
        return Ok(Rendered {
            status: RenderStatus::TimedOut,
            output,
            error: Some(format!("render exceeded {:?}", settings.timeout)),
        });
    }
    if exit.exit_code != 0 {
        return Ok(Rendered {
            status: RenderStatus::Failed,
            output,
            error: Some(format!("render exited with code {}", exit.exit_code)),
        });
    }

    match collect_artifact(job_id, sandbox, context).await {
        Ok((path, bytes)) => {
            context
                .store
                .append_event(job_id, "artifact", format!("{bytes} bytes at {path}"));
            output.artifact_path = Some(path);
            output.artifact_bytes = Some(bytes);
            Ok(Rendered {
                status: RenderStatus::Succeeded,
                output,
                error: None,
            })
        }
        Err(err) => Ok(Rendered {
            status: RenderStatus::Failed,
            output,
            error: Some(format!("{err:#}")),
        }),
    }
}

/// Copies the rendered video out of the sandbox before it is scrubbed.
async fn collect_artifact(
    job_id: Uuid,
    sandbox: &dyn Sandbox,
    context: &WorkerContext,
) -> anyhow::Result<(String, u64)> {
    let source = &context.settings.artifact_path;
    let bytes = sandbox
        .filesystem()
        .read(source)
        .await
        .map_err(|err| err.context(format!("render produced no artifact at {}", source.display())))?;

    let target = context.output_dir.join(format!("{job_id}.mp4"));
    context.output_fs.write(&target, &bytes).await?;
    Ok((target.display().to_string(), bytes.len() as u64))
}
