//! Command implementations. Output goes to the given writer.

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use photohub_core::{AggregateRoot, ProjectId};
use photohub_jobs::{Job, JobKind, JobParams, JobState, JobUpdate, LogLevel};
use photohub_workflow::{ProjectStatus, StatusList};

use crate::args::{Cli, Command, ProjectAction};
use crate::context::AppContext;
use crate::media;
use crate::settings::Settings;

const POLL: Duration = Duration::from_millis(500);

pub fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let settings = Settings::from_env(cli.data_dir)?;
    run_with(&settings, cli.command, out)
}

pub fn run_with(settings: &Settings, command: Command, out: &mut dyn Write) -> Result<()> {
    let ctx = AppContext::open(settings)?;

    let result = match command {
        Command::Project(action) => project(&ctx, action, out),
        Command::Import {
            project_id,
            source_dir,
            dest_dir,
        } => import(&ctx, project_id, source_dir, dest_dir, out),
        Command::Export {
            project_id,
            destination,
            assets,
        } => export(&ctx, project_id, destination, assets, out),
    };

    ctx.engine.shutdown();
    result
}

fn project(ctx: &AppContext, action: ProjectAction, out: &mut dyn Write) -> Result<()> {
    match action {
        ProjectAction::Create { name } => {
            let id = ctx.guard.create_project(&name)?;
            writeln!(out, "{id}")?;
        }
        ProjectAction::List => {
            for project in ctx.guard.projects()? {
                writeln!(
                    out,
                    "{}  {:<10}  {}",
                    project.id(),
                    project.status().as_str(),
                    project.name()
                )?;
            }
        }
        ProjectAction::Status { project_id } => {
            let status = ctx.guard.current_status(project_id)?;
            writeln!(out, "{}", status.label())?;
            writeln!(out, "next: {}", describe_next(status))?;
        }
        ProjectAction::Transition { project_id, status } => {
            let status = ctx
                .guard
                .apply_transition(project_id, status)
                .context("transition rejected")?;
            writeln!(out, "{project_id} is now {status}")?;
        }
    }
    Ok(())
}

fn import(
    ctx: &AppContext,
    project_id: ProjectId,
    source_dir: PathBuf,
    dest_dir: PathBuf,
    out: &mut dyn Write,
) -> Result<()> {
    if !source_dir.is_dir() {
        bail!("source folder {} does not exist", source_dir.display());
    }
    let files = media::scan(&source_dir)
        .with_context(|| format!("cannot scan {}", source_dir.display()))?;
    if files.is_empty() {
        bail!("no image or RAW files found in {}", source_dir.display());
    }

    let params = JobParams::Import {
        source_dir,
        dest_dir,
        files,
    };
    run_job(ctx, project_id, JobKind::Import, params, out)
}

fn export(
    ctx: &AppContext,
    project_id: ProjectId,
    destination: PathBuf,
    assets: Vec<PathBuf>,
    out: &mut dyn Write,
) -> Result<()> {
    let params = JobParams::Export {
        destination,
        assets,
    };
    run_job(ctx, project_id, JobKind::Export, params, out)
}

/// Submit a project job and print its updates until it finishes.
fn run_job(
    ctx: &AppContext,
    project_id: ProjectId,
    kind: JobKind,
    params: JobParams,
    out: &mut dyn Write,
) -> Result<()> {
    let updates = ctx.engine.subscribe();
    let job_id = ctx.engine.submit_for_project(project_id, kind, params)?;
    writeln!(out, "{kind} job {job_id} queued")?;

    loop {
        match updates.recv_timeout(POLL) {
            Ok(update) if update.job_id == job_id => {
                writeln!(out, "{}", render(&update))?;
                if update.is_terminal() {
                    break;
                }
            }
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let job = ctx.engine.wait(job_id, POLL)?;
    summarize(&job, out)?;

    match job.state {
        JobState::Succeeded => {
            let status = ctx.guard.current_status(project_id)?;
            writeln!(out, "project {project_id} is {status}")?;
            Ok(())
        }
        JobState::Failed => bail!(
            "{kind} job {job_id} failed: {}",
            job.error.as_deref().unwrap_or("unknown error")
        ),
        state => bail!("{kind} job {job_id} ended {state}"),
    }
}

fn render(update: &JobUpdate) -> String {
    let mut line = format!(
        "{} {:<9} {}/{} ({:.0}%)",
        update.kind,
        update.state.as_str(),
        update.units_done,
        update.units_total,
        update.progress * 100.0
    );
    if update.failed_units > 0 {
        line.push_str(&format!(" {} skipped", update.failed_units));
    }
    if let (Some(eta), false) = (update.eta, update.is_terminal()) {
        line.push_str(&format!(" eta {}s", eta.as_secs()));
    }
    line
}

fn summarize(job: &Job, out: &mut dyn Write) -> Result<()> {
    for failure in &job.skipped {
        writeln!(out, "  skipped {}: {}", failure.key, failure.error)?;
    }
    for entry in job.log.iter().filter(|e| e.level == LogLevel::Warning) {
        if !job.skipped.iter().any(|f| entry.message.contains(&f.key)) {
            writeln!(out, "  warning: {}", entry.message)?;
        }
    }
    Ok(())
}

/// Statuses a user may pick next, for help output.
pub fn describe_next(status: ProjectStatus) -> String {
    StatusList(status.allowed_next().to_vec()).to_string()
}
