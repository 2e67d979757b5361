use std::path::PathBuf;

use clap::{Parser, Subcommand};

use photohub_core::ProjectId;
use photohub_workflow::ProjectStatus;

#[derive(Debug, Parser)]
#[command(name = "photohub", author, version, about = "PhotoHub projects and background jobs", long_about = None)]
pub struct Cli {
    /// Data directory (defaults to $PHOTOHUB_DATA_DIR, then the platform data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, inspect and move projects through the workflow
    #[command(subcommand)]
    Project(ProjectAction),
    /// Copy image and RAW files from a card or folder into a project
    Import {
        project_id: ProjectId,
        source_dir: PathBuf,
        dest_dir: PathBuf,
    },
    /// Deliver assets of a project to a destination folder
    Export {
        project_id: ProjectId,
        destination: PathBuf,
        #[arg(required = true)]
        assets: Vec<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProjectAction {
    /// Register a new project at status "new"
    Create { name: String },
    /// List projects and their status
    List,
    /// Show a project's status and the statuses it may move to
    Status { project_id: ProjectId },
    /// Move a project to another status
    Transition {
        project_id: ProjectId,
        #[arg(help = "Target status (new, importing, culling, editing, exporting, delivered, archived)")]
        status: ProjectStatus,
    },
}
