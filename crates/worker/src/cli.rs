use std::path::PathBuf;

use clap::Parser;

/// Render queue worker driven by a farm dispatcher.
#[derive(Debug, Clone, Parser)]
#[command(name = "shotfarm-worker", version)]
pub struct Cli {
    /// Manifest (render queue) to load. Relative references resolve
    /// against CONTENT_ROOT; the `.json` extension may be omitted.
    #[arg(long, visible_alias = "movie-pipeline-config", value_name = "MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Render every shot of the queue in order without a dispatcher,
    /// then exit.
    #[arg(long)]
    pub local: bool,
}
