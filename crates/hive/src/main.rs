//! Admin entry point for hive.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hive_app::{MemoryStore, ProjectManager, ServerConfig, TaskScheduler};
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;

/// Project hierarchy and bare repository administration.
#[derive(Parser, Debug)]
#[command(
    name = "hive",
    version,
    about = "hive: project hierarchies backed by bare git repositories"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "hive.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the project cache, fix stale paths and repair repositories.
    Check,

    /// List projects.
    Ls {
        /// Wildcard the path must match.
        #[arg(long)]
        pattern: Option<String>,
        /// Print rows as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create a project, creating missing parents.
    Create {
        /// Slash separated path.
        path: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Create a project mirroring a remote repository.
    Clone {
        /// Remote URL or local repository path.
        url: String,
        /// Path of the new project.
        path: String,
    },

    /// Fork an existing project.
    Fork {
        /// Path of the source project.
        source: String,
        /// Path of the fork.
        path: String,
    },

    /// Rename or reparent a project.
    Mv {
        /// Path of the project to move.
        path: String,
        /// New parent path.
        #[arg(long, conflicts_with = "root")]
        parent: Option<String>,
        /// Make the project a root.
        #[arg(long)]
        root: bool,
        /// New leaf name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete projects with their subtrees.
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Delete a branch.
    RmBranch { path: String, branch: String },

    /// Delete a tag.
    RmTag { path: String, tag: String },

    /// Keep the cache warm and flush update dates until interrupted.
    Serve,
}

fn main() -> Result<()> {
    let Cli { config, cmd } = Cli::parse();
    install_tracing();

    let config = ServerConfig::load(&config)?;
    match cmd {
        Command::Serve => serve(&config),
        other => {
            let manager = open_manager(&config)?;
            manager.rebuild()?;
            commands::run(other, &manager)
        }
    }
}

fn open_manager(config: &ServerConfig) -> Result<ProjectManager<MemoryStore>> {
    let snapshot = config.snapshot_path();
    let store = MemoryStore::open(&snapshot)
        .with_context(|| format!("failed to open {}", snapshot.display()))?;
    ProjectManager::from_config(store, config)
}

fn serve(config: &ServerConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let manager = Arc::new(open_manager(config)?);
        let scheduler = TaskScheduler::new(Handle::current());
        manager.start(&scheduler)?;
        info!(root = %config.storage.root.display(), "Serving projects; press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;
        manager.stop(&scheduler).await;
        Ok(())
    })
}

fn install_tracing() {
    // RUST_LOG overrides the INFO default.
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mv_command() {
        let cli = Cli::parse_from([
            "hive", "--config", "/etc/hive.toml", "mv", "a/b", "--parent", "c", "--name", "d",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/hive.toml"));
        match cli.cmd {
            Command::Mv {
                path,
                parent,
                root,
                name,
            } => {
                assert_eq!(path, "a/b");
                assert_eq!(parent.as_deref(), Some("c"));
                assert!(!root);
                assert_eq!(name.as_deref(), Some("d"));
            }
            _ => panic!("expected mv command"),
        }
    }

    #[test]
    fn mv_rejects_parent_with_root() {
        assert!(Cli::try_parse_from(["hive", "mv", "a", "--parent", "b", "--root"]).is_err());
    }

    #[test]
    fn rm_requires_a_path() {
        assert!(Cli::try_parse_from(["hive", "rm"]).is_err());
        let cli = Cli::parse_from(["hive", "rm", "a", "b/c"]);
        match cli.cmd {
            Command::Rm { paths } => assert_eq!(paths, vec!["a", "b/c"]),
            _ => panic!("expected rm command"),
        }
    }

    #[test]
    fn parse_ls_defaults() {
        let cli = Cli::parse_from(["hive", "ls"]);
        assert_eq!(cli.config, PathBuf::from("hive.toml"));
        assert!(matches!(
            cli.cmd,
            Command::Ls {
                pattern: None,
                json: false
            }
        ));
    }
}
