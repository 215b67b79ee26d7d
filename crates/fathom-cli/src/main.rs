//! Fathom CLI.
//!
//! Command-line interface for indexing, searching, watching, and managing
//! Fathom containers and annotations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use fathom_core::types::{AnnotationSource, DiffWindow, IndexEvent, SearchRequest};
use fathom_core::watcher::Watcher;
use fathom_core::{Config, Engine};

/// Fathom - local-first semantic file index
#[derive(Parser, Debug)]
#[command(name = "fathom", version, about = "Local-first semantic file index")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Data directory override.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a directory and index its contents.
    Index {
        /// Directory to index.
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Search the active (or named) container.
    Search {
        /// Natural-language query.
        query: String,

        /// Maximum number of results.
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,

        /// Container to search.
        #[arg(long)]
        container: Option<String>,

        /// Restrict results to these extensions (repeatable).
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Restrict results to paths under this prefix.
        #[arg(long)]
        prefix: Option<PathBuf>,

        /// Drop results scoring below this threshold (0-100).
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Watch the container's roots and index changes as they happen.
    Watch {
        /// Container to watch (active container when omitted).
        #[arg(long)]
        container: Option<String>,
    },

    /// Show container status and index statistics.
    Status {
        /// Container name (active container when omitted).
        #[arg(long)]
        container: Option<String>,
    },

    /// Clear a container and rebuild it from its roots.
    Reindex {
        /// Container name (active container when omitted).
        #[arg(long)]
        container: Option<String>,
    },

    /// Drop all indexed rows of a container.
    Reset {
        /// Container name (active container when omitted).
        #[arg(long)]
        container: Option<String>,
    },

    /// Recently changed indexed paths.
    Diff {
        /// Time window: 30m, 2h, 1d, or 7d.
        #[arg(default_value = "1d")]
        window: String,

        /// Include a short preview per file.
        #[arg(long)]
        previews: bool,
    },

    /// Paths nearest to a file in embedding space.
    Related {
        /// Path whose neighbours to find.
        path: PathBuf,

        /// Maximum number of results.
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
    },

    /// Manage containers.
    Containers {
        #[command(subcommand)]
        command: ContainerCommands,
    },

    /// Manage annotations.
    Annotate {
        #[command(subcommand)]
        command: AnnotateCommands,
    },

    /// Manage configuration.
    Config {
        /// Show current effective configuration.
        #[arg(long)]
        show: bool,

        /// Write a default config.toml into the data directory.
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ContainerCommands {
    /// Create a container bound to the current embedding provider.
    Create {
        /// Unique container name.
        name: String,

        /// Free-form description.
        #[arg(long, default_value = "")]
        description: String,

        /// Root paths to register immediately (repeatable).
        #[arg(long = "root")]
        roots: Vec<PathBuf>,
    },
    /// Delete a container and all of its indexed data.
    Delete {
        /// Container name.
        name: String,
    },
    /// List containers.
    List,
    /// Switch the active container.
    Use {
        /// Container name.
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum AnnotateCommands {
    /// Attach a note to a file path.
    Add {
        /// Path the note is about.
        path: PathBuf,

        /// Note text.
        note: String,
    },
    /// List annotations, optionally for one path.
    List {
        /// Restrict to one path.
        path: Option<PathBuf>,
    },
    /// Remove an annotation by id.
    Remove {
        /// Annotation id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    let config = match &cli.data_dir {
        Some(dir) => Config::load_from(dir)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Index { path } => {
            let engine = Arc::new(Engine::new(config)?);
            let progress = spawn_progress_bar(&engine);
            let summary = engine.index_folder(&path).await?;
            progress.abort();
            println!(
                "indexed {} files, {} fragments ({} skipped, {} deleted)",
                summary.files_indexed,
                summary.fragments_written,
                summary.files_skipped,
                summary.files_deleted
            );
        }

        Commands::Search {
            query,
            top_k,
            container,
            extensions,
            prefix,
            min_score,
        } => {
            let engine = Engine::new(config)?;
            let request = SearchRequest {
                query,
                container,
                top_k: Some(top_k),
                file_extensions: (!extensions.is_empty()).then_some(extensions),
                path_prefix: prefix,
                context_bytes: None,
                min_score,
            };
            let hits = engine.search(&request).await?;
            if hits.is_empty() {
                println!("no results");
            }
            for hit in hits {
                println!("{:6.1}  {}", hit.score, hit.path.display());
                for line in hit.snippet.lines().take(2) {
                    println!("        {line}");
                }
            }
        }

        Commands::Watch { container } => {
            let engine = Arc::new(Engine::new(config)?);
            let name = container.unwrap_or_else(|| {
                engine
                    .container_meta(None)
                    .map(|m| m.name)
                    .unwrap_or_else(|_| "Default".into())
            });

            // Catch up before streaming changes.
            let summary = engine.reindex_delta(Some(name.as_str())).await?;
            println!(
                "synced: {} indexed, {} deleted; watching for changes (ctrl-c to stop)",
                summary.files_indexed, summary.files_deleted
            );

            let watcher = Watcher::spawn(Arc::clone(&engine), &name)?;
            tokio::signal::ctrl_c().await?;
            watcher.stop().await;
        }

        Commands::Status { container } => {
            let engine = Engine::new(config)?;
            let status = engine.index_status(container.as_deref())?;
            println!("provider:  {}", status.provider_label);
            println!("files:     {}", status.total_files);
            println!("fragments: {}", status.total_chunks);
            println!("roots:");
            for root in status.indexed_paths {
                println!("  {}", root.display());
            }
        }

        Commands::Reindex { container } => {
            let engine = Arc::new(Engine::new(config)?);
            let progress = spawn_progress_bar(&engine);
            let summary = engine.reindex_all(container.as_deref()).await?;
            progress.abort();
            println!(
                "reindexed {} files, {} fragments ({} skipped)",
                summary.files_indexed, summary.fragments_written, summary.files_skipped
            );
        }

        Commands::Reset { container } => {
            let engine = Engine::new(config)?;
            engine.reset_index(container.as_deref()).await?;
            println!("index reset");
        }

        Commands::Diff { window, previews } => {
            let engine = Engine::new(config)?;
            let window = DiffWindow::parse(&window)
                .ok_or_else(|| anyhow::anyhow!("window must be one of 30m, 2h, 1d, 7d"))?;
            for entry in engine.diff(window, previews)? {
                println!("{}", entry.path.display());
                if let Some(preview) = entry.preview {
                    for line in preview.lines().take(2) {
                        println!("    {line}");
                    }
                }
            }
        }

        Commands::Related { path, top_k } => {
            let engine = Engine::new(config)?;
            for hit in engine.related(&path, top_k).await? {
                println!("{:6.1}  {}", hit.score, hit.path.display());
            }
        }

        Commands::Containers { command } => {
            let engine = Engine::new(config)?;
            match command {
                ContainerCommands::Create {
                    name,
                    description,
                    roots,
                } => {
                    let meta = engine.create_container(&name, &description, None, roots)?;
                    println!("created '{}' bound to {}", meta.name, meta.provider_identity.label());
                }
                ContainerCommands::Delete { name } => {
                    engine.delete_container(&name)?;
                    println!("deleted '{name}'");
                }
                ContainerCommands::List => {
                    for (meta, active) in engine.list_containers() {
                        let marker = if active { "*" } else { " " };
                        println!(
                            "{marker} {:20} {:24} {} roots",
                            meta.name,
                            meta.provider_identity.label(),
                            meta.roots.len()
                        );
                    }
                }
                ContainerCommands::Use { name } => {
                    engine.set_active_container(&name)?;
                    println!("active container: {name}");
                }
            }
        }

        Commands::Annotate { command } => {
            let engine = Engine::new(config)?;
            match command {
                AnnotateCommands::Add { path, note } => {
                    let annotation = engine
                        .add_annotation(None, &path, &note, AnnotationSource::User)
                        .await?;
                    println!("added annotation {}", annotation.id);
                }
                AnnotateCommands::List { path } => {
                    for ann in engine.get_annotations(None, path.as_deref())? {
                        println!("{}  {}  {}", ann.id, ann.path.display(), ann.note);
                    }
                }
                AnnotateCommands::Remove { id } => {
                    engine.delete_annotation(None, &id)?;
                    println!("removed annotation {id}");
                }
            }
        }

        Commands::Config { show, init } => {
            if init {
                let path = config.data_dir.join("config.toml");
                if path.exists() {
                    anyhow::bail!("{} already exists", path.display());
                }
                std::fs::create_dir_all(&config.data_dir)?;
                std::fs::write(&path, toml::to_string_pretty(&config)?)?;
                println!("wrote {}", path.display());
            }
            if show {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            if !show && !init {
                println!("use --show or --init");
            }
        }
    }

    Ok(())
}

/// Mirror indexing-progress events onto a terminal progress bar.
fn spawn_progress_bar(engine: &Arc<Engine>) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        let bar = indicatif::ProgressBar::hidden();
        loop {
            match events.recv().await {
                Ok(IndexEvent::IndexingProgress { current, total, path }) => {
                    if bar.is_hidden() && total > 0 {
                        bar.set_style(
                            indicatif::ProgressStyle::with_template(
                                "[{bar:30}] {pos}/{len} {msg}",
                            )
                            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
                        );
                        bar.set_length(total as u64);
                        bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                    }
                    bar.set_position(current as u64);
                    bar.set_message(
                        path.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                    );
                }
                Ok(IndexEvent::IndexingComplete { .. }) => {
                    bar.finish_and_clear();
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_args() {
        let cli = Cli::parse_from([
            "fathom", "search", "server costs", "-k", "5", "--ext", "md", "--min-score", "40",
        ]);
        match cli.command {
            Commands::Search {
                query,
                top_k,
                extensions,
                min_score,
                ..
            } => {
                assert_eq!(query, "server costs");
                assert_eq!(top_k, 5);
                assert_eq!(extensions, vec!["md".to_string()]);
                assert_eq!(min_score, Some(40.0));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
