//! memtree CLI tool
//!
//! Command-line front end over a SQLite memory tree. Each invocation restores the saved view
//! (scope, expansions, selection) from the config file, runs one command, saves the view back and
//! prints the visible outline.
//!
//! ## Commands
//!
//! - `roots [--starred]`: reload the root list
//! - `expand <id>...` / `collapse <id>...`
//! - `add-child [--parent <id>] [--count <n>]`, `add-list`
//! - `move <id>... [--to <id>]`: reparent, detaching to the root list without `--to`
//! - `reindex <anchor> <start>`
//! - `reveal <id>`, `search <text>`, `star <id>`, `delete <id>`

use clap::{Parser, Subcommand};
use memtree_core::{
    config::{ConfigProvider, TomlConfigProvider},
    db::{DbConnection, MEMTREE_DB},
    engine::{Outcome, TreeEngine},
    event::{Severity, TreeEvent},
    properties::{NodeId, ViewScope},
    MemtreeError,
};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser)]
#[command(name = "memtree")]
#[command(author, version, about = "Browse and edit a lazily loaded memory tree", long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, default_value = MEMTREE_DB)]
    db: PathBuf,

    /// Configuration file path (defaults to memtree.toml next to the database)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reload the root list
    Roots {
        /// Only show starred roots
        #[arg(long)]
        starred: bool,
    },

    /// Expand nodes, loading their children
    Expand { ids: Vec<NodeId> },

    /// Collapse nodes (fetched children are kept)
    Collapse { ids: Vec<NodeId> },

    /// Append new children under a node, or a new root without --parent
    AddChild {
        #[arg(long)]
        parent: Option<NodeId>,

        /// Bulk insert numbered children
        #[arg(long)]
        count: Option<usize>,
    },

    /// Append a new top-level list
    AddList,

    /// Move nodes under a new parent, or to the root list without --to
    Move {
        #[arg(required = true)]
        ids: Vec<NodeId>,

        #[arg(long)]
        to: Option<NodeId>,
    },

    /// Renumber siblings from an anchor onward
    Reindex { anchor: NodeId, start: i64 },

    /// Expand the path to a node and select it
    Reveal { id: NodeId },

    /// Search names, descriptions and code snippets
    Search { text: String },

    /// Toggle the starred flag
    Star { id: NodeId },

    /// Delete a node and everything below it
    Delete { id: NodeId },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))?;
    Ok(())
}

async fn run(cli: Cli) -> Result<(), MemtreeError> {
    let config_path = match cli.config {
        Some(path) => path,
        None => cli
            .db
            .parent()
            .map(|dir| dir.join("memtree.toml"))
            .unwrap_or_else(|| PathBuf::from("memtree.toml")),
    };
    let provider = TomlConfigProvider::new(config_path);
    let config = provider.get_engine_config()?;
    let store = DbConnection::open(cli.db).await?;
    let (engine, mut events) = TreeEngine::with_channel(store, config);

    let view = provider.get_view()?;
    if let Err(e) = engine.restore_view(view).await {
        tracing::warn!("[memtree] saved view could not be fully restored: {}", e);
    }

    let result = execute(&engine, cli.command).await;
    report_events(&mut events);
    provider.set_view(engine.snapshot_view())?;
    print_outline(&engine);
    result
}

async fn execute(engine: &TreeEngine<DbConnection>, command: Commands) -> Result<(), MemtreeError> {
    match command {
        Commands::Roots { starred } => {
            let scope = if starred {
                ViewScope::Starred
            } else {
                ViewScope::All
            };
            engine.load_roots(scope).await?;
        }
        Commands::Expand { ids } => {
            for id in ids {
                engine.expand(id).await?;
            }
        }
        Commands::Collapse { ids } => {
            for id in ids {
                engine.collapse(id).await?;
            }
        }
        Commands::AddChild { parent, count } => match (parent, count) {
            (Some(parent), Some(count)) => {
                let records = engine.insert_many(parent, count).await?;
                engine.expand(parent).await?;
                println!("Added {} item(s) under {}", records.len(), parent);
            }
            (None, Some(_)) => {
                return Err(MemtreeError::Validation(
                    "--count requires --parent".to_string(),
                ));
            }
            (parent, None) => {
                let record = engine.create_child(parent).await?;
                println!("Added {} ({})", record.id, record.name);
            }
        },
        Commands::AddList => {
            let record = engine.create_list().await?;
            println!("Added list {} ({})", record.id, record.name);
        }
        Commands::Move { ids, to } => {
            if let Outcome::Applied(count) = engine.reparent(&ids, to).await? {
                println!("Moved {count} item(s)");
            }
        }
        Commands::Reindex { anchor, start } => {
            engine.reindex_from(anchor, start).await?;
        }
        Commands::Reveal { id } => {
            if engine.reveal_path(id).await?.is_discarded() {
                println!("Reveal of {id} was superseded");
            }
        }
        Commands::Search { text } => {
            for hit in engine.search(&text).await? {
                println!("{:>6}  {}", hit.id, hit.name);
            }
        }
        Commands::Star { id } => {
            if engine.node(id).is_none() {
                engine.reveal_path(id).await?;
            }
            let starred = engine.toggle_starred(id).await?;
            println!("{id} is {}", if starred { "starred" } else { "unstarred" });
        }
        Commands::Delete { id } => {
            engine.delete_subtree(id).await?;
        }
    }
    Ok(())
}

fn report_events(events: &mut UnboundedReceiver<TreeEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            TreeEvent::Message { text, severity } => match severity {
                Severity::Error | Severity::Warning => eprintln!("[{severity:?}] {text}"),
                Severity::Success | Severity::Info => println!("{text}"),
            },
            other => tracing::debug!("[memtree] {}", other),
        }
    }
}

fn print_outline(engine: &TreeEngine<DbConnection>) {
    let selection = engine.selection();
    println!();
    for row in engine.visible_rows() {
        let Some(record) = engine.node(row.id) else {
            continue;
        };
        let marker = match (row.has_children, row.expanded) {
            (true, true) => "v",
            (true, false) => ">",
            (false, _) => " ",
        };
        let selected = if selection.contains(row.id) { "*" } else { " " };
        let star = if record.starred { " (starred)" } else { "" };
        println!(
            "{selected}{}{marker} {} [{}] {}{star}",
            "  ".repeat(row.depth as usize),
            record.id,
            record.order_key,
            record.name,
        );
    }
}
