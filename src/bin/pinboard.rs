use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pinboard::{
    ArrangementEngine, Cell, Config, Context, ElementId, EntryId, GroupId, Hierarchy, PinBoard, TabId,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Pin, unpin and inspect start-menu pins")]
struct Cli {
    /// Pin record to use instead of the per-user default.
    #[arg(long, global = true, value_name = "PATH")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pin a file or folder.
    Pin {
        path: PathBuf,
        /// Tab to pin into; the first tab when omitted.
        #[arg(long, value_name = "ID")]
        tab: Option<TabId>,
        #[arg(long, value_name = "ID")]
        group: Option<GroupId>,
        /// Grid width used to place the new pin.
        #[arg(long, value_name = "N")]
        columns: Option<u32>,
    },
    /// Unpin by target path.
    Unpin { path: PathBuf },
    /// Unpin by entry id.
    UnpinId { id: EntryId },
    /// Exit with status 0 if the path is pinned, 1 otherwise.
    IsPinned { path: PathBuf },
    /// Print tabs, groups and pins with their cells.
    List,
    /// Follow the record and log every external change.
    Watch,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let directives = env::var("RUST_LOG").unwrap_or_else(|_| "pinboard=info".to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load();
    if let Some(store) = cli.store {
        config.relocate(store);
    }

    match cli.command {
        Command::Pin {
            path,
            tab,
            group,
            columns,
        } => {
            let board = PinBoard::open(&config);
            let columns = columns.unwrap_or(config.default_columns);
            let id = board
                .add_pin(&path, tab, group, columns)
                .with_context(|| format!("cannot pin {}", path.display()))?;
            println!("{id}");
        }
        Command::Unpin { path } => {
            let board = PinBoard::open(&config);
            if !board.remove_pin(&path) {
                info!(path = %path.display(), "was not pinned");
            }
        }
        Command::UnpinId { id } => {
            let board = PinBoard::open(&config);
            if !board.remove_pin_by_id(id) {
                info!(%id, "no such pin");
            }
        }
        Command::IsPinned { path } => {
            let board = PinBoard::open(&config);
            if !board.is_pinned(&path) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::List => {
            let board = PinBoard::open(&config);
            print_hierarchy(&board.snapshot());
        }
        Command::Watch => {
            let board = PinBoard::open_watched(&config).with_context(|| {
                format!("cannot watch {}", config.store_path.display())
            })?;
            let path = config.store_path.clone();
            board.subscribe(move || info!(path = %path.display(), "pins changed"));
            info!(store = %config.store_path.display(), "watching, press Ctrl-C to stop");
            loop {
                if board.wait_for_external_change(Duration::from_secs(1)) {
                    let snapshot = board.snapshot();
                    info!(
                        tabs = snapshot.tabs().len(),
                        groups = snapshot.groups().len(),
                        entries = snapshot.entries().len(),
                        "reloaded"
                    );
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_hierarchy(hierarchy: &Hierarchy) {
    for tab in hierarchy.tabs() {
        println!("{} {} [{}]", tab.order, tab.name, tab.id);
        for (element, cell) in ArrangementEngine::ordered_elements(hierarchy, Context::TabTop(tab.id)) {
            match element {
                ElementId::Group(id) => {
                    let Some(group) = hierarchy.group(id) else {
                        continue;
                    };
                    let marker = if group.is_expanded { "-" } else { "+" };
                    println!("  {cell} {marker} {} [{}]", group.name, group.id);
                    for (inner, inner_cell) in
                        ArrangementEngine::ordered_elements(hierarchy, Context::Group(id))
                    {
                        if let ElementId::Entry(entry) = inner {
                            print_entry(hierarchy, entry, inner_cell, "    ");
                        }
                    }
                }
                ElementId::Entry(id) => print_entry(hierarchy, id, cell, "  "),
            }
        }
    }
}

fn print_entry(hierarchy: &Hierarchy, id: EntryId, cell: Cell, indent: &str) {
    if let Some(entry) = hierarchy.entry(id) {
        println!(
            "{indent}{cell} {} ({:?}) {} [{}]",
            entry.display_name(),
            entry.entry_type,
            entry.path.display(),
            entry.id
        );
    }
}
