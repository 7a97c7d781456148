use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::ConfigLoader;
use crate::list::ListStore;
use crate::storage;

pub mod commands;

use self::commands::{
    AddArgs, ClearArgs, DeleteArgs, EditArgs, ListArgs, MoveArgs, OfflineArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "grocery",
    version,
    about = "Keyboard-first grocery list with offline asset caching"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over GROCERY_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over GROCERY_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Add an item; reads one item per line from stdin when no text is given
    Add(AddArgs),
    /// Print the list, newest first
    List(ListArgs),
    /// Replace the text of an item
    Edit(EditArgs),
    /// Remove an item (asks first unless --yes)
    Delete(DeleteArgs),
    /// Move an item from one list position to another
    Move(MoveArgs),
    /// Remove every item (asks first unless --yes)
    Clear(ClearArgs),
    /// Manage the offline asset cache
    Offline(OfflineArgs),
}

enum LogSink<'a> {
    Stderr,
    File(&'a Path),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("GROCERY_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("GROCERY_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);

    let log_file = paths.log_dir.join("grocery.log");
    let sink = if matches!(command, Commands::Tui) {
        LogSink::File(&log_file)
    } else {
        LogSink::Stderr
    };
    init_tracing(&cli.log_level, sink)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let config = Arc::new(loader.load_or_init()?);

    if let Commands::Offline(args) = command {
        return commands::handle_offline_command(&config, args);
    }

    let backend = storage::init(&paths, &config.storage)?;
    let mut store = ListStore::load(backend, config.list.storage_key.clone());
    if let Commands::Tui = command {
        return App::new(config.clone(), store).run();
    }

    let mut stdout = io::stdout().lock();
    match command {
        Commands::Add(args) => commands::add_items(&mut store, args, &mut stdout),
        Commands::List(args) => commands::list_items(&store, args, &mut stdout),
        Commands::Edit(args) => commands::edit_item(&mut store, args, &mut stdout),
        Commands::Delete(args) => {
            commands::delete_item(&mut store, args, &mut stdout, commands::ask_yes_no)
        }
        Commands::Move(args) => commands::move_item(&mut store, args, &mut stdout),
        Commands::Clear(args) => {
            commands::clear_items(&mut store, args, &mut stdout, commands::ask_yes_no)
        }
        Commands::Tui | Commands::Offline(_) => Ok(()),
    }
}

fn init_tracing(level: &str, sink: LogSink<'_>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = fmt()
            .with_env_filter(env_filter)
            .with_timer(UtcTime::rfc_3339());
        match sink {
            LogSink::Stderr => builder.with_writer(std::io::stderr).init(),
            LogSink::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                builder
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .map(|_| ())
}
