use std::io::{self, BufRead, Read, Write};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use time::OffsetDateTime;

use crate::app::state::format_relative_time;
use crate::app::{ActionDispatcher, Intent, Outcome};
use crate::config::AppConfig;
use crate::list::{record, ItemId, ListStore, SyncState};
use crate::offline::{
    is_stale, AssetDirFetcher, CacheStorage, Destination, FetchOutcome, Fetcher, OfflineFetcher,
    OfflineWorker, Request, SqliteCacheStorage,
};
use crate::storage::Backend;

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Item text (words are joined with spaces). If omitted, reads one item per line from stdin.
    #[arg()]
    pub text: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Print the stored JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Item identifier, as shown by `list`
    pub id: ItemId,
    /// Replacement text
    #[arg(required = true)]
    pub text: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Item identifier, as shown by `list`
    pub id: ItemId,
    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MoveArgs {
    /// Current position (1 is the top of the list)
    pub from: usize,
    /// Position to move the item to
    pub to: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    /// Skip the confirmation prompt
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct OfflineArgs {
    #[command(subcommand)]
    pub command: OfflineCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum OfflineCommand {
    /// Precache the application shell and drop caches from older versions
    Sync,
    /// Show the worker state and every cache on disk
    Status,
    /// Resolve one request through the offline cache
    Fetch(FetchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Absolute URL or a path on the configured origin
    pub url: String,
    /// Request destination (style, script, font, image, ...); guessed from the URL if omitted
    #[arg(long)]
    pub destination: Option<Destination>,
    /// Treat the request as a page navigation
    #[arg(long)]
    pub navigate: bool,
    /// Pretend the network is down
    #[arg(long)]
    pub offline: bool,
    /// Print the response body
    #[arg(long)]
    pub body: bool,
}

pub fn add_items<B: Backend>(
    store: &mut ListStore<B>,
    args: AddArgs,
    out: &mut impl Write,
) -> Result<()> {
    let texts = if args.text.is_empty() {
        match read_stdin()? {
            Some(raw) => raw.lines().map(str::to_owned).collect(),
            None => bail!("provide the item text or pipe items on stdin"),
        }
    } else {
        vec![args.text.join(" ")]
    };

    let mut added = 0;
    for text in texts {
        if let Some(id) = store
            .add(&text)
            .with_context(|| format!("adding {:?}", text.trim()))?
        {
            added += 1;
            writeln!(out, "added #{id}: {}", text.trim())?;
        }
    }
    if added == 0 {
        writeln!(out, "nothing to add")?;
    }
    ensure_saved(store)
}

pub fn list_items<B: Backend>(
    store: &ListStore<B>,
    args: ListArgs,
    out: &mut impl Write,
) -> Result<()> {
    if args.json {
        let json = record::encode(store.items()).context("encoding list")?;
        writeln!(out, "{json}")?;
        return Ok(());
    }

    writeln!(out, "{}", store.summary().message())?;
    let now = OffsetDateTime::now_utc();
    for (position, item) in store.display().enumerate() {
        let marker = if item.edited { ", edited" } else { "" };
        writeln!(
            out,
            "{:>3}. {}  [#{}, {}{marker}]",
            position + 1,
            item.text,
            item.id,
            format_relative_time(item.date, now)
        )?;
    }
    Ok(())
}

pub fn edit_item<B: Backend>(
    store: &mut ListStore<B>,
    args: EditArgs,
    out: &mut impl Write,
) -> Result<()> {
    let mut dispatcher = ActionDispatcher::new();
    dispatcher.dispatch(store, Intent::EditRequest(args.id))?;
    let text = args.text.join(" ");
    dispatcher.dispatch(store, Intent::EditCommit(text.clone()))?;
    writeln!(out, "updated #{}: {}", args.id, text.trim())?;
    ensure_saved(store)
}

pub fn delete_item<B: Backend>(
    store: &mut ListStore<B>,
    args: DeleteArgs,
    out: &mut impl Write,
    ask: impl FnOnce(&str) -> Result<bool>,
) -> Result<()> {
    let mut dispatcher = ActionDispatcher::new();
    if dispatcher.dispatch(store, Intent::DeleteRequest(args.id))? == Outcome::NothingPending {
        writeln!(out, "no item #{}", args.id)?;
        return Ok(());
    }
    let text = store
        .get(args.id)
        .map(|item| item.text.clone())
        .unwrap_or_default();

    let confirmed = args.yes || ask(&format!("Remove '{text}' from the list?"))?;
    let intent = if confirmed {
        Intent::DeleteConfirm
    } else {
        Intent::DeleteCancel
    };
    match dispatcher.dispatch(store, intent)? {
        Outcome::Deleted(id) => writeln!(out, "removed #{id}: {text}")?,
        _ => writeln!(out, "kept '{text}'")?,
    }
    ensure_saved(store)
}

pub fn move_item<B: Backend>(
    store: &mut ListStore<B>,
    args: MoveArgs,
    out: &mut impl Write,
) -> Result<()> {
    if args.from == 0 || args.to == 0 {
        bail!("positions start at 1");
    }
    let (from, to) = (args.from - 1, args.to - 1);
    let text = store.display_item(from).map(|item| item.text.clone());
    let mut dispatcher = ActionDispatcher::new();
    match dispatcher.dispatch(store, Intent::Reorder { from, to })? {
        Outcome::Moved { .. } => writeln!(
            out,
            "moved '{}' from {} to {}",
            text.unwrap_or_default(),
            args.from,
            args.to
        )?,
        _ => writeln!(out, "nothing to move")?,
    }
    ensure_saved(store)
}

pub fn clear_items<B: Backend>(
    store: &mut ListStore<B>,
    args: ClearArgs,
    out: &mut impl Write,
    ask: impl FnOnce(&str) -> Result<bool>,
) -> Result<()> {
    if store.is_empty() {
        writeln!(out, "the list is already empty")?;
        return Ok(());
    }
    let mut dispatcher = ActionDispatcher::new();
    let count = match dispatcher.dispatch(store, Intent::ClearRequest)? {
        Outcome::ClearPending { count } => count,
        _ => store.len(),
    };
    let confirmed = args.yes
        || ask(&format!(
            "Are you sure you want to clear the list? {count} item(s) will be removed."
        ))?;
    let intent = if confirmed {
        Intent::ClearConfirm
    } else {
        Intent::ClearCancel
    };
    match dispatcher.dispatch(store, intent)? {
        Outcome::Cleared { count } => writeln!(out, "cleared {count} item(s)")?,
        _ => writeln!(out, "the list was left as it is")?,
    }
    ensure_saved(store)
}

/// A command is only done once storage holds what memory holds.
fn ensure_saved<B: Backend>(store: &ListStore<B>) -> Result<()> {
    if let SyncState::Diverged { message, .. } = store.sync_state() {
        bail!("the change could not be saved: {message}");
    }
    Ok(())
}

pub fn handle_offline_command(config: &AppConfig, args: OfflineArgs) -> Result<()> {
    let options = config.offline.clone();
    let storage = SqliteCacheStorage::open_at(&options.cache_path)?;
    let mut stdout = io::stdout().lock();
    match args.command {
        OfflineCommand::Fetch(fetch) if fetch.offline => {
            let mut worker = OfflineWorker::new(options, storage, OfflineFetcher);
            fetch_url(&mut worker, fetch, &mut stdout)
        }
        command => {
            let fetcher = AssetDirFetcher::new(&options.asset_dir, options.origin.clone());
            let mut worker = OfflineWorker::new(options, storage, fetcher);
            match command {
                OfflineCommand::Sync => sync_cache(&mut worker, &mut stdout),
                OfflineCommand::Status => cache_status(&mut worker, &mut stdout),
                OfflineCommand::Fetch(fetch) => fetch_url(&mut worker, fetch, &mut stdout),
            }
        }
    }
}

pub fn sync_cache<C: CacheStorage, F: Fetcher>(
    worker: &mut OfflineWorker<C, F>,
    out: &mut impl Write,
) -> Result<()> {
    let count = worker.install().context("installing offline cache")?;
    writeln!(out, "cached {count} asset(s) in {}", worker.static_cache())?;
    let removed = worker.activate().context("activating offline cache")?;
    if removed.is_empty() {
        writeln!(out, "no stale caches")?;
    } else {
        writeln!(out, "removed stale caches: {}", removed.join(", "))?;
    }
    Ok(())
}

pub fn cache_status<C: CacheStorage, F: Fetcher>(
    worker: &mut OfflineWorker<C, F>,
    out: &mut impl Write,
) -> Result<()> {
    worker.resume()?;
    writeln!(out, "worker: {}", worker.state())?;
    let names = worker.storage().keys()?;
    if names.is_empty() {
        writeln!(out, "no caches; run `grocery offline sync`")?;
    }
    let (prefix, version) = worker.cache_identity();
    for name in names {
        let entries = worker.storage().entries(&name)?.len();
        let stale = if is_stale(&name, prefix, version) {
            " (stale)"
        } else {
            ""
        };
        writeln!(out, "{name}: {entries} entr{}{stale}", if entries == 1 { "y" } else { "ies" })?;
    }
    Ok(())
}

pub fn fetch_url<C: CacheStorage, F: Fetcher>(
    worker: &mut OfflineWorker<C, F>,
    args: FetchArgs,
    out: &mut impl Write,
) -> Result<()> {
    worker.resume()?;
    let request = if args.navigate {
        Request::navigate(args.url)
    } else {
        let destination = args
            .destination
            .unwrap_or_else(|| Destination::guess(&args.url));
        Request::new(args.url).with_destination(destination)
    };

    let response = match worker.handle_fetch(&request) {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough => {
            writeln!(out, "bypassing offline cache")?;
            worker.fetcher().fetch(&request)?
        }
        FetchOutcome::Failed { reason } => bail!("fetching {} failed: {reason}", request.url),
    };
    let stored = worker.drain_background();

    writeln!(
        out,
        "{} {} ({} bytes)",
        response.status,
        response.content_type.as_deref().unwrap_or("-"),
        response.body.len()
    )?;
    if stored > 0 {
        writeln!(out, "stored in {}", worker.dynamic_cache())?;
    }
    if args.body {
        writeln!(out, "{}", String::from_utf8_lossy(&response.body))?;
    }
    Ok(())
}

/// Asks a yes/no question on the terminal. Anything but `y`/`yes` is a no.
pub fn ask_yes_no(question: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        bail!("refusing to continue without confirmation; pass --yes");
    }
    let answer = prompt(&format!("{question} [y/N]"))?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label} ")?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}
