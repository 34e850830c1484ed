use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use sidestream::{RealtimeClient, Session, Settings, Storage, Tab};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Settings file, defaults to <config dir>/sidestream/storage.json
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Realtime search host
    #[arg(long, global = true, default_value = sidestream::DEFAULT_BASE_URL)]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current trend ranking
    Trends,

    /// Follow a keyword, printing each new post
    Search {
        keyword: String,

        #[arg(long, value_enum, default_value_t = Tab::All)]
        tab: Tab,

        /// Print the first page and exit
        #[arg(long)]
        once: bool,

        /// Refresh period in milliseconds, saved to settings
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Older pages to load after the first one
        #[arg(long, default_value_t = 0)]
        pages: u32,
    },

    /// Edit NG rules
    #[command(subcommand)]
    Ng(NgCommand),

    /// Print every stored setting as JSON
    Export,

    /// Load settings from a file written by `export`
    Import { file: PathBuf },
}

#[derive(Subcommand)]
enum NgCommand {
    /// Hide posts by an author handle
    AddUser {
        text: String,
        #[arg(long)]
        regex: bool,
    },
    /// Hide posts containing a word
    AddWord {
        text: String,
        #[arg(long)]
        regex: bool,
    },
}

enum Printed {
    Ok,
    Closed,
}

fn print_json<T: Serialize>(value: &T) -> Result<Printed, ExitCode> {
    let line = match serde_json::to_string(value) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "unable to encode output");
            return Err(ExitCode::FAILURE);
        }
    };
    match writeln!(std::io::stdout(), "{}", line) {
        Ok(()) => Ok(Printed::Ok),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(Printed::Closed),
        Err(e) => {
            error!(error = %e, "unable to write output");
            Err(ExitCode::FAILURE)
        }
    }
}

fn default_store() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sidestream")
        .join("storage.json")
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sidestream=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

async fn run(args: Args) -> Result<(), ExitCode> {
    let path = args.store.unwrap_or_else(default_store);
    let mut storage = Storage::open(&path).map_err(|e| {
        error!(path = %path.display(), error = %e, "unable to open settings");
        ExitCode::FAILURE
    })?;

    match args.command {
        Command::Export => {
            let document = storage.export().map_err(|e| {
                error!(error = %e, "export failed");
                ExitCode::FAILURE
            })?;
            println!("{}", document);
            Ok(())
        }
        Command::Import { file } => {
            let document = std::fs::read_to_string(&file).map_err(|e| {
                error!(file = %file.display(), error = %e, "unable to read import file");
                ExitCode::FAILURE
            })?;
            storage.import(&document).map_err(|e| {
                error!(error = %e, "import failed");
                ExitCode::FAILURE
            })?;
            Ok(())
        }
        Command::Ng(command) => {
            let mut settings = Settings::load(&storage);
            let added = match command {
                NgCommand::AddUser { text, regex: true } => settings.ng.add_user_pattern(&text),
                NgCommand::AddUser { text, regex: false } => settings.ng.add_user(&text),
                NgCommand::AddWord { text, regex } => settings.ng.add_word(&text, regex),
            };
            if added {
                settings.save(&mut storage).map_err(|e| {
                    error!(error = %e, "unable to save settings");
                    ExitCode::FAILURE
                })?;
            }
            print_json(&settings.ng)?;
            Ok(())
        }
        Command::Trends => {
            let session = session(storage, args.base_url)?;
            session.load_trends().await;
            for item in session.snapshot().trends.items {
                if let Printed::Closed = print_json(&item)? {
                    break;
                }
            }
            Ok(())
        }
        Command::Search {
            keyword,
            tab,
            once,
            interval_ms,
            pages,
        } => {
            let session = session(storage, args.base_url)?;
            if let Some(interval_ms) = interval_ms {
                session.update_settings(|s| s.search_interval_ms = interval_ms);
            }
            session.set_tab(tab);
            session.search(&keyword).await;
            for _ in 0..pages {
                if session.load_more().await == 0 && !session.snapshot().has_more {
                    break;
                }
            }

            let mut seen = HashSet::new();
            if let Printed::Closed = print_new(&session.snapshot().posts, &mut seen)? {
                return Ok(());
            }
            if once {
                return Ok(());
            }

            let updates = session.updates();
            futures_util::pin_mut!(updates);
            while let Some(snapshot) = updates.next().await {
                if let Printed::Closed = print_new(&snapshot.posts, &mut seen)? {
                    break;
                }
            }
            Ok(())
        }
    }
}

fn session(storage: Storage, base_url: String) -> Result<Session, ExitCode> {
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| {
            error!(error = %e, "unable to build HTTP client");
            ExitCode::FAILURE
        })?;
    let source = RealtimeClient::builder()
        .client(client)
        .base_url(base_url)
        .build();
    Ok(Session::new(Arc::new(source), storage))
}

/// Prints posts not printed before, oldest first.
fn print_new(
    posts: &[sidestream::Post],
    seen: &mut HashSet<String>,
) -> Result<Printed, ExitCode> {
    for post in posts.iter().rev() {
        if seen.insert(post.id.clone()) {
            if let Printed::Closed = print_json(post)? {
                return Ok(Printed::Closed);
            }
        }
    }
    Ok(Printed::Ok)
}
