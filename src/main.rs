use clap::{Parser, Subcommand, ValueEnum};
use playground_gallery::blob::BlobStore;
use playground_gallery::config::{self, GalleryConfig};
use playground_gallery::document::Document;
use playground_gallery::mail::dispatcher::MailDispatcher;
use playground_gallery::mail::smtp::SmtpTransport;
use playground_gallery::publish::PublishStore;
use playground_gallery::service::{GalleryQuery, GalleryService, TokenRequest};
use playground_gallery::token::TokenMinter;
use playground_gallery::types::SortKey;
use playground_gallery::{output, schema, screenshot};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "playground-gallery")]
#[command(about = "Storage and publishing backend for the WebGL playground gallery")]
#[command(long_about = "\
Storage and publishing backend for the WebGL playground gallery

Documents and screenshots live in content-addressed blob stores; gallery
entries, publish tokens and view counts live in a SQLite database. Everything
is kept under the configured data root:

  data/
  ├── gallery.db                   # Gallery rows and view deduplication
  ├── documents/                   # Document JSON, sharded by digest prefix
  │   └── q3/Zk9a0PbX
  └── screenshots/                 # PNG screenshots, same layout
      └── 7h/YtR2mWcQ

Run 'playground-gallery gen-config' to generate a documented gallery.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (stock defaults apply when it does not exist)
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Documents,
    Screenshots,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Newest,
    Views,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Newest => SortKey::Newest,
            SortArg::Views => SortKey::Views,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the database schema
    Migrate,
    /// Print a stock gallery.toml with all options documented
    GenConfig,
    /// List published gallery entries
    List {
        /// Zero-based page number
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Entries per page (defaults to gallery.default_limit)
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, value_enum, default_value = "newest")]
        sort: SortArg,
        /// Oldest or least viewed first
        #[arg(long)]
        reverse: bool,
    },
    /// Show every version published under one lineage
    Lineage {
        /// Id of the lineage root
        id: i64,
    },
    /// Store a file in a blob store and print its digest
    PutBlob {
        #[arg(value_enum)]
        store: StoreArg,
        file: PathBuf,
    },
    /// Write a stored blob to stdout
    GetBlob {
        #[arg(value_enum)]
        store: StoreArg,
        digest: String,
    },
    /// Reserve a publish token and e-mail it
    RequestToken {
        #[arg(long)]
        email: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        author: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        // needs no config, so a broken gallery.toml can still be regenerated
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(())
        }
        command => run(command, &config::load_config(&cli.config)?),
    }
}

fn run(command: Command, config: &GalleryConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::GenConfig => print!("{}", config::stock_config_toml()),
        Command::Migrate => {
            let db_path = config.database_path();
            if let Some(dir) = db_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut conn = rusqlite::Connection::open(&db_path)?;
            let found = schema::migrate(&mut conn)?;
            if found == schema::SCHEMA_VERSION {
                println!("Schema is current (version {})", found);
            } else {
                println!(
                    "Migrated schema from version {} to {}",
                    found,
                    schema::SCHEMA_VERSION
                );
            }
        }
        Command::List {
            page,
            limit,
            sort,
            reverse,
        } => {
            let store = open_store(config)?;
            let query = GalleryQuery {
                page,
                limit,
                sort: sort.into(),
                reversed: reverse,
            };
            let entries = store.gallery(
                query.page,
                query.effective_limit(&config.gallery),
                query.sort,
                query.reversed,
            )?;
            output::print_gallery(&entries, query.page, query.sort, query.reversed);
        }
        Command::Lineage { id } => {
            let store = open_store(config)?;
            let entries = store.lineage(id)?;
            output::print_lineage(id, &entries);
        }
        Command::PutBlob { store, file } => {
            let data = std::fs::read(&file)?;
            let blobs = open_blobs(config, store)?;
            match store {
                StoreArg::Documents => {
                    let document: Document = serde_json::from_slice(&data)?;
                    document.validate()?;
                }
                StoreArg::Screenshots => {
                    screenshot::validate_png(&data)?;
                }
            }
            let digest = blobs.store(&data)?;
            println!("{}", digest);
        }
        Command::GetBlob { store, digest } => {
            let blobs = open_blobs(config, store)?;
            let data = blobs.retrieve(&digest)?;
            std::io::stdout().write_all(&data)?;
        }
        Command::RequestToken {
            email,
            title,
            author,
        } => {
            let dispatcher = MailDispatcher::spawn(
                SmtpTransport::from_config(&config.mail),
                config.mail.batch_policy(),
                config.mail.queue_capacity,
            )?;
            let service = GalleryService::open(config, dispatcher.mailer())?;
            let result = service.request_token(&TokenRequest {
                email: email.clone(),
                title,
                author,
            });
            // the dispatcher only exits once every mailer handle is gone
            drop(service);
            dispatcher.shutdown()?;
            let token = result?;
            println!("Reserved token {} and queued e-mail to {}", token, email);
        }
    }

    Ok(())
}

fn open_blobs(
    config: &GalleryConfig,
    store: StoreArg,
) -> Result<BlobStore, playground_gallery::blob::BlobError> {
    match store {
        StoreArg::Documents => BlobStore::open(config.documents_dir()),
        StoreArg::Screenshots => BlobStore::open(config.screenshots_dir()),
    }
}

fn open_store(config: &GalleryConfig) -> Result<PublishStore, Box<dyn std::error::Error>> {
    let screenshots = BlobStore::open(config.screenshots_dir())?;
    let minter = TokenMinter::new(config.tokens.initial_length, config.tokens.collision_limit);
    Ok(PublishStore::open(
        &config.database_path(),
        screenshots,
        minter,
    )?)
}
