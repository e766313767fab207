//! Command-line front end: resolve `stash://` URIs against a library on disk.

use clap::{Args, Parser, Subcommand};
use derive_more::{Display, Error};
use exn::ResultExt;
use http::header::IF_NONE_MATCH;
use http::{Request, Response};
use stash_catalog::MemoryCatalog;
use stash_config::Config;
use stash_router::SchemeRouter;
use stash_storage::BackendHandle;
use stash_storage::backend::LocalBackend;
use stash_transcode::{CacheKey, ImageTranscoder, TranscodeCoordinator, TransformParameters};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("failed to load configuration")]
    Config,
    #[display("invalid arguments: {_0}")]
    Arguments(#[error(not(source))] String),
    #[display("failed to read catalog {}", _0.display())]
    Catalog(#[error(not(source))] PathBuf),
    #[display("failed to open the resource library")]
    Library,
    #[display("failed to set up routing")]
    Router,
    #[display("failed to write response body")]
    Output,
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (defaults to `config.toml` in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Resource library directory, overriding the configuration
    #[arg(long, global = true)]
    library: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a URI, printing the status line and headers to stderr
    Get(GetArgs),
    /// Print the cache key for a resource and transform
    Key(KeyArgs),
}

#[derive(Debug, Args)]
struct GetArgs {
    /// e.g. `stash://app/image/123?raw=1&quality=70`
    uri: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// JSON array of resource records to seed the catalog with
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Send an `If-None-Match` header with this entity tag
    #[arg(long)]
    if_none_match: Option<String>,
}

#[derive(Debug, Args)]
struct KeyArgs {
    id: String,
    #[arg(long)]
    quality: Option<u32>,
    #[arg(long)]
    max_dimension: Option<u32>,
}

#[tokio::main]
async fn main() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli).await.map_err(|err| miette::miette!("{err:?}"))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Key(args) => {
            println!("{}", cache_key(&args)?);
            Ok(ExitCode::SUCCESS)
        },
        Command::Get(args) => {
            let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
            if let Some(library) = cli.library {
                config.library = library;
                config.validate().or_raise(|| ErrorKind::Config)?;
            }
            let response = get(&config, &args).await?;
            eprint!("{}", head(&response));
            emit(&response, args.output.as_ref()).await?;
            Ok(match response.status().is_client_error() || response.status().is_server_error() {
                true => ExitCode::FAILURE,
                false => ExitCode::SUCCESS,
            })
        },
    }
}

fn cache_key(args: &KeyArgs) -> Result<CacheKey> {
    let params = TransformParameters::new(args.quality, args.max_dimension)
        .map_err(|err| ErrorKind::Arguments((*err).to_string()))?;
    Ok(CacheKey::new(&args.id, &params))
}

async fn get(config: &Config, args: &GetArgs) -> Result<Response<Vec<u8>>> {
    let catalog = match &args.catalog {
        Some(path) => {
            let json = tokio::fs::read(path).await.or_raise(|| ErrorKind::Catalog(path.clone()))?;
            Arc::new(MemoryCatalog::from_json(&json).or_raise(|| ErrorKind::Catalog(path.clone()))?)
        },
        None => Arc::new(MemoryCatalog::default()),
    };
    let backend: BackendHandle =
        Arc::new(LocalBackend::new("library", &config.library).or_raise(|| ErrorKind::Library)?);
    let coordinator = TranscodeCoordinator::new(config.cache_dir(), Arc::new(ImageTranscoder), config.idle_teardown());
    let router = SchemeRouter::new(config, catalog.clone(), backend, coordinator).or_raise(|| ErrorKind::Router)?;

    let response = match &args.if_none_match {
        Some(etag) => {
            let request = Request::builder()
                .uri(args.uri.as_str())
                .header(IF_NONE_MATCH, etag.as_str())
                .body(())
                .map_err(|err| ErrorKind::Arguments(err.to_string()))?;
            router.route_request(&request).await
        },
        None => router.route(&args.uri).await,
    };
    if catalog.updates() > 0 {
        // The catalog only lives for this process.
        tracing::info!(updates = catalog.updates(), "Catalog records were updated in memory");
    }
    Ok(response)
}

fn head(response: &Response<Vec<u8>>) -> String {
    let mut head = format!("{:?} {}\n", response.version(), response.status());
    for (name, value) in response.headers() {
        let _ = writeln!(head, "{name}: {}", value.to_str().unwrap_or("<binary>"));
    }
    head
}

async fn emit(response: &Response<Vec<u8>>, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(path, response.body()).await.or_raise(|| ErrorKind::Output),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(response.body()).and_then(|()| stdout.flush()).or_raise(|| ErrorKind::Output)
        },
    }
}
