use clap::Parser;
use graphcache_core::{Cache, CacheConfig, Transport, Variables};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// CLI arguments. See <https://docs.rs/clap/latest/clap/_derive/index.html>
#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Normalizes a response into a fresh cache, then reads the same
    /// document back and prints the materialized result.
    Read {
        /// Path to the GraphQL document, or `-` for stdin.
        document: PathBuf,
        /// Path to a JSON object of operation variables.
        #[arg(long)]
        variables: Option<PathBuf>,
        /// Path to the JSON response data to normalize.
        #[arg(long)]
        data: PathBuf,
    },
    /// Normalizes a response into a fresh cache and prints the resulting
    /// dehydrated snapshot.
    Snapshot {
        document: PathBuf,
        #[arg(long)]
        variables: Option<PathBuf>,
        #[arg(long)]
        data: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    match args.command {
        Command::Read { document, variables, data } => read(document, variables, data),
        Command::Snapshot { document, variables, data } => snapshot(document, variables, data),
    }
}

fn read(document: PathBuf, variables: Option<PathBuf>, data: PathBuf) {
    let (cache, document, vars) = seeded_cache(document, variables, data);
    let outcome = cache.read_query(&document, None, &vars).unwrap();
    let data = outcome.data.unwrap_or(serde_json_bytes::Value::Null);
    println!("{}", serde_json::to_string_pretty(&data).unwrap());
}

fn snapshot(document: PathBuf, variables: Option<PathBuf>, data: PathBuf) {
    let (cache, _document, _vars) = seeded_cache(document, variables, data);
    let snapshot = cache.dehydrate();
    println!("{}", serde_json::to_string_pretty(&snapshot).unwrap());
}

fn seeded_cache(document: PathBuf, variables: Option<PathBuf>, data: PathBuf) -> (Cache, String, Variables) {
    let document = read_input(&document);
    let vars: Variables = match variables {
        Some(path) => serde_json::from_str(&read_input(&path)).unwrap(),
        None => Variables::new(),
    };
    let data: serde_json_bytes::Value = serde_json::from_str(&read_input(&data)).unwrap();

    let cache = Cache::new(CacheConfig::new(Arc::new(NoopTransport)));
    cache.write_query(&document, None, &vars, &data).unwrap();
    (cache, document, vars)
}

fn read_input(path: &Path) -> String {
    if path == Path::new("-") {
        io::read_to_string(io::stdin()).unwrap()
    } else {
        fs::read_to_string(path).unwrap()
    }
}

/// The `read`/`snapshot` subcommands never execute a network operation, so
/// the transport is never actually called.
struct NoopTransport;

#[async_trait::async_trait]
impl Transport for NoopTransport {
    async fn http(&self, _context: graphcache_core::RequestContext) -> graphcache_core::TransportResponse {
        unreachable!("the CLI only writes/reads locally; it never executes a network operation")
    }
}
