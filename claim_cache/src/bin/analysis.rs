use std::path::{Path, PathBuf};
use std::sync::Arc;

use cache_logging::{init_logging, LoggingConfig, LoggingMode};
use cache_types::{ChunkId, ChunkIdFactory, FileId, MeshChunkId, MeshChunkIdFactory};
use clap::Parser;
use claim_cache::{CacheError, EntrySnapshot, FileCacheManager, FileIdFactory, FileStorage, LruCachePolicy};
use serde::Serialize;
use utils::ByteSize;

#[derive(Debug, Parser)]
struct CacheAnalysisArgs {
    #[clap(long, short, default_value = "./cache")]
    root: PathBuf,

    /// Print a JSON report instead of a listing.
    #[clap(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    chunks: Vec<EntrySnapshot<ChunkId>>,
    meshes: Vec<EntrySnapshot<MeshChunkId>>,
    total_bytes: i64,
}

/// Usage: ./cache_analysis --root "path to cache root"
/// prints out the state of the cache
fn main() {
    let args = CacheAnalysisArgs::parse();
    init_logging(LoggingConfig::from_env("cache_analysis", LoggingMode::Console));

    if let Err(e) = print_main(&args) {
        eprintln!("Failed to analyze {:?}: {e}", args.root);
        std::process::exit(1);
    }
}

fn print_main(args: &CacheAnalysisArgs) -> Result<(), CacheError> {
    let chunks = scan(&args.root, &ChunkIdFactory)?;
    let meshes = scan(&args.root, &MeshChunkIdFactory)?;
    let total_bytes = chunks.iter().map(|e| e.size).sum::<i64>() + meshes.iter().map(|e| e.size).sum::<i64>();
    let report = Report {
        chunks,
        meshes,
        total_bytes,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report).map_err(CacheError::parse)?);
        return Ok(());
    }

    println!("cache root: {}", args.root.display());
    print_entries("chunks", &report.chunks);
    print_entries("meshes", &report.meshes);
    println!("total: {}", ByteSize::new(report.total_bytes.max(0) as u64));
    Ok(())
}

/// Indexes `root` for one key type with a budget large enough that nothing is evicted.
fn scan<K: FileId>(root: &Path, factory: &dyn FileIdFactory<K>) -> Result<Vec<EntrySnapshot<K>>, CacheError> {
    let manager = FileCacheManager::new(FileStorage::new(root), Arc::new(LruCachePolicy::new(i64::MAX)));
    manager.index(factory)?;
    let mut entries = manager.snapshot();
    entries.sort_by_key(|e| e.key.gen_path());
    Ok(entries)
}

fn print_entries<K: FileId>(title: &str, entries: &[EntrySnapshot<K>]) {
    let bytes: i64 = entries.iter().map(|e| e.size).sum();
    println!("{title}: {} entries, {}", entries.len(), ByteSize::new(bytes.max(0) as u64));
    for entry in entries {
        println!("  {:>10}  {}", entry.size, entry.key.gen_path());
    }
}
