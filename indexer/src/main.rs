use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leadsearch_core::cache::CacheStore;
use leadsearch_core::config::Settings;
use leadsearch_core::indexer::LeadIndexer;
use leadsearch_core::persist::SledLeadStore;
use leadsearch_core::service::LeadService;
use leadsearch_core::store::LeadStore;
use leadsearch_core::{LeadId, NewLead};
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Import scraped leads and maintain the lead search index", long_about = None)]
struct Cli {
    /// Lead database directory (overrides LEADS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Redis URL (overrides REDIS_URL)
    #[arg(long, global = true)]
    redis_url: Option<String>,
    /// Run without the cache store
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store and index scraped leads from JSON/JSONL files or a directory
    Import {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
    },
    /// Index pending leads, or only the given ids
    Bulk {
        #[arg(long)]
        batch_size: Option<usize>,
        /// Lead ids to (re)index; all pending leads when omitted
        #[arg(long = "id")]
        ids: Vec<LeadId>,
    },
    /// Drop the index and rebuild it from every stored lead
    Reindex,
    /// Print indexing coverage and cache health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Some(url) = cli.redis_url {
        settings.cache.url = url;
    }
    if cli.no_cache {
        settings.cache.enabled = false;
    }

    let sled = Arc::new(SledLeadStore::open(&settings.db_path)?);
    let store: Arc<dyn LeadStore> = sled.clone();
    let cache = CacheStore::connect(&settings.cache).await;
    let indexer = LeadIndexer::from_settings(store.clone(), cache.clone(), &settings);

    let output = match cli.command {
        Commands::Import { input } => {
            let leads = read_leads(Path::new(&input))?;
            tracing::info!(rows = leads.len(), input, "read scraped leads");
            let service = LeadService::new(store, cache, indexer);
            serde_json::to_value(service.ingest_scraped(leads).await?)?
        }
        Commands::Bulk { batch_size, ids } => {
            let batch_size = batch_size.unwrap_or(settings.indexing_batch_size);
            let stats = if ids.is_empty() {
                indexer.bulk_index_leads(batch_size).await
            } else {
                indexer.index_leads(&ids, batch_size).await
            };
            serde_json::to_value(stats)?
        }
        Commands::Reindex => serde_json::to_value(indexer.reindex_all_leads().await?)?,
        Commands::Status => serde_json::to_value(indexer.get_indexing_status().await?)?,
    };
    sled.flush()?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_leads(input_path: &Path) -> Result<Vec<NewLead>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
        files.sort();
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    } else {
        anyhow::bail!("input not found: {}", input_path.display());
    }

    let mut leads = Vec::new();
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file, &mut leads)?;
        } else {
            read_json(&file, &mut leads)?;
        }
    }
    Ok(leads)
}

fn read_jsonl(file: &Path, leads: &mut Vec<NewLead>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let lead: NewLead = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), n + 1))?;
        leads.push(lead);
    }
    Ok(())
}

fn read_json(file: &Path, leads: &mut Vec<NewLead>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let json: Value = serde_json::from_reader(reader)?;
    match json {
        Value::Array(arr) => {
            for v in arr {
                leads.push(serde_json::from_value(v).with_context(|| file.display().to_string())?);
            }
        }
        Value::Object(_) => {
            leads.push(serde_json::from_value(json).with_context(|| file.display().to_string())?);
        }
        _ => tracing::warn!(file = %file.display(), "skipping file without lead objects"),
    }
    Ok(())
}
