//! Ferropak CLI - Command-line tool for pak containers.
//!
//! This is the main entry point for the ferropak command-line application.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glob::{MatchOptions, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use ferropak::pak::PakVersion;
use ferropak::prelude::*;

/// Ferropak - pak container tool
#[derive(Parser)]
#[command(name = "ferropak")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// AES-256 key (64 hex digits) tried for every encrypted container
    #[arg(long, global = true, env = "PAK_AES_KEY")]
    aes_key: Option<String>,

    /// JSON file mapping key GUIDs to AES keys
    #[arg(long, global = true)]
    keys: Option<PathBuf>,

    /// Game tag selecting format quirks (ue4, ue5, dreamstar, deltaforce, rennsport, divisionresurgence)
    #[arg(long, global = true, env = "PAK_GAME", default_value = "ue4")]
    game: String,

    /// Compare paths case-sensitively
    #[arg(long, global = true)]
    case_sensitive: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List files provided by one or more containers
    List {
        /// Container files or directories holding them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Filter pattern (glob-style)
        #[arg(short, long)]
        filter: Option<String>,

        /// Show detailed information
        #[arg(short, long)]
        detailed: bool,
    },

    /// Extract files from one or more containers
    Extract {
        /// Container files or directories holding them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, env = "OUTPUT_FOLDER")]
        output: PathBuf,

        /// Filter pattern (glob-style)
        #[arg(short, long)]
        filter: Option<String>,

        /// Stop at the first failed file
        #[arg(long)]
        fail_fast: bool,
    },

    /// Build a container from a directory tree
    Pack {
        /// Directory whose files are packed, relative paths kept
        #[arg(short, long)]
        input: PathBuf,

        /// Output container
        #[arg(short, long)]
        output: PathBuf,

        /// Prefix prepended to every packed path
        #[arg(long, default_value = "")]
        prefix: String,

        /// Container version (1-9)
        #[arg(long, default_value_t = 8)]
        pak_version: i32,

        /// Compression method (none, zlib, gzip, zstd, lz4)
        #[arg(short, long, default_value = "zlib")]
        compression: String,

        /// Encrypt index and payloads with --aes-key
        #[arg(long)]
        encrypt: bool,

        /// Key GUID recorded in the footer
        #[arg(long)]
        key_guid: Option<String>,
    },

    /// Show footer details of a container
    Info {
        /// Container file
        input: PathBuf,
    },
}

/// Key file: either `{ "<guid>": "<hex key>" }` or a list of objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeyFile {
    Map(HashMap<String, String>),
    List(Vec<KeyFileEntry>),
}

#[derive(Deserialize)]
struct KeyFileEntry {
    guid: String,
    key: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let game: Game = cli.game.parse().context("Invalid --game")?;
    let config = ProviderConfig {
        case_insensitive: !cli.case_sensitive,
        versions: ArchiveVersions::new(game),
        ..ProviderConfig::default()
    };

    match &cli.command {
        Commands::List { inputs, filter, detailed } => {
            let provider = open_provider(&cli, config, inputs)?;
            cmd_list(&provider, filter.as_deref(), *detailed)?;
        }
        Commands::Extract {
            inputs,
            output,
            filter,
            fail_fast,
        } => {
            let provider = open_provider(&cli, config, inputs)?;
            cmd_extract(&provider, output, filter.as_deref(), *fail_fast)?;
        }
        Commands::Pack {
            input,
            output,
            prefix,
            pak_version,
            compression,
            encrypt,
            key_guid,
        } => {
            let key = if *encrypt {
                let text = cli.aes_key.as_deref().context("--encrypt needs --aes-key")?;
                Some(text.parse::<AesKey>().context("Invalid --aes-key")?)
            } else {
                None
            };
            let key_guid = match key_guid {
                Some(text) => text.parse::<Guid>().context("Invalid --key-guid")?,
                None => Guid::EMPTY,
            };
            let options = WriterOptions {
                version: PakVersion(*pak_version),
                encrypt_index: *encrypt,
                encrypt_entries: *encrypt,
                key,
                key_guid,
                ..WriterOptions::default()
            };
            let method = CompressionMethod::from_name(compression);
            cmd_pack(input, output, prefix, options, method)?;
        }
        Commands::Info { input } => {
            cmd_info(&cli, config, input)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_keys(cli: &Cli) -> Result<KeyRegistry> {
    let mut keys = KeyRegistry::new();

    if let Some(path) = &cli.keys {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read key file {}", path.display()))?;
        let file: KeyFile = serde_json::from_str(&text).context("Failed to parse key file")?;
        let pairs: Vec<(String, String)> = match file {
            KeyFile::Map(map) => map.into_iter().collect(),
            KeyFile::List(list) => list.into_iter().map(|e| (e.guid, e.key)).collect(),
        };
        for (guid, key) in pairs {
            keys.insert_str(&guid, &key)
                .with_context(|| format!("Invalid key entry for {guid}"))?;
        }
    }

    Ok(keys)
}

fn open_provider(cli: &Cli, config: ProviderConfig, inputs: &[PathBuf]) -> Result<FileProvider> {
    let start = Instant::now();
    let mut provider = FileProvider::new(config);

    for input in inputs {
        if input.is_dir() {
            let count = provider
                .register_directory(input)
                .with_context(|| format!("Failed to scan {}", input.display()))?;
            info!("Found {} containers in {}", count, input.display());
        } else {
            provider
                .register_container(input)
                .with_context(|| format!("Failed to open {}", input.display()))?;
        }
    }

    let keys = load_keys(cli)?;
    let mut pairs: Vec<(Guid, AesKey)> = keys.iter().map(|(g, k)| (*g, k.clone())).collect();
    if let Some(text) = &cli.aes_key {
        let key: AesKey = text.parse().context("Invalid --aes-key")?;
        let mut guids: Vec<Guid> = provider.containers().iter().map(|c| c.key_guid()).collect();
        guids.sort_by_key(|g| g.to_string());
        guids.dedup();
        for guid in guids {
            if !keys.contains(&guid) {
                pairs.push((guid, key.clone()));
            }
        }
    }
    provider.submit_keys(pairs);
    provider.mount_all();

    for guid in provider.required_keys() {
        warn!("No working key for GUID {}", guid);
    }
    info!(
        "Mounted {}/{} containers with {} files in {:?}",
        provider.mounted_count(),
        provider.containers().len(),
        provider.file_count(),
        start.elapsed()
    );
    Ok(provider)
}

fn filter_pattern(filter: Option<&str>) -> Result<Option<Pattern>> {
    filter
        .map(|f| Pattern::new(f).with_context(|| format!("Invalid filter pattern \"{f}\"")))
        .transpose()
}

fn matches(pattern: Option<&Pattern>, path: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    pattern.map_or(true, |p| p.matches_with(path, options))
}

fn cmd_list(provider: &FileProvider, filter: Option<&str>, detailed: bool) -> Result<()> {
    let pattern = filter_pattern(filter)?;

    let mut entries: Vec<_> = provider
        .entries()
        .filter(|(_, e)| matches(pattern.as_ref(), &e.path))
        .collect();
    entries.sort_by(|a, b| a.1.path.cmp(&b.1.path));

    for (pak, entry) in &entries {
        if detailed {
            println!(
                "{:>12} {:>12} {:<6} {} {}  [{}]",
                entry.size,
                entry.uncompressed_size,
                entry.compression_method.to_string(),
                if entry.is_encrypted { "E" } else { " " },
                entry.path,
                pak.name()
            );
        } else {
            println!("{}", entry.path);
        }
    }

    println!("\nTotal: {} files", entries.len());

    Ok(())
}

/// Output path for an entry, with parent and root components dropped.
fn output_path(root: &Path, entry_path: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for component in Path::new(entry_path).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    path
}

fn cmd_extract(provider: &FileProvider, output: &Path, filter: Option<&str>, fail_fast: bool) -> Result<()> {
    let pattern = filter_pattern(filter)?;
    let paths: Vec<String> = provider
        .entries()
        .map(|(_, e)| e.path.clone())
        .filter(|p| matches(pattern.as_ref(), p))
        .collect();

    println!("Extracting {} files...", paths.len());

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    fs::create_dir_all(output)?;

    let start = Instant::now();
    let cancel = AtomicBool::new(false);
    let errors = AtomicUsize::new(0);
    let written = AtomicUsize::new(0);
    provider.extract_many(&paths, &cancel, |path, result| {
        pb.inc(1);
        let outcome = result.map_err(anyhow::Error::from).and_then(|data| {
            let target = output_path(output, path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, data)?;
            Ok(())
        });
        match outcome {
            Ok(()) => {
                written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                if !cancel.load(Ordering::Relaxed) {
                    pb.suspend(|| eprintln!("Error extracting {}: {:#}", path, e));
                }
                errors.fetch_add(1, Ordering::Relaxed);
                if fail_fast {
                    cancel.store(true, Ordering::Relaxed);
                }
            }
        }
    });

    pb.finish_with_message("Done");
    let errors = errors.into_inner();
    println!(
        "Extracted {} files in {:?} ({} errors)",
        written.into_inner(),
        start.elapsed(),
        errors
    );

    if fail_fast && errors > 0 {
        bail!("Extraction stopped after a failure");
    }
    Ok(())
}

fn cmd_pack(input: &Path, output: &Path, prefix: &str, options: WriterOptions, method: CompressionMethod) -> Result<()> {
    println!("Packing {} -> {}", input.display(), output.display());

    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();

    let start = Instant::now();
    let loaded: Vec<(String, Vec<u8>)> = files
        .par_iter()
        .map(|path| -> Result<(String, Vec<u8>)> {
            let relative = path.strip_prefix(input).context("File outside the input directory")?;
            let name = relative.to_string_lossy().replace('\\', "/");
            let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok((format!("{prefix}{name}"), data))
        })
        .collect::<Result<_>>()?;

    let mut writer = PakWriter::new(options);
    for (path, data) in loaded {
        writer.add(path, data, method.clone());
    }

    let footer = writer.write_to_file(output).context("Failed to write container")?;
    println!(
        "Packed {} files (version {}, {}) in {:?}",
        writer.len(),
        footer.version,
        method,
        start.elapsed()
    );

    Ok(())
}

fn cmd_info(cli: &Cli, config: ProviderConfig, input: &Path) -> Result<()> {
    let pak_config = PakConfig {
        versions: config.versions,
        case_insensitive: config.case_insensitive,
        concurrent: config.concurrent,
        codecs: config.codecs,
    };
    let mut pak = PakFile::open(input, pak_config).context("Failed to open container")?;
    let footer = pak.footer().clone();

    println!("Container:         {}", input.display());
    println!("Version:           {}", footer.version);
    println!("Key GUID:          {}", footer.key_guid);
    println!("Index encrypted:   {}", footer.index_encrypted);
    println!("Index frozen:      {}", footer.index_frozen);
    println!("Index offset:      {:#x}", footer.index_offset);
    println!("Index size:        {}", footer.index_size);
    println!("Index hash:        {}", footer.index_hash);
    let methods: Vec<String> = footer.compression_methods.iter().map(|m| m.to_string()).collect();
    println!("Methods:           {}", methods.join(", "));

    let keys = load_keys(cli)?;
    let key = match keys.get(&footer.key_guid) {
        Some(key) => Some(key.clone()),
        None => cli.aes_key.as_deref().map(str::parse::<AesKey>).transpose().context("Invalid --aes-key")?,
    };
    if footer.index_encrypted && key.is_none() {
        println!("Files:             (index encrypted, no key)");
        return Ok(());
    }

    match pak.mount(key) {
        Ok(count) => {
            println!("Mount point:       {}", pak.mount_point());
            println!("Files:             {} ({} encrypted)", count, pak.encrypted_count());
        }
        Err(e) => println!("Files:             unavailable ({e})"),
    }

    Ok(())
}
