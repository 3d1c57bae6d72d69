//! FileCrypt CLI - file encryption service and batch tool

use clap::Parser;
use filecrypt::api::{ApiServer, AppState};
use filecrypt::config::{BatchArgs, CliArgs, Commands, ServeArgs, ServiceConfig, StorageLayout};
use filecrypt::core::{
    AlgorithmDispatcher, BatchJob, BatchProcessor, CipherPool, CipherSuite, Direction,
};
use filecrypt::crypto::{generate_key, Algorithm, EnvelopePadding, KeyStore};
use filecrypt::error::{FileCryptError, Result};
use filecrypt::progress::ProgressReporter;
use filecrypt::staging::{SessionReaper, SessionRegistry};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    init_logging(&args);

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: CliArgs) -> Result<()> {
    let layout = StorageLayout::resolve(args.base_path.as_deref())?;
    tracing::debug!("Storage root: {}", layout.root().display());

    match &args.command {
        Commands::Serve(serve) => cmd_serve(&layout, serve),
        Commands::Encrypt { batch } => cmd_batch(&layout, batch, Direction::Encrypt, false, args.quiet),
        Commands::Decrypt {
            batch,
            legacy_zero_padding,
        } => cmd_batch(&layout, batch, Direction::Decrypt, *legacy_zero_padding, args.quiet),
        Commands::Keygen { force } => cmd_keygen(&layout, *force),
        Commands::WrapKey { password } => {
            let path = KeyStore::new(layout.keys()).wrap_stored_key(password)?;
            println!("Wrapped private key written to {}", path.display());
            Ok(())
        }
        Commands::UnwrapKey { password } => {
            let path = KeyStore::new(layout.keys()).unwrap_stored_key(password)?;
            println!("Private key restored to {}", path.display());
            Ok(())
        }
        Commands::GenerateKey { length, algorithm } => {
            let key = generate_key(*length)?;
            let out = serde_json::json!({ "key": key, "algorithm": algorithm });
            println!("{}", out);
            Ok(())
        }
    }
}

fn padding(legacy_zero_padding: bool) -> EnvelopePadding {
    if legacy_zero_padding {
        EnvelopePadding::LegacyZeroFill
    } else {
        EnvelopePadding::Pkcs7
    }
}

fn cmd_serve(layout: &StorageLayout, args: &ServeArgs) -> Result<()> {
    let config = ServiceConfig::from_args(args)?;
    let keys = KeyStore::new(layout.keys());

    if config.init_keys {
        if keys.ensure_key_pair()? {
            println!("Generated RSA key pair in {}", keys.dir().display());
        }
    } else if !keys.has_key_pair() {
        tracing::warn!(
            "No RSA key pair in {:?}; rsa requests will fail until `filecrypt keygen` runs",
            keys.dir()
        );
    }

    let registry = Arc::new(SessionRegistry::new(&config.staging_dir, config.session_ttl)?);
    let purged = registry.purge_orphans()?;
    if purged > 0 {
        tracing::info!("Removed {} stale staging directories", purged);
    }
    let _reaper = SessionReaper::spawn(Arc::clone(&registry), config.reap_interval)?;

    let workers = config.worker_count();
    let pool = CipherPool::new(workers, config.queue_depth)?;
    let suite = Arc::new(CipherSuite::new(keys, padding(config.legacy_zero_padding)));
    let dispatcher =
        AlgorithmDispatcher::new(suite, Arc::clone(&registry), pool, config.dispatch_limits());

    println!("=== FileCrypt API Server ===");
    println!("Storage root:  {}", layout.root().display());
    println!("Staging dir:   {}", config.staging_dir.display());
    println!("Workers:       {}", workers);
    println!(
        "Max input:     {}",
        humansize::format_size(config.max_input_size, humansize::BINARY)
    );
    println!("Session TTL:   {}", humantime::format_duration(config.session_ttl));
    println!();

    let server = ApiServer::new(config, AppState::new(dispatcher));
    let result = server.run();

    let disposed = registry.dispose_all();
    tracing::info!("Disposed {} staging sessions on shutdown", disposed);
    result
}

fn cmd_batch(
    layout: &StorageLayout,
    args: &BatchArgs,
    direction: Direction,
    legacy_zero_padding: bool,
    quiet: bool,
) -> Result<()> {
    let algorithm: Algorithm = args.algorithm.parse()?;
    let key = match (&args.key, algorithm.uses_passphrase()) {
        (Some(key), _) => key.clone(),
        (None, false) => String::new(),
        (None, true) => {
            return Err(FileCryptError::invalid(format!(
                "{} needs a passphrase (--key or ENCRYPTION_KEY)",
                algorithm
            )))
        }
    };

    let (default_input, default_output) = match direction {
        Direction::Encrypt => (layout.originals(algorithm), layout.encrypted(algorithm)),
        Direction::Decrypt => (layout.encrypted(algorithm), layout.decrypted(algorithm)),
    };
    let job = BatchJob {
        direction,
        algorithm,
        input_dir: args.input.clone().unwrap_or(default_input),
        output_dir: args.output.clone().unwrap_or(default_output),
        key,
    };

    let suite = CipherSuite::new(KeyStore::new(layout.keys()), padding(legacy_zero_padding));
    let progress = if quiet {
        ProgressReporter::disabled()
    } else {
        ProgressReporter::new()
    };
    let report = BatchProcessor::new(&suite, args.threads)
        .with_progress(progress)
        .run(&job)?;

    if !quiet {
        report.print_summary(&job);
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_keygen(layout: &StorageLayout, force: bool) -> Result<()> {
    let keys = KeyStore::new(layout.keys());
    println!("Generating 2048-bit RSA key pair...");
    keys.generate(force)?;
    println!("Private key: {}", keys.private_key_path().display());
    println!("Public key:  {}", keys.public_key_path().display());
    Ok(())
}
