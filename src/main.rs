use clap::{Arg, ArgGroup, Command};
use log::LevelFilter;
use spoof_detector::dns::{StaticResolver, SystemResolver, TxtResolver};
use spoof_detector::{parse_email, AnalysisError, DetectorConfig, SpoofDetector};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct RunOptions {
    verbose: bool,
    json: bool,
}

#[tokio::main]
async fn main() {
    let matches = Command::new("spoof-detector")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Score email messages for sender spoofing using header heuristics and SPF/DKIM/DMARC")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .help("Path to a single email file to analyze"),
        )
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_name("DIR")
                .help("Path to a directory of email files to analyze"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write the default detector configuration and exit"),
        )
        .group(
            ArgGroup::new("input")
                .args(["file", "dir", "generate-config"])
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Detector configuration file (YAML)"),
        )
        .arg(
            Arg::new("dns-fixture")
                .long("dns-fixture")
                .value_name("FILE")
                .help("Answer TXT lookups from a YAML fixture instead of live DNS"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print one JSON verdict per analyzed file")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging and report legitimate messages too")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        generate_default_config(path);
        return;
    }

    let config = match matches.get_one::<String>("config") {
        Some(path) => match DetectorConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading configuration: {e}");
                process::exit(1);
            }
        },
        None => DetectorConfig::default(),
    };

    let resolver: Arc<dyn TxtResolver> = match matches.get_one::<String>("dns-fixture") {
        Some(path) => match StaticResolver::load_from_file(path) {
            Ok(resolver) => Arc::new(resolver),
            Err(e) => {
                eprintln!("Error loading DNS fixture {path}: {e}");
                process::exit(1);
            }
        },
        None => Arc::new(SystemResolver::new()),
    };

    let detector = match SpoofDetector::with_config(config, resolver) {
        Ok(detector) => detector,
        Err(e) => {
            eprintln!("Invalid detector configuration: {e}");
            process::exit(1);
        }
    };

    let files = if let Some(file) = matches.get_one::<String>("file") {
        vec![PathBuf::from(file)]
    } else if let Some(dir) = matches.get_one::<String>("dir") {
        match list_email_files(Path::new(dir)) {
            Ok(files) => files,
            Err(e) => {
                eprintln!("Error reading directory {dir}: {e}");
                process::exit(1);
            }
        }
    } else {
        Vec::new()
    };

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, cancelling analysis");
            ctrl_c_token.cancel();
        }
    });

    let options = RunOptions {
        verbose,
        json: matches.get_flag("json"),
    };
    for path in &files {
        if let Err(AnalysisError::Cancelled) =
            process_email_file(&detector, path, &options, &token).await
        {
            eprintln!("Analysis incomplete: {} (interrupted)", path.display());
            process::exit(130);
        }
    }
}

/// Regular files directly inside `dir`, sorted by name.
fn list_email_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn process_email_file(
    detector: &SpoofDetector,
    path: &Path,
    options: &RunOptions,
    token: &CancellationToken,
) -> Result<(), AnalysisError> {
    if !options.json {
        println!("Analyzing email: {}", path.display());
    }

    let raw = match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            log::error!("Error reading file {}: {e}", path.display());
            return Ok(());
        }
    };

    let email = match parse_email(&raw) {
        Ok(email) => email,
        Err(e) => {
            log::error!("Error parsing email {}: {e}", path.display());
            return Ok(());
        }
    };

    let result = detector.analyze_with_cancel(&email, token).await?;

    if options.json {
        let report = serde_json::json!({
            "file": path.display().to_string(),
            "is_spoofed": result.is_spoofed,
            "score": result.score,
            "reasons": result.reasons,
            "signals": result.signals,
        });
        println!("{report}");
        return Ok(());
    }

    if result.is_spoofed {
        println!("⚠️  SPOOFED EMAIL DETECTED: {}", path.display());
        for reason in &result.reasons {
            println!("  - {reason}");
        }
    } else if options.verbose {
        println!("✓ Email appears legitimate: {}", path.display());
    }
    println!();
    Ok(())
}

fn generate_default_config(path: &str) {
    let yaml = match DetectorConfig::default().to_yaml() {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("Error serializing default configuration: {e}");
            process::exit(1);
        }
    };
    match std::fs::write(path, yaml) {
        Ok(()) => println!("Default configuration written to: {path}"),
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}
