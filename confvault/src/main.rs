//! confvault - Entry Point
//!
//! Backs up network device configurations, classifies what changed and
//! deploys new configurations with verification and rollback.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use confvault::app::run::{run, Command};
use confvault::logs::{init_logging, LogOptions};
use confvault::storage::layout::StorageLayout;
use confvault::storage::settings::Settings;
use confvault::utils::version_info;

use tracing::{error, info};

const USAGE: &str = "usage: confvault [--base-dir=<dir>] \
    (--backup | --deploy=<device> --config=<file> | --diff=<device> | --history=<device> | --version)";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    let Some(command) = parse_command(&cli_args) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, falling back to defaults when absent
    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    info!(
        "confvault {} ({}) using {}",
        version.version,
        version.git_hash,
        layout.base_dir.display()
    );

    match run(command, &layout, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_command(cli_args: &HashMap<String, String>) -> Option<Command> {
    if cli_args.contains_key("backup") {
        return Some(Command::Backup);
    }
    if let Some(device) = cli_args.get("deploy") {
        let config = cli_args.get("config")?;
        return Some(Command::Deploy {
            device: device.clone(),
            config: PathBuf::from(config),
        });
    }
    if let Some(device) = cli_args.get("diff") {
        return Some(Command::Diff {
            device: device.clone(),
        });
    }
    cli_args.get("history").map(|device| Command::History {
        device: device.clone(),
    })
}
