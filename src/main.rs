//! hpd - hotplug dispatch daemon
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use hotplug_dispatch::hpd_core::DeviceId;
use hotplug_dispatch::{
    config_file_path, format_device_list, open_store, request_launch, request_set_default,
    resolve_device, run_daemon, DaemonOptions,
};

/// Run a configured command when a known USB device is plugged in
#[derive(Parser, Debug)]
#[command(name = "hpd", version)]
#[command(about = "Run a configured command when a known USB device is plugged in", long_about = None)]
struct Cli {
    /// Configuration directory (default: <config dir>/hotplug-dispatch)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Also log to stderr
    #[arg(long, global = true)]
    foreground: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch for devices and dispatch their default images (default)
    Run {
        /// Write notifications to the log instead of the desktop
        #[arg(long)]
        no_notify: bool,

        /// Treat devices already plugged in at start-up as attached
        #[arg(long)]
        scan_existing: bool,
    },

    /// List configured devices and images
    List {
        /// Print the configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the running daemon to run an image now
    Launch {
        #[arg(value_name = "DEVICE_ID")]
        device_id: String,

        #[arg(value_name = "IMAGE")]
        image: String,
    },

    /// Set a device's default image; omit IMAGE to disable auto-launch
    SetDefault {
        #[arg(value_name = "DEVICE_ID")]
        device_id: String,

        #[arg(value_name = "IMAGE")]
        image: Option<String>,
    },

    /// Print the device id a sysfs path resolves to
    Resolve {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Print the path of devices.toml
    ConfigPath,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run {
        no_notify: false,
        scan_existing: false,
    });

    match command {
        Command::Run {
            no_notify,
            scan_existing,
        } => {
            run_daemon(DaemonOptions {
                config_dir: cli.config_dir,
                foreground: cli.foreground,
                no_notify,
                scan_existing,
            })
            .await?;
        }
        Command::List { json } => {
            let store = open_store(cli.config_dir)?;
            let config = store.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&*config)?);
            } else {
                print!("{}", format_device_list(&config));
            }
        }
        Command::Launch { device_id, image } => {
            let message = request_launch(cli.config_dir, DeviceId::new(device_id), image).await?;
            println!("{}", message);
        }
        Command::SetDefault { device_id, image } => {
            let message =
                request_set_default(cli.config_dir, DeviceId::new(device_id), image).await?;
            println!("{}", message);
        }
        Command::Resolve { path } => match resolve_device(&path) {
            Some(id) => println!("{}", id),
            None => {
                eprintln!("No idVendor/idProduct found at or above {}", path.display());
                std::process::exit(1);
            }
        },
        Command::ConfigPath => {
            println!("{}", config_file_path(cli.config_dir)?.display());
        }
    }

    Ok(())
}
