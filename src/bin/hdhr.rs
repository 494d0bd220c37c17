//! Diagnostic CLI over the discovery and device-control API.

use clap::{Parser, Subcommand, ValueEnum};

use hdhomerun::{
    ControlConnection, Device, DiscoverMode, Discover, Error, GatherOptions,
};

use std::time::Duration;

#[derive(Parser)]
#[command(name = "hdhr", about = "Discover and control HDHomeRun tuners", version)]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Auto,
    Udp,
    Http,
}

impl From<Mode> for DiscoverMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => DiscoverMode::Auto,
            Mode::Udp => DiscoverMode::Udp,
            Mode::Http => DiscoverMode::Http,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Attempt to discover devices
    Discover {
        #[arg(short, long, default_value = "255.255.255.255")]
        broadcast_address: String,
        #[arg(short, long, value_enum, default_value_t = Mode::Auto)]
        mode: Mode,
        /// Seconds to wait for responses
        #[arg(short, long, default_value_t = 1)]
        timeout: u64,
    },
    /// Issue a restart command to the device
    Restart {
        #[arg(long)]
        target: String,
    },
    /// Retrieve a specific variable from the device
    GetVariable {
        #[arg(long)]
        target: String,
        #[arg(long)]
        variable: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Err(e) = run(cli.command).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    pretty_env_logger::formatted_builder()
        .filter_level(level)
        .init();
}

async fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Discover {
            broadcast_address,
            mode,
            timeout,
        } => {
            let descriptors = Discover::new()
                .mode(mode.into())
                .broadcast_address(broadcast_address)
                .timeout(Duration::from_secs(timeout))
                .run()
                .await?;

            for descriptor in descriptors {
                let mut device = Device::from_descriptor(descriptor)?;
                let partial = device.gather_details(GatherOptions::all()).await;

                print_device(&device);
                match partial {
                    Ok(Some(partial)) => println!("  ({})", partial),
                    Ok(None) => {}
                    Err(e) => println!("  (details unavailable: {})", e),
                }
                println!();
            }
            Ok(())
        }

        Command::Restart { target } => {
            ControlConnection::connect(target).await?.restart().await
        }

        Command::GetVariable { target, variable } => {
            let mut control = ControlConnection::connect(target).await?;
            let value = control.get_var(&variable).await?;
            println!("{}", value);
            Ok(())
        }
    }
}

fn print_device(device: &Device) {
    let title = device
        .friendly_name()
        .unwrap_or_else(|| device.device_id());
    println!("{}", title);
    println!("{}", "-".repeat(title.len()));

    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".into());
    println!("Device ID: {}", device.device_id());
    println!("Discovery Method: {}", device.discovery_method());
    println!("Host: {}", device.host());
    println!("Device Auth: {}", or_dash(device.device_auth()));
    println!("Base URL: {}", or_dash(device.base_url()));
    println!("LineUp URL: {}", or_dash(device.lineup_url()));
    println!(
        "# Tuners: {}",
        device
            .tuner_count()
            .map(|count| count.to_string())
            .unwrap_or_else(|| "-".into())
    );
    println!("Model: {}", or_dash(device.model()));
    println!("HW Model: {}", or_dash(device.hw_model()));
    println!("Firmware Version: {}", or_dash(device.installed_version()));
    println!(
        "Latest Firmware Version: {}",
        or_dash(device.latest_version())
    );
    println!("Online: {}", device.online());

    for tuner in device.tuner_status() {
        println!(
            "  {}: channel={} signal={}% quality={}%",
            tuner.resource(),
            tuner.vct_number().unwrap_or_else(|| "idle".into()),
            tuner.signal_strength_percent().unwrap_or(0),
            tuner.signal_quality_percent().unwrap_or(0),
        );
    }
}
