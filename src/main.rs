//! # Niimbot CLI
//!
//! Command-line interface for Niimbot label printers.
//!
//! ## Usage
//!
//! ```bash
//! # Print an image on the first D11 in range
//! niimbot print label.png
//!
//! # Darker, three copies, ordered dithering
//! niimbot print --density 5 --quantity 3 --dither bayer label.png
//!
//! # See what would be printed without a printer
//! niimbot preview label.png --png out.png --rotated
//!
//! # Run the whole job against a simulated printer
//! niimbot print --dry-run label.png
//!
//! # Dump device properties as JSON
//! niimbot info
//! ```
//!
//! Set `RUST_LOG=debug` to trace packet traffic.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use niimbot::{
    NiimbotError,
    printer::{Config, PrintEvent, PrintJob, PrinterClient, PrinterModel},
    render::{self, bitmap, dither::DitheringAlgorithm},
    transport::mock::MockPrinter,
};

/// Niimbot - Thermal label printer utility
#[derive(Parser, Debug)]
#[command(name = "niimbot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print an image on a label
    Print {
        /// Image file (any format the image crate reads)
        image: PathBuf,

        /// BLE name prefix of the printer (overrides the config file)
        #[arg(long)]
        device: Option<String>,

        /// grayscale, threshold, bayer, floyd-steinberg or atkinson
        #[arg(long, default_value = "atkinson")]
        dither: DitheringAlgorithm,

        /// Cutoff for threshold and bayer
        #[arg(long, default_value_t = render::dither::DEFAULT_THRESHOLD)]
        threshold: u8,

        /// Print density (1-5)
        #[arg(long, default_value_t = 3)]
        density: u8,

        /// Label type (1-3)
        #[arg(long, default_value_t = 1)]
        label_type: u8,

        /// Number of copies
        #[arg(long, default_value_t = 1)]
        quantity: u16,

        /// JSON config file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Send the job to a simulated printer instead of Bluetooth
        #[arg(long)]
        dry_run: bool,
    },

    /// Render the dithered image to PNG instead of printing
    Preview {
        /// Image file
        image: PathBuf,

        /// Output PNG
        #[arg(long, value_name = "FILE")]
        png: PathBuf,

        #[arg(long, default_value = "atkinson")]
        dither: DitheringAlgorithm,

        #[arg(long, default_value_t = render::dither::DEFAULT_THRESHOLD)]
        threshold: u8,

        /// Show the printer's view: rotated into feed direction, 1-bit
        #[arg(long)]
        rotated: bool,
    },

    /// Print device properties and one heartbeat as JSON
    Info {
        #[arg(long)]
        device: Option<String>,

        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), NiimbotError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Print {
            image,
            device,
            dither,
            threshold,
            density,
            label_type,
            quantity,
            config,
            dry_run,
        } => {
            let config = load_config(config.as_deref(), device)?;
            let source = render::load_image(&image)?;
            let lines = render::prepare(&source, dither, threshold)?;
            if let Some(model) = PrinterModel::for_device(&config.device_prefix) {
                model.check_line_width(lines.width())?;
            }
            let job = PrintJob::new(lines, density, label_type, quantity)?;
            let rows = job.height();

            println!(
                "Printing {} ({} lines, {} dither, {} copies)...",
                image.display(),
                rows,
                dither,
                quantity
            );

            let (client, mock) = if dry_run {
                let (mock, link, link_events) = MockPrinter::new();
                let client = PrinterClient::from_link(link, link_events, config.session.clone());
                (client, Some(mock))
            } else {
                (connect(&config).await?, None)
            };
            client.start_heartbeat();

            let mut events = PrintJob::spawn(client.clone(), job, config.job.clone());
            let mut result = Ok(());
            while let Some(event) = events.next().await {
                match event {
                    Ok(PrintEvent::WriteLine { row }) if (row + 1) % 32 == 0 || row + 1 == rows => {
                        println!("  sent {}/{} lines", row + 1, rows);
                    }
                    Ok(PrintEvent::WriteLine { .. }) => {}
                    Ok(PrintEvent::EndPage) => println!("  page accepted"),
                    Ok(PrintEvent::PageStatus { page, .. }) => {
                        println!("  printed {}/{}", page, quantity)
                    }
                    Err(e) => result = Err(e),
                }
            }

            if let Err(e) = client.close().await {
                log::warn!("close failed: {}", e);
            }
            result?;
            match mock {
                Some(mock) => println!(
                    "Dry run complete: {} commands, {} lines",
                    mock.commands().len(),
                    mock.line_packets().len()
                ),
                None => println!("Printed successfully!"),
            }
        }

        Commands::Preview {
            image,
            png,
            dither,
            threshold,
            rotated,
        } => {
            let source = render::load_image(&image)?;
            if rotated {
                let lines = render::prepare(&source, dither, threshold)?;
                bitmap::save_png(&lines, &png)?;
                println!(
                    "Saved {}x{} printer view to {}",
                    lines.width(),
                    lines.height(),
                    png.display()
                );
            } else {
                let dithered = dither.apply_with_threshold(&source, threshold);
                dithered.save(&png).map_err(|e| {
                    NiimbotError::Image(format!("Failed to write {}: {}", png.display(), e))
                })?;
                println!(
                    "Saved {}x{} preview to {}",
                    dithered.width(),
                    dithered.height(),
                    png.display()
                );
            }
        }

        Commands::Info { device, config } => {
            let config = load_config(config.as_deref(), device)?;
            let client = connect(&config).await?;

            let outcome = async {
                let info = client.device_info().await?;
                let heartbeat = client.heartbeat().await?;
                Ok::<_, NiimbotError>(serde_json::json!({
                    "device_prefix": config.device_prefix,
                    "info": info,
                    "heartbeat": heartbeat,
                }))
            }
            .await;

            if let Err(e) = client.close().await {
                log::warn!("close failed: {}", e);
            }
            let report = outcome?;
            let text = serde_json::to_string_pretty(&report)
                .map_err(|e| NiimbotError::Config(e.to_string()))?;
            println!("{}", text);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, device: Option<String>) -> Result<Config, NiimbotError> {
    let mut config = match path {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    if let Some(device) = device {
        config.device_prefix = device;
    }
    Ok(config)
}

#[cfg(feature = "ble")]
async fn connect(config: &Config) -> Result<PrinterClient, NiimbotError> {
    println!("Looking for {}...", config.device_prefix);
    let client = PrinterClient::connect(&config.device_prefix, config.session.clone()).await?;
    println!("Connected.");
    Ok(client)
}

#[cfg(not(feature = "ble"))]
async fn connect(_config: &Config) -> Result<PrinterClient, NiimbotError> {
    Err(NiimbotError::Transport(
        "built without Bluetooth support (enable the `ble` feature)".to_string(),
    ))
}
