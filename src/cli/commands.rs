use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{error, info};
use std::path::PathBuf;

use crate::config::Config;
use crate::modbus::{describe_available_ports, SerialTransport};
use crate::output::OutputConsumer;
use crate::services::Poller;

pub fn build_cli() -> Command {
    Command::new("th-monitor")
        .version(crate::VERSION)
        .about("Polls an RS-485 temperature/humidity sensor over Modbus RTU")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .global(true)
                .help("Serial port, e.g. /dev/ttyUSB0 or COM9"),
        )
        .arg(
            Arg::new("baud")
                .short('b')
                .long("baud")
                .global(true)
                .value_parser(value_parser!(u32))
                .help("Baud rate"),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .global(true)
                .value_parser(value_parser!(u8))
                .help("Modbus device address (1-247)"),
        )
        .arg(
            Arg::new("interval-ms")
                .short('i')
                .long("interval-ms")
                .global(true)
                .value_parser(value_parser!(u64))
                .help("Polling interval in milliseconds"),
        )
        .arg(
            Arg::new("timeout-ms")
                .short('t')
                .long("timeout-ms")
                .global(true)
                .value_parser(value_parser!(u64))
                .help("Read timeout in milliseconds"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .global(true)
                .value_parser(["console", "json", "csv"])
                .help("Output format"),
        )
        .arg(
            Arg::new("output-file")
                .short('o')
                .long("output-file")
                .global(true)
                .value_name("FILE")
                .help("Append every line of output to this file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Increase log verbosity"),
        )
        .subcommand(Command::new("monitor").about("Poll continuously until Ctrl+C (default)"))
        .subcommand(Command::new("read").about("Run a single poll cycle"))
        .subcommand(Command::new("list-ports").about("List available serial ports"))
        .subcommand(Command::new("frame").about("Print the request frame for the configured sensor"))
        .subcommand(
            Command::new("init-config")
                .about("Write the default configuration to a file")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        )
}

/// File first, then command-line overrides, then validation.
pub fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_matches(matches)?;
    config.validate()?;
    Ok(config)
}

pub async fn handle_subcommands(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("list-ports", _)) => list_ports(),
        Some(("init-config", sub)) => init_config(sub),
        Some(("frame", _)) => print_frame(&load_config(matches)?),
        Some(("read", _)) => read_once(&load_config(matches)?).await,
        _ => monitor(&load_config(matches)?).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = describe_available_ports()?;
    if ports.is_empty() {
        println!("⚠️  No serial ports found");
        return Ok(());
    }

    println!("📡 Available Serial Ports:");
    for (index, port) in ports.iter().enumerate() {
        println!("   {}. {}", index + 1, port);
    }
    Ok(())
}

fn init_config(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<PathBuf>("path")
        .context("missing configuration path")?;

    if path.exists() && !matches.get_flag("force") {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    Config::default().save_to_file(path)?;
    println!("✅ Default configuration written to {}", path.display());
    Ok(())
}

fn print_frame(config: &Config) -> Result<()> {
    let request = config.sensor().request();
    let frame = request.to_frame();

    println!(
        "📋 Request: device {}, function 0x{:02X}, start {}, count {}",
        request.device_address, request.function_code, request.start_address, request.register_count
    );
    println!("📤 Frame: {}", frame);
    println!("🔢 CRC: 0x{:04X} (low 0x{:02X}, high 0x{:02X})", frame.crc(), frame.crc() & 0xFF, frame.crc() >> 8);
    Ok(())
}

async fn read_once(config: &Config) -> Result<()> {
    let transport = SerialTransport::open(&config.serial)?;
    let consumer = OutputConsumer::from_config(&config.output);
    consumer.send_header().await;

    let mut poller = Poller::new(transport, config.sensor(), Box::new(consumer));
    poller
        .poll_once()
        .await
        .context("Failed to read data from sensor")?;
    Ok(())
}

async fn monitor(config: &Config) -> Result<()> {
    let transport = SerialTransport::open(&config.serial)?;
    let consumer = OutputConsumer::from_config(&config.output);
    consumer.send_header().await;

    let handle = Poller::new(transport, config.sensor(), Box::new(consumer))
        .start(config.poll_interval());

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl+C received, stopping");
            token.cancel();
        }
    });

    match handle.join().await {
        Ok(stats) => {
            println!("Terminating the program.");
            println!(
                "📊 {} cycles: {} successful, {} failed ({:.1}% success)",
                stats.cycles,
                stats.successes,
                stats.failures,
                stats.success_rate()
            );
            Ok(())
        }
        Err(e) => {
            error!("💥 Polling stopped: {}", e);
            Err(e).context("Sensor connection lost; reconnect and restart monitoring")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_flags_override_defaults() {
        let matches = build_cli()
            .try_get_matches_from([
                "th-monitor", "read", "--port", "COM9", "--address", "3", "--interval-ms", "1500",
                "--format", "csv",
            ])
            .unwrap();
        let config = load_config(&matches).unwrap();

        assert_eq!(config.serial.port, "COM9");
        assert_eq!(config.sensor.device_address, 3);
        assert_eq!(config.polling.interval_ms, 1500);
        assert_eq!(config.output.format, OutputFormat::Csv);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let matches = build_cli()
            .try_get_matches_from(["th-monitor", "frame", "--address", "0"])
            .unwrap();
        assert!(load_config(&matches).is_err());
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "[serial]\nport = \"/dev/ttyS3\"\nbaud_rate = 19200\n").unwrap();

        let matches = build_cli()
            .try_get_matches_from([
                "th-monitor".to_string(),
                "--config".to_string(),
                path.display().to_string(),
                "--baud".to_string(),
                "4800".to_string(),
            ])
            .unwrap();
        let config = load_config(&matches).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyS3");
        assert_eq!(config.serial.baud_rate, 4800);
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.toml");
        std::fs::write(&path, "").unwrap();

        let matches = build_cli()
            .try_get_matches_from(["th-monitor".to_string(), "init-config".to_string(), path.display().to_string()])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert!(init_config(sub).is_err());

        let matches = build_cli()
            .try_get_matches_from([
                "th-monitor".to_string(),
                "init-config".to_string(),
                path.display().to_string(),
                "--force".to_string(),
            ])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        init_config(sub).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), Config::default());
    }
}
