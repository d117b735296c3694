//! Reset Studer devices to factory defaults.
//!
//! Signal parameters are triggered by writing a dummy value; each mode flag
//! selects a fixed (address, parameter) pair. Every mode is destructive and
//! gated behind an interactive confirmation.

use std::io::{self, BufRead, Write};

use anyhow::{bail, ensure, Context};
use clap::{ArgGroup, Parser};
use colored::Colorize;

use scom_proto::{
    decode_frame, decode_frame_header, encode_write_parameter_u32, FRAME_HEADER_SIZE,
    MAX_FRAME_SIZE,
};
use xcomsrv::transport::{SerialConfig, SerialLink, SerialPortLink};

// Parameter numbers for reset commands
const PARAM_XTENDER_RESTORE_FACTORY: u32 = 1287; // Installer level: restore factory settings
const PARAM_XCOM_RESET_ALL_DEVICES: u32 = 5121; // Expert level: reset all devices of the system
const PARAM_XCOM_RESTORE_DEFAULTS: u32 = 5044; // Installer level: restore default access level

// Addresses
const ADDR_XCOM232I: u32 = 501;
const ADDR_ALL_XTENDERS: u32 = 100;
const ADDR_XTENDER_START: u32 = 101;
const ADDR_XTENDER_END: u32 = 109;

#[derive(Parser, Debug)]
#[command(
    name = "xcom-reset",
    about = "Reset Studer devices to factory defaults",
    after_help = "WARNING: these operations reset devices to factory defaults.\n\
                  All custom settings will be lost.",
    group(ArgGroup::new("mode").required(true))
)]
struct Args {
    /// Serial device path
    device: Option<String>,

    /// Reset ALL devices in the system via the Xcom-232i (recommended)
    #[arg(long, group = "mode")]
    system_reset: bool,

    /// Reset all Xtenders to factory defaults (multicast address)
    #[arg(long, group = "mode")]
    xtender_all: bool,

    /// Reset one Xtender at the given address (101-109)
    #[arg(long, group = "mode", value_name = "ADDR")]
    xtender: Option<u32>,

    /// Restore default access levels on the Xcom-232i
    #[arg(long, group = "mode")]
    xcom_defaults: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (addr, parameter, banner) = if args.system_reset {
        (
            ADDR_XCOM232I,
            PARAM_XCOM_RESET_ALL_DEVICES,
            "SYSTEM RESET - RESETTING ALL DEVICES",
        )
    } else if args.xtender_all {
        (
            ADDR_ALL_XTENDERS,
            PARAM_XTENDER_RESTORE_FACTORY,
            "XTENDER RESET - RESETTING ALL XTENDERS",
        )
    } else if let Some(addr) = args.xtender {
        if !(ADDR_XTENDER_START..=ADDR_XTENDER_END).contains(&addr) {
            bail!(
                "invalid Xtender address {} (must be {}-{})",
                addr,
                ADDR_XTENDER_START,
                ADDR_XTENDER_END
            );
        }
        (
            addr,
            PARAM_XTENDER_RESTORE_FACTORY,
            "XTENDER RESET - RESETTING ONE XTENDER",
        )
    } else {
        (
            ADDR_XCOM232I,
            PARAM_XCOM_RESTORE_DEFAULTS,
            "XCOM DEFAULTS - RESTORING DEFAULT ACCESS LEVELS",
        )
    };

    let mut serial = SerialConfig::default();
    if let Some(device) = args.device {
        serial.device = device;
    }

    println!("{}", "Studer Device Reset Tool".bold());
    println!("========================");
    println!("Serial port: {}", serial.device);
    println!("Target: address {addr}, parameter {parameter}");

    confirm(banner)?;

    let mut link = SerialPortLink::open(&serial)
        .with_context(|| format!("failed to open serial device {}", serial.device))?;
    println!("Serial port initialized successfully");

    match send_reset(&mut link, addr, parameter).await {
        Ok(()) => {
            println!();
            println!("{}", "✓ Reset command completed successfully!".green().bold());
            println!("  The device(s) should now restart with factory defaults.");
            println!("  Wait a few seconds for the system to reinitialize.");
            Ok(())
        }
        Err(e) => {
            println!();
            println!("{}", "✗ Reset command FAILED!".red().bold());
            println!("  Check the serial connection and try again.");
            Err(e)
        }
    }
}

fn confirm(banner: &str) -> anyhow::Result<()> {
    println!();
    println!("{}", format!("*** {banner} ***").red().bold());
    println!("All custom settings will be lost.");
    print!("Press Enter to continue or Ctrl+C to cancel...");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read confirmation")?;
    Ok(())
}

async fn send_reset<L: SerialLink>(link: &mut L, addr: u32, parameter: u32) -> anyhow::Result<()> {
    let request =
        encode_write_parameter_u32(addr, parameter, 1).context("failed to encode reset command")?;

    let written = link.write(&request).await?;
    ensure!(
        written == request.len(),
        "short write: sent {} of {} bytes",
        written,
        request.len()
    );

    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    let got = link.read(&mut header_buf).await?;
    ensure!(
        got == FRAME_HEADER_SIZE,
        "no response header (got {} of {} bytes)",
        got,
        FRAME_HEADER_SIZE
    );
    let header = decode_frame_header(&header_buf).context("failed to decode response header")?;

    let payload_len = header.length_to_read();
    ensure!(
        header.data_length > 0 && payload_len <= MAX_FRAME_SIZE,
        "implausible response length {}",
        payload_len
    );

    let mut payload = vec![0u8; payload_len];
    let got = link.read(&mut payload).await?;
    ensure!(
        got == payload_len,
        "short response (got {got} of {payload_len} bytes)"
    );

    decode_frame(&header, &payload).context("device rejected the reset command")?;
    Ok(())
}
