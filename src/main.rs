// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// Host side of the raspboot serial loader
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use raspboot::bridge;
use raspboot::protocol::BAUD_RATE;

#[derive(Parser)]
#[command(name = "raspbootcom")]
#[command(
    about = "Serial console that uploads a boot image whenever the target asks for one",
    long_about = None
)]
#[command(after_help = "Example: raspbootcom /dev/ttyUSB0 kernel/kernel.img")]
struct Cli {
    /// Serial device the target is attached to (e.g., /dev/ttyUSB0)
    device: String,

    /// Boot image to upload
    image: PathBuf,

    /// Baud rate
    #[arg(short, long, default_value_t = BAUD_RATE)]
    baud: u32,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { LevelFilter::Debug } else { LevelFilter::Warn };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    println!("Raspbootcom V{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Device {} at {} baud, image {}", cli.device, cli.baud, cli.image.display());

    if let Err(e) = bridge::run(&cli.device, cli.baud, &cli.image) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
