use std::{env, panic};

use anyhow::Result;
use clap::Parser;
use log::info;

use fsfs_cli::command::{self, Command};
use fsfs_cli::trace;

#[derive(Debug, Parser)]
#[command(version, author, about = "A command-line driver for the FSFS revision filesystem")]
pub struct Args {
    #[clap(short, long, help = "Print arguments before running")]
    debug: bool,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,

    #[clap(subcommand)]
    cmd: Command,
}

pub fn main() -> Result<()> {
    setup_panic_hooks();

    let args = Args::parse();
    if args.debug {
        println!("{:?}", args);
    }

    let log_dir = format!("{}/.fsfs-cli", env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &args.log_level)?;
    info!("fsfs-cli starting, cmd = {:?}", &args.cmd);

    command::run(args.cmd)
}

fn setup_panic_hooks() {
    let meta = human_panic::Metadata {
        version: env!("CARGO_PKG_VERSION").into(),
        name: env!("CARGO_PKG_NAME").into(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    };

    let default_hook = panic::take_hook();
    if env::var("RUST_BACKTRACE").is_err() {
        panic::set_hook(Box::new(move |info: &panic::PanicInfo| {
            default_hook(info);
            let file_path = human_panic::handle_dump(&meta, info);
            human_panic::print_msg(file_path, &meta).expect("human-panic: printing error message to console failed");
        }));
    }
}
