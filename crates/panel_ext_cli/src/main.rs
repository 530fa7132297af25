//! `panel-ext`: operator CLI over the extension runtime.

use clap::Parser;

mod builtin;
mod commands;
mod output;

use commands::Cli;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = cli.execute() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
