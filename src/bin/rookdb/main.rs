use anyhow::Result;
use clap::Parser;
use env_logger::Env;

use RookDB::db::FormatRegistry;

mod cli;
mod cmd_bench;
mod cmd_convert;
mod cmd_count_games;
mod cmd_create;
mod cmd_merge;
mod cmd_tcp;
mod util;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Реестр форматов собирается на старте и передаётся обработчикам.
    let registry = FormatRegistry::with_default_formats();

    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Create {
            format,
            destination,
            pgn_list_file,
            temp,
        } => cmd_create::exec(&registry, format, destination, pgn_list_file, temp),

        cli::Cmd::Merge { path, destination } => cmd_merge::exec(path, destination),

        cli::Cmd::Tcp { path_or_port, port } => cmd_tcp::exec(path_or_port, port),

        cli::Cmd::Convert {
            from,
            to,
            level,
            append,
        } => cmd_convert::exec(from, to, level, append),

        cli::Cmd::CountGames { path } => cmd_count_games::exec(path),

        cli::Cmd::Bench { path } => cmd_bench::exec(path),
    }
}
