use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI для RookDB: создание базы позиций, merge, TCP-сервер, конвертация.
#[derive(Parser, Debug)]
#[command(name = "rookdb", version, about = "RookDB chess position database CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create a database from a pgn list file (level;path per line)
    Create {
        /// Database format key (e.g. rookdb_local)
        format: String,
        /// Destination directory (must be empty or missing)
        destination: PathBuf,
        /// File listing archives: "<level>;<path>" per line
        pgn_list_file: PathBuf,
        /// Optional temp dir: import there, then merge-replicate into
        /// destination
        temp: Option<PathBuf>,
    },
    /// Merge all runs in place, or replicate-merge into a destination
    Merge {
        path: PathBuf,
        destination: Option<PathBuf>,
    },
    /// Serve queries over TCP: tcp [<path>] <port>
    Tcp {
        /// Database path, or the port when no path is given
        path_or_port: String,
        port: Option<u16>,
    },
    /// Convert a PGN archive to BCGN
    Convert {
        from: PathBuf,
        to: PathBuf,
        /// BCGN compression level: 0 or 1 (default 1)
        level: Option<u8>,
        /// Literal "a" appends to an existing bcgn file
        append: Option<String>,
    },
    /// Count games in a pgn/bcgn archive
    #[command(name = "count_games")]
    CountGames { path: PathBuf },
    /// Measure PGN read throughput (positions per second)
    Bench { path: PathBuf },
}
