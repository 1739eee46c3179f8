use anyhow::{anyhow, Result};
use std::path::Path;

use RookDB::config::RookConfig;
use RookDB::server::run_server;

/// tcp [<path>] <port> — если порт не дан вторым аргументом, первый
/// аргумент и есть порт.
pub fn exec(path_or_port: String, port: Option<u16>) -> Result<()> {
    let cfg = RookConfig::from_env();
    match port {
        Some(port) => run_server(Some(Path::new(&path_or_port)), port, cfg),
        None => {
            let port: u16 = path_or_port
                .parse()
                .map_err(|_| anyhow!("invalid port '{}'", path_or_port))?;
            run_server(None, port, cfg)
        }
    }
}
