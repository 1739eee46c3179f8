use anyhow::{anyhow, Result};
use std::path::PathBuf;

use RookDB::bcgn::{BcgnCompressionLevel, BcgnFileHeader, BcgnWriter, FileOpenMode};
use RookDB::config::RookConfig;
use RookDB::pgn::LazyPgnReader;

/// convert <from.pgn> <to.bcgn> [<level> [a]]
/// level — уровень сжатия BCGN (0|1, по умолчанию 1); "a" — дописывать.
pub fn exec(
    from: PathBuf,
    to: PathBuf,
    level: Option<u8>,
    append: Option<String>,
) -> Result<()> {
    let cfg = RookConfig::from_env();

    let compression = match level.unwrap_or(1) {
        0 => BcgnCompressionLevel::Level0,
        1 => BcgnCompressionLevel::Level1,
        other => return Err(anyhow!("invalid bcgn compression level {}", other)),
    };
    let mode = match append.as_deref() {
        None => FileOpenMode::Truncate,
        Some("a") => FileOpenMode::Append,
        Some(other) => return Err(anyhow!("unexpected argument '{}' (only 'a')", other)),
    };

    let mut reader = LazyPgnReader::open(&from, cfg.pgn_buffer_bytes)?;
    let mut writer = BcgnWriter::create(
        &to,
        BcgnFileHeader::new(compression),
        mode,
        cfg.bcgn_buffer_bytes,
    )?;

    let mut num_games = 0u64;
    while let Some(game) = reader.next_game()? {
        writer.begin_game();
        writer.set_date(game.date());
        writer.set_eco(game.eco());
        writer.set_round(game.round());
        writer.set_white_elo(game.white_elo());
        writer.set_black_elo(game.black_elo());
        writer.set_white_player(game.white());
        writer.set_black_player(game.black());
        writer.set_event(game.event());
        writer.set_site(game.site());
        writer.set_result(game.result().to_game_result());

        let mut positions = game.positions()?;
        let mut prev = match positions.next_position()? {
            Some((start, _)) => start,
            None => continue,
        };
        if game.tag("FEN").is_some() {
            writer.set_custom_start_pos(&prev);
        }
        while let Some((pos, m)) = positions.next_position()? {
            let m = m.expect("non-start position carries its move");
            writer.add_move(&prev, m)?;
            prev = pos;
        }

        writer.end_game()?;
        num_games += 1;
    }

    writer.finish()?;
    println!("converted {} games into {}", num_games, to.display());
    Ok(())
}
