use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use RookDB::bcgn::{
    BcgnCompressionLevel, BcgnFileHeader, BcgnReader, BcgnWriter, FileOpenMode,
};
use RookDB::chess::{Date, Eco, GameResult, Move, Position};

fn unique_path(name: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("rookdb-{}-{}-{}.bcgn", name, pid, t))
}

/// Детерминированная «партия»: по первому легальному ходу за раз.
fn play_moves(start: &Position, plies: usize) -> Vec<Move> {
    let mut pos = *start;
    let mut moves = Vec::with_capacity(plies);
    for _ in 0..plies {
        let legal = pos.legal_moves();
        let m = match legal.first() {
            Some(m) => *m,
            None => break,
        };
        moves.push(m);
        pos.do_move(m);
    }
    moves
}

fn write_game(
    writer: &mut BcgnWriter,
    start: &Position,
    custom_start: bool,
    moves: &[Move],
    result: Option<GameResult>,
) -> Result<()> {
    writer.begin_game();
    writer.set_date(Date::new(2020, 3, 14));
    writer.set_eco(Eco::from_str("B90"));
    writer.set_round(7);
    writer.set_white_elo(2750);
    writer.set_black_elo(2810);
    writer.set_white_player("White, Tester");
    writer.set_black_player("Black, Tester");
    writer.set_event("BCGN Roundtrip");
    writer.set_site("?");
    writer.set_result(result);
    writer.set_additional_tag("Annotator", "x");
    if custom_start {
        writer.set_custom_start_pos(start);
    }

    let mut pos = *start;
    for &m in moves {
        writer.add_move(&pos, m)?;
        pos.do_move(m);
    }
    writer.end_game()?;
    Ok(())
}

#[test]
fn forty_ply_game_with_custom_start_long_indices() -> Result<()> {
    let path = unique_path("long");

    // Тяжёлая материалом позиция: верхняя оценка числа ходов белых требует
    // длинной (u16) кодировки индексов; кони обеих сторон дают 40
    // безударных полуходов.
    let start =
        Position::from_fen("k6n/pp6/8/8/8/8/QQQQQ2N/QQQQQK2 w - - 0 1")?;
    let mut moves = Vec::with_capacity(40);
    {
        let mut pos = start;
        for _ in 0..10 {
            for san in ["Ng4", "Ng6", "Nh2", "Nh8"] {
                let m = RookDB::chess::san::parse_san(&pos, san)?;
                moves.push(m);
                pos.do_move(m);
            }
        }
    }
    assert_eq!(moves.len(), 40);

    {
        let mut writer = BcgnWriter::create(
            &path,
            BcgnFileHeader::new(BcgnCompressionLevel::Level1),
            FileOpenMode::Truncate,
            256 * 1024,
        )?;
        write_game(&mut writer, &start, true, &moves, Some(GameResult::Draw))?;
        writer.finish()?;
    }

    let mut reader = BcgnReader::open(&path, 256 * 1024)?;
    assert_eq!(
        reader.file_header().compression_level,
        BcgnCompressionLevel::Level1
    );

    let game = reader.next_game()?.expect("one game");
    assert_eq!(game.ply_count(), 40);
    assert_eq!(game.result(), Some(GameResult::Draw));
    assert_eq!(game.date(), Date::new(2020, 3, 14));
    assert_eq!(game.eco().to_string(), "B90");
    assert_eq!(game.round(), 7);
    assert_eq!(game.white_elo(), 2750);
    assert_eq!(game.black_elo(), 2810);
    assert_eq!(game.white(), "White, Tester");
    assert_eq!(game.black(), "Black, Tester");
    assert_eq!(game.event(), "BCGN Roundtrip");
    assert_eq!(game.additional_tags(), &[("Annotator", "x")]);
    assert!(game.has_custom_start_pos());
    assert_eq!(game.start_position()?.pieces_raw(), start.pieces_raw());
    assert_eq!(game.moves()?, moves);

    assert!(reader.next_game()?.is_none());
    let _ = fs::remove_file(&path);
    Ok(())
}

#[test]
fn level0_roundtrip_and_multiple_games() -> Result<()> {
    let path = unique_path("level0");
    let start = Position::start();
    let short = play_moves(&start, 12);
    let long = play_moves(&start, 30);

    {
        let mut writer = BcgnWriter::create(
            &path,
            BcgnFileHeader::new(BcgnCompressionLevel::Level0),
            FileOpenMode::Truncate,
            256 * 1024,
        )?;
        write_game(&mut writer, &start, false, &short, Some(GameResult::WhiteWin))?;
        write_game(&mut writer, &start, false, &long, None)?;
        writer.finish()?;
    }

    let mut reader = BcgnReader::open(&path, 256 * 1024)?;
    let first = reader.next_game()?.expect("first game");
    assert_eq!(first.moves()?, short);
    assert_eq!(first.result(), Some(GameResult::WhiteWin));
    assert!(!first.has_custom_start_pos());

    let second = reader.next_game()?.expect("second game");
    assert_eq!(second.moves()?, long);
    assert_eq!(second.result(), None);

    assert!(reader.next_game()?.is_none());
    let _ = fs::remove_file(&path);
    Ok(())
}

#[test]
fn tag_strings_truncate_to_255_bytes_exactly() -> Result<()> {
    let path = unique_path("truncate");
    let start = Position::start();
    let moves = play_moves(&start, 2);

    let long_name = "N".repeat(300);
    {
        let mut writer = BcgnWriter::create(
            &path,
            BcgnFileHeader::default(),
            FileOpenMode::Truncate,
            256 * 1024,
        )?;
        writer.begin_game();
        writer.set_white_player(&long_name);
        writer.set_result(Some(GameResult::Draw));
        let mut pos = start;
        for &m in &moves {
            writer.add_move(&pos, m)?;
            pos.do_move(m);
        }
        writer.end_game()?;
        writer.finish()?;
    }

    let mut reader = BcgnReader::open(&path, 256 * 1024)?;
    let game = reader.next_game()?.expect("game");
    assert_eq!(game.white().len(), 255);
    assert_eq!(game.white(), &long_name[..255]);

    let _ = fs::remove_file(&path);
    Ok(())
}

#[test]
fn append_mode_extends_existing_file() -> Result<()> {
    let path = unique_path("append");
    let start = Position::start();
    let moves = play_moves(&start, 6);

    for _ in 0..2 {
        let mut writer = BcgnWriter::create(
            &path,
            BcgnFileHeader::default(),
            FileOpenMode::Append,
            256 * 1024,
        )?;
        write_game(&mut writer, &start, false, &moves, Some(GameResult::Draw))?;
        writer.finish()?;
    }

    let mut reader = BcgnReader::open(&path, 256 * 1024)?;
    let mut games = 0;
    while reader.next_game()?.is_some() {
        games += 1;
    }
    assert_eq!(games, 2);

    let _ = fs::remove_file(&path);
    Ok(())
}
