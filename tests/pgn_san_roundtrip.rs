use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use RookDB::chess::san::{move_to_san, parse_san};
use RookDB::chess::{Move, Position};
use RookDB::pgn::LazyPgnReader;

fn unique_path(name: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("rookdb-{}-{}-{}.pgn", name, pid, t))
}

// Партия с обеими рокировками и ходами, требующими дизамбигуации.
const GAME: &str = "[Event \"Roundtrip\"]\n[Result \"1-0\"]\n\n\
1. e4 e5 2. Nf3 Nc6 3. Bb5 Nf6 4. O-O Be7 5. Re1 d6 6. c3 O-O 7. d4 Bg4 \
8. d5 Nb8 9. h3 Bh5 10. g4 Bg6 11. Nbd2 Nbd7 1-0\n\n";

/// Позиции, которые выдал ридер, после пере-сериализации последовательности
/// ходов через SAN и повторного применения дают тот же поток позиций.
#[test]
fn positions_survive_san_reserialization() -> Result<()> {
    let path = unique_path("roundtrip");
    fs::write(&path, GAME)?;

    let mut reader = LazyPgnReader::open(&path, 64 * 1024)?;
    let game = reader.next_game()?.expect("game present");

    let mut stream: Vec<Position> = Vec::new();
    let mut moves: Vec<Move> = Vec::new();
    let mut iter = game.positions()?;
    while let Some((pos, m)) = iter.next_position()? {
        stream.push(pos);
        if let Some(m) = m {
            moves.push(m);
        }
    }
    assert!(iter.terminated_by_result());
    assert_eq!(stream.len(), moves.len() + 1);

    // Пере-сериализация: ход -> SAN -> разбор против текущей позиции.
    let mut pos = stream[0];
    let mut replayed = vec![pos];
    for m in &moves {
        let san = move_to_san(&pos, *m);
        let parsed = parse_san(&pos, &san)?;
        assert_eq!(parsed, *m, "san '{}' must parse back to the same move", san);
        pos.do_move(parsed);
        replayed.push(pos);
    }

    assert_eq!(replayed.len(), stream.len());
    for (a, b) in stream.iter().zip(&replayed) {
        assert_eq!(a.fen(), b.fen());
    }

    let _ = fs::remove_file(&path);
    Ok(())
}

/// Партия, оборванная без токена результата, завершается чисто, и флаг
/// «закончилась результатом» не выставлен.
#[test]
fn truncated_movetext_ends_cleanly() -> Result<()> {
    let path = unique_path("truncated");
    fs::write(&path, "[Result \"1-0\"]\n\n1. e4 e5 2. Nf3\n\n")?;

    let mut reader = LazyPgnReader::open(&path, 64 * 1024)?;
    let game = reader.next_game()?.expect("game present");
    let mut iter = game.positions()?;
    let mut count = 0;
    while iter.next_position()?.is_some() {
        count += 1;
    }
    assert_eq!(count, 4); // старт + 3 полухода
    assert!(!iter.terminated_by_result());

    let _ = fs::remove_file(&path);
    Ok(())
}
