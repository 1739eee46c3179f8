use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use RookDB::chess::position::START_FEN;
use RookDB::chess::san::parse_san;
use RookDB::chess::{GameLevel, GameResult, Position};
use RookDB::config::RookConfig;
use RookDB::db::{Database, ImportableFile};
use RookDB::query::{FetchingOptions, Request, RootPositionSpec};

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("rookdb-{}-{}-{}", prefix, pid, t))
}

fn test_config() -> RookConfig {
    RookConfig::default()
        .with_import_memory(8 * 1024 * 1024)
        .with_import_threads(2)
}

fn request(positions: Vec<RootPositionSpec>) -> Request {
    let options = FetchingOptions {
        fetch_children: true,
        fetch_first_game: true,
        fetch_last_game: false,
        fetch_first_game_for_each_child: false,
        fetch_last_game_for_each_child: false,
    };
    Request {
        token: String::new(),
        positions,
        levels: vec!["human".into()],
        results: vec!["win".into(), "loss".into(), "draw".into()],
        continuations: Some(options),
        transpositions: Some(options),
        all: Some(options),
    }
}

fn ruy_lopez_fen() -> String {
    let mut pos = Position::start();
    for san in ["e4", "e5", "Nf3", "Nc6", "Bb5"] {
        let m = parse_san(&pos, san).unwrap();
        pos.do_move(m);
    }
    pos.fen()
}

#[test]
fn colliding_position_from_two_games() -> Result<()> {
    let root = unique_root("collide");
    fs::create_dir_all(&root)?;

    // Обе партии проходят через испанскую, но заканчиваются по-разному.
    let win = "[Result \"1-0\"]\n\n1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 1-0\n\n";
    let loss = "[Result \"0-1\"]\n\n1. e4 e5 2. Nf3 Nc6 3. Bb5 Nf6 0-1\n\n";
    fs::write(root.join("win.pgn"), win)?;
    fs::write(root.join("loss.pgn"), loss)?;

    let files = vec![
        ImportableFile::new(root.join("win.pgn"), GameLevel::Human)?,
        ImportableFile::new(root.join("loss.pgn"), GameLevel::Human)?,
    ];

    let db_root = root.join("db");
    let mut db = Database::create(&db_root, test_config())?;
    db.import(&files, 0)?;
    db.flush()?;
    db.merge_all(None)?;

    // После merge в каждой задействованной партиции остаётся один run.
    assert_eq!(db.partition(GameLevel::Human, GameResult::WhiteWin, 0).num_runs(), 1);
    assert_eq!(db.partition(GameLevel::Human, GameResult::BlackWin, 0).num_runs(), 1);

    let response = db.execute_query(&request(vec![RootPositionSpec {
        fen: ruy_lopez_fen(),
        san_move: None,
    }]))?;

    let root_all = &response["results"][0]["all"]["--"]["human"];
    assert_eq!(root_all["win"]["count"], 1);
    assert_eq!(root_all["loss"]["count"], 1);
    assert!(root_all.get("draw").is_none());

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn continuations_group_by_reverse_move_transpositions_do_not() -> Result<()> {
    let root = unique_root("transpose");
    fs::create_dir_all(&root)?;

    // Одна и та же позиция после 1. d4 d5 2. c4 и после 1. c4 d5 2. d4
    // (транспозиция), но достигнутая разными последними ходами.
    let via_d4 = "[Result \"1-0\"]\n\n1. d4 d5 2. c4 e6 1-0\n\n";
    let via_c4 = "[Result \"1-0\"]\n\n1. c4 d5 2. d4 e6 1-0\n\n";
    fs::write(root.join("a.pgn"), via_d4)?;
    fs::write(root.join("b.pgn"), via_c4)?;

    let files = vec![
        ImportableFile::new(root.join("a.pgn"), GameLevel::Human)?,
        ImportableFile::new(root.join("b.pgn"), GameLevel::Human)?,
    ];

    let db_root = root.join("db");
    let mut db = Database::create(&db_root, test_config())?;
    db.import(&files, 0)?;

    // Запрос от позиции после 1. d4 d5 с ходом c4: continuations видят
    // только партию, пришедшую ходом c4; транспозиции — обе.
    let mut pos = Position::start();
    for san in ["d4", "d5"] {
        let m = parse_san(&pos, san).unwrap();
        pos.do_move(m);
    }

    let response = db.execute_query(&request(vec![RootPositionSpec {
        fen: pos.fen(),
        san_move: Some("c4".to_string()),
    }]))?;

    let result = &response["results"][0];
    assert_eq!(result["continuations"]["--"]["human"]["win"]["count"], 1);
    assert_eq!(result["transpositions"]["--"]["human"]["win"]["count"], 2);
    assert_eq!(result["all"]["--"]["human"]["win"]["count"], 2);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn children_carry_their_own_counts() -> Result<()> {
    let root = unique_root("children");
    fs::create_dir_all(&root)?;

    let g1 = "[Result \"1-0\"]\n\n1. e4 e5 1-0\n\n";
    let g2 = "[Result \"1-0\"]\n\n1. e4 c5 1-0\n\n";
    let g3 = "[Result \"0-1\"]\n\n1. e4 c5 0-1\n\n";
    fs::write(root.join("1.pgn"), g1)?;
    fs::write(root.join("2.pgn"), g2)?;
    fs::write(root.join("3.pgn"), g3)?;

    let files = vec![
        ImportableFile::new(root.join("1.pgn"), GameLevel::Human)?,
        ImportableFile::new(root.join("2.pgn"), GameLevel::Human)?,
        ImportableFile::new(root.join("3.pgn"), GameLevel::Human)?,
    ];

    let db_root = root.join("db");
    let mut db = Database::create(&db_root, test_config())?;
    db.import(&files, 0)?;

    let response = db.execute_query(&request(vec![RootPositionSpec {
        fen: START_FEN.to_string(),
        san_move: Some("e4".to_string()),
    }]))?;

    let continuations = &response["results"][0]["continuations"];
    assert_eq!(continuations["e5"]["human"]["win"]["count"], 1);
    assert_eq!(continuations["c5"]["human"]["win"]["count"], 1);
    assert_eq!(continuations["c5"]["human"]["loss"]["count"], 1);
    // Ходы, которых никто не играл, дают пустые клетки.
    assert!(continuations["a6"]["human"].get("win").is_none());

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn invalid_fen_and_level_are_user_errors() -> Result<()> {
    let root = unique_root("badinput");
    let mut db = Database::create(&root, test_config())?;

    let mut req = request(vec![RootPositionSpec {
        fen: "not a fen".into(),
        san_move: None,
    }]);
    assert!(db.execute_query(&req).is_err());

    req.positions = vec![RootPositionSpec {
        fen: START_FEN.to_string(),
        san_move: None,
    }];
    req.levels = vec!["alien".into()];
    assert!(db.execute_query(&req).is_err());

    let _ = fs::remove_dir_all(&root);
    Ok(())
}
