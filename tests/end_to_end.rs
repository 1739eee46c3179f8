use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use RookDB::chess::position::START_FEN;
use RookDB::chess::{GameLevel, GameResult};
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

fn write_pgn(dir: &PathBuf, name: &str, content: &str) -> ImportableFile {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    ImportableFile::new(path, GameLevel::Human).unwrap()
}

fn full_request(positions: Vec<RootPositionSpec>) -> Request {
    let fetch_all = FetchingOptions {
        fetch_children: true,
        fetch_first_game: true,
        fetch_last_game: false,
        fetch_first_game_for_each_child: true,
        fetch_last_game_for_each_child: false,
    };
    Request {
        token: "test".into(),
        positions,
        levels: vec!["human".into(), "engine".into(), "server".into()],
        results: vec!["win".into(), "loss".into(), "draw".into()],
        continuations: Some(fetch_all),
        transpositions: Some(fetch_all),
        all: Some(fetch_all),
    }
}

#[test]
fn empty_import_leaves_clean_database() -> Result<()> {
    let root = unique_root("empty");
    let mut db = Database::create(&root, test_config())?;

    let stats = db.import(&[], 0)?;
    assert_eq!(stats.total_games(), 0);
    assert_eq!(stats.total_positions(), 0);

    assert!(root.join("manifest").exists());
    assert!(root.join("stats").exists());
    for level in GameLevel::VALUES {
        for result in GameResult::VALUES {
            assert_eq!(db.partition(level, result, 0).num_runs(), 0);
        }
        assert_eq!(db.header_store(level).num_games(), 0);
    }
    assert_eq!(db.stats().human.num_games, 0);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn single_game_counts_and_continuations() -> Result<()> {
    let root = unique_root("single");
    fs::create_dir_all(&root)?;

    let pgn = "[Event \"T\"]\n[Result \"1-0\"]\n[PlyCount \"4\"]\n\n1. e4 e5 2. Nf3 Nc6 1-0\n\n";
    let file = write_pgn(&root, "one.pgn", pgn);

    let db_root = root.join("db");
    let mut db = Database::create(&db_root, test_config())?;
    let stats = db.import(&[file], 0)?;

    assert_eq!(stats.level(GameLevel::Human).num_games, 1);
    assert_eq!(stats.level(GameLevel::Human).num_positions, 5);
    assert_eq!(db.header_store(GameLevel::Human).num_games(), 1);

    let headers = db.header_store(GameLevel::Human).query_by_offsets(&[0])?;
    assert_eq!(headers[0].result, GameResult::WhiteWin);
    assert_eq!(headers[0].ply_count, Some(4));

    // Запрос позиции после 1. e4.
    let response = db.execute_query(&full_request(vec![RootPositionSpec {
        fen: START_FEN.to_string(),
        san_move: Some("e4".to_string()),
    }]))?;

    let result = &response["results"][0];
    let root_entry = &result["continuations"]["--"];
    assert_eq!(root_entry["human"]["win"]["count"], 1);
    assert!(root_entry["human"].get("loss").is_none());
    assert!(root_entry["engine"].is_null() || root_entry["engine"].get("win").is_none());
    assert!(root_entry["human"]["win"]["first_game"]["white"].is_string());

    // Продолжение 1... e5 присутствует с count = 1.
    let child = &result["continuations"]["e5"];
    assert_eq!(child["human"]["win"]["count"], 1);

    // Транспозиции считают все приходы.
    assert_eq!(result["transpositions"]["--"]["human"]["win"]["count"], 1);
    assert_eq!(result["all"]["--"]["human"]["win"]["count"], 1);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn unknown_results_are_skipped() -> Result<()> {
    let root = unique_root("skip");
    fs::create_dir_all(&root)?;

    let pgn = "[Result \"1-0\"]\n\n1. e4 1-0\n\n\
               [Result \"*\"]\n\n1. d4 *\n\n\
               [Result \"0-1\"]\n\n1. c4 0-1\n\n";
    let file = write_pgn(&root, "three.pgn", pgn);

    let db_root = root.join("db");
    let mut db = Database::create(&db_root, test_config())?;
    let stats = db.import(&[file], 0)?;

    assert_eq!(stats.total_games(), 2);
    assert_eq!(stats.total_skipped_games(), 1);
    assert_eq!(db.header_store(GameLevel::Human).num_games(), 2);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn double_import_then_merge_doubles_counts() -> Result<()> {
    let root = unique_root("linear");
    fs::create_dir_all(&root)?;

    let pgn = "[Result \"1-0\"]\n\n1. e4 e5 2. Nf3 Nc6 1-0\n\n";
    let file = write_pgn(&root, "g.pgn", pgn);

    let db_root = root.join("db");
    let mut db = Database::create(&db_root, test_config())?;
    db.import(std::slice::from_ref(&file), 0)?;
    db.import(std::slice::from_ref(&file), 0)?;
    db.flush()?;
    db.merge_all(None)?;

    // Один run после merge.
    let partition = db.partition(GameLevel::Human, GameResult::WhiteWin, 0);
    assert_eq!(partition.num_runs(), 1);
    // 5 позиций на партию, обе партии дают одни и те же ключи.
    assert_eq!(partition.total_count(), 10);

    let response = db.execute_query(&full_request(vec![RootPositionSpec {
        fen: START_FEN.to_string(),
        san_move: Some("e4".to_string()),
    }]))?;
    assert_eq!(
        response["results"][0]["continuations"]["--"]["human"]["win"]["count"],
        2
    );

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn replicate_merge_produces_equivalent_database() -> Result<()> {
    let root = unique_root("replica");
    fs::create_dir_all(&root)?;

    let pgn = "[Result \"1-0\"]\n\n1. e4 e5 1-0\n\n";
    let file = write_pgn(&root, "g.pgn", pgn);

    let db_root = root.join("db");
    let replica_root = root.join("replica");
    {
        let mut db = Database::create(&db_root, test_config())?;
        db.import(&[file], 0)?;
        db.flush()?;
        db.replicate_merge_all(&replica_root, None)?;

        // Источник не изменился.
        assert!(db.partition(GameLevel::Human, GameResult::WhiteWin, 0).num_runs() >= 1);
    }

    let mut replica = Database::open(&replica_root, test_config())?;
    assert_eq!(replica.header_store(GameLevel::Human).num_games(), 1);

    let response = replica.execute_query(&full_request(vec![RootPositionSpec {
        fen: START_FEN.to_string(),
        san_move: Some("e4".to_string()),
    }]))?;
    assert_eq!(
        response["results"][0]["transpositions"]["--"]["human"]["win"]["count"],
        1
    );

    let _ = fs::remove_dir_all(&root);
    Ok(())
}
