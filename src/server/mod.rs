//! TCP-обёртка над движком запросов.
//!
//! Фрейминг: каждому сообщению предшествуют 8 байт — u32 LE длина S и
//! S ^ FRAME_XOR (верификация). Расхождение или превышение FRAME_MAX_LEN
//! закрывает соединение. Тела — JSON; запрос несёт поле "command"
//! (create / merge / open / close / query / stats / dump / exit),
//! ошибки уходят как {"error": "<reason>"} и соединение остаётся открытым.
//!
//! Сервер обслуживает одно соединение за раз (одна БД — один писатель);
//! состояние — опционально открытая база.

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};

use crate::config::RookConfig;
use crate::consts::{FRAME_MAX_LEN, FRAME_XOR, FORMAT_KEY};
use crate::db::{Database, FormatRegistry, ImportableFile};
use crate::chess::GameLevel;
use crate::query::Request;

struct ServerState {
    cfg: RookConfig,
    registry: FormatRegistry,
    db: Option<Database>,
}

/// Поднять сервер; блокируется до команды exit.
pub fn run_server(path: Option<&Path>, port: u16, cfg: RookConfig) -> Result<()> {
    let registry = FormatRegistry::with_default_formats();
    let mut state = ServerState {
        cfg,
        registry,
        db: None,
    };

    if let Some(path) = path {
        state.db = Some(Database::open(path, state.cfg.clone())?);
        log::info!("opened database at {}", path.display());
    }

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr)
        .with_context(|| format!("bind {}", addr))?;
    log::info!("listening on {}", addr);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("accept failed: {}", e);
                continue;
            }
        };
        match handle_connection(&mut state, stream) {
            Ok(true) => return Ok(()), // exit
            Ok(false) => {}
            Err(e) => log::warn!("connection dropped: {:#}", e),
        }
    }
    Ok(())
}

fn handle_connection(state: &mut ServerState, mut stream: TcpStream) -> Result<bool> {
    loop {
        let body = match read_frame(&mut stream) {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(false), // клиент закрылся
            Err(e) => {
                // Сломанный фрейминг: соединение закрывается молча.
                log::warn!("bad frame: {:#}", e);
                return Ok(false);
            }
        };

        let request: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                write_frame(&mut stream, &error_body(&format!("invalid json: {}", e)))?;
                continue;
            }
        };

        let is_exit = request.get("command").and_then(|c| c.as_str()) == Some("exit");
        let response = match dispatch(state, &request) {
            Ok(v) => v,
            Err(e) => json!({ "error": format!("{:#}", e) }),
        };
        write_frame(&mut stream, &serde_json::to_vec(&response)?)?;

        if is_exit {
            return Ok(true);
        }
    }
}

fn error_body(reason: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({ "error": reason })).expect("serialize error body")
}

// ---------------- Framing ----------------

fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 8];
    match stream.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = LittleEndian::read_u32(&prefix[0..4]);
    let xored = LittleEndian::read_u32(&prefix[4..8]);
    if size ^ FRAME_XOR != xored {
        bail!("frame length verification failed");
    }
    if size > FRAME_MAX_LEN {
        bail!("frame of {} bytes exceeds the limit", size);
    }

    let mut body = vec![0u8; size as usize];
    stream.read_exact(&mut body).context("read frame body")?;
    Ok(Some(body))
}

fn write_frame(stream: &mut TcpStream, body: &[u8]) -> Result<()> {
    let size = body.len() as u32;
    let mut prefix = [0u8; 8];
    LittleEndian::write_u32(&mut prefix[0..4], size);
    LittleEndian::write_u32(&mut prefix[4..8], size ^ FRAME_XOR);
    stream.write_all(&prefix)?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

// ---------------- Dispatch ----------------

fn dispatch(state: &mut ServerState, request: &Value) -> Result<Value> {
    let command = request
        .get("command")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("request lacks a 'command' field"))?;

    match command {
        "open" => {
            let path = required_str(request, "path")?;
            state.db = Some(Database::open(Path::new(path), state.cfg.clone())?);
            Ok(json!({ "ok": true }))
        }
        "close" => {
            state.db = None;
            Ok(json!({ "ok": true }))
        }
        "create" => cmd_create(state, request),
        "merge" => cmd_merge(state, request),
        "query" => {
            let db = open_db(state)?;
            let parsed: Request = serde_json::from_value(request.clone())
                .context("invalid query request")?;
            db.execute_query(&parsed)
        }
        "stats" => {
            let db = open_db(state)?;
            Ok(serde_json::to_value(db.stats())?)
        }
        "dump" => {
            let db = open_db(state)?;
            Ok(db.dump_info())
        }
        "exit" => Ok(json!({ "ok": true })),
        other => Err(anyhow!("unknown command '{}'", other)),
    }
}

fn open_db(state: &mut ServerState) -> Result<&mut Database> {
    state
        .db
        .as_mut()
        .ok_or_else(|| anyhow!("no database opened"))
}

fn required_str<'a>(request: &'a Value, field: &str) -> Result<&'a str> {
    request
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("request lacks a '{}' field", field))
}

fn cmd_create(state: &mut ServerState, request: &Value) -> Result<Value> {
    let destination = PathBuf::from(required_str(request, "destination")?);
    let format = request
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or(FORMAT_KEY);

    let files = request
        .get("files")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("request lacks a 'files' array"))?;
    let mut importable = Vec::with_capacity(files.len());
    for item in files {
        let pair = item
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| anyhow!("files entries must be [level, path] pairs"))?;
        let level = GameLevel::from_str(
            pair[0]
                .as_str()
                .ok_or_else(|| anyhow!("file level must be a string"))?,
        )?;
        let path = pair[1]
            .as_str()
            .ok_or_else(|| anyhow!("file path must be a string"))?;
        importable.push(ImportableFile::new(PathBuf::from(path), level)?);
    }

    let temp = request.get("temp").and_then(|v| v.as_str());
    let stats = match temp {
        None => {
            let mut db = state
                .registry
                .create(format, &destination, state.cfg.clone())?;
            let stats = db.import(&importable, 0)?;
            state.db = Some(db);
            stats
        }
        Some(temp) => {
            // Импорт во временный каталог, merge-реплика в целевой.
            let temp = PathBuf::from(temp);
            let stats = {
                let mut db = state.registry.create(format, &temp, state.cfg.clone())?;
                let stats = db.import(&importable, 0)?;
                db.replicate_merge_all(&destination, None)?;
                stats
            };
            std::fs::remove_dir_all(&temp)
                .with_context(|| format!("remove temp {}", temp.display()))?;
            state.db = Some(state.registry.open(format, &destination, state.cfg.clone())?);
            stats
        }
    };

    Ok(json!({ "ok": true, "import_stats": serde_json::to_value(&stats)? }))
}

fn cmd_merge(state: &mut ServerState, request: &Value) -> Result<Value> {
    let destination = request.get("destination").and_then(|v| v.as_str());
    let db = open_db(state)?;
    match destination {
        None => db.merge_all(None)?,
        Some(dest) => db.replicate_merge_all(Path::new(dest), None)?,
    }
    Ok(json!({ "ok": true }))
}
