//! Запросы: JSON-модель и движок агрегации по партициям.
//!
//! Корневая позиция задаётся как fen + опциональный move (SAN): с ходом
//! запрос делается по позиции ПОСЛЕ хода, и ход становится reverse move
//! корня. Категории:
//!   continuations — ключ с reverse move (партии, сыгравшие именно этот ход);
//!   transpositions — ключ без reverse move (все приходы в позицию);
//!   all — объединение, т.е. тоже ключ без reverse move.
//!
//! fetch_last_game принимается в запросе, но этим форматом отключён:
//! упакованный payload хранит только смещение первой партии.
//!
//! Движок читает партиции без блокировок (run'ы неизменяемы); фасад
//! обязан выполнить flush до запроса.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::chess::san::{move_to_san, parse_san};
use crate::chess::{GameLevel, GameResult, Move, Position};
use crate::consts::NUM_HASH_PARTITIONS;
use crate::db::Database;
use crate::headers::GameHeader;
use crate::metrics;
use crate::store::{CountAndGameOffset, Key, KeyOrder, INVALID_GAME_OFFSET};

// ---------------- Model ----------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootPositionSpec {
    pub fen: String,
    #[serde(default, rename = "move", skip_serializing_if = "Option::is_none")]
    pub san_move: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FetchingOptions {
    #[serde(default)]
    pub fetch_children: bool,
    #[serde(default)]
    pub fetch_first_game: bool,
    #[serde(default)]
    pub fetch_last_game: bool,
    #[serde(default)]
    pub fetch_first_game_for_each_child: bool,
    #[serde(default)]
    pub fetch_last_game_for_each_child: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub token: String,
    pub positions: Vec<RootPositionSpec>,
    pub levels: Vec<String>,
    pub results: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuations: Option<FetchingOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transpositions: Option<FetchingOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<FetchingOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Continuations,
    Transpositions,
    All,
}

impl Category {
    pub const VALUES: [Category; 3] = [
        Category::Continuations,
        Category::Transpositions,
        Category::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Continuations => "continuations",
            Category::Transpositions => "transpositions",
            Category::All => "all",
        }
    }

    fn key_order(self) -> KeyOrder {
        match self {
            Category::Continuations => KeyOrder::WithReverseMove,
            Category::Transpositions | Category::All => KeyOrder::WithoutReverseMove,
        }
    }
}

impl Request {
    fn options(&self, category: Category) -> Option<FetchingOptions> {
        match category {
            Category::Continuations => self.continuations,
            Category::Transpositions => self.transpositions,
            Category::All => self.all,
        }
    }

    fn parse_levels(&self) -> Result<Vec<GameLevel>> {
        self.levels.iter().map(|s| GameLevel::from_str(s)).collect()
    }

    fn parse_results(&self) -> Result<Vec<GameResult>> {
        self.results.iter().map(|s| GameResult::from_word(s)).collect()
    }
}

// ---------------- Engine ----------------

// Накопленный результат одной клетки (root или child) x (level, result).
struct CellAcc {
    level: GameLevel,
    result: GameResult,
    acc: CountAndGameOffset,
    fetch_first: bool,
}

pub fn execute(db: &Database, request: &Request) -> Result<Value> {
    metrics::inc_query_requests();

    let levels = request.parse_levels()?;
    let results = request.parse_results()?;

    let mut out_results = Vec::with_capacity(request.positions.len());
    for spec in &request.positions {
        out_results.push(execute_root(db, request, spec, &levels, &results)?);
    }

    Ok(json!({
        "query": serde_json::to_value(request)?,
        "results": out_results,
    }))
}

fn execute_root(
    db: &Database,
    request: &Request,
    spec: &RootPositionSpec,
    levels: &[GameLevel],
    results: &[GameResult],
) -> Result<Value> {
    let base = Position::from_fen(&spec.fen)
        .with_context(|| format!("bad fen '{}'", spec.fen))?;
    let (pos, root_reverse_move) = match &spec.san_move {
        Some(san) => {
            let m = parse_san(&base, san)
                .with_context(|| format!("bad move '{}' for fen '{}'", san, spec.fen))?;
            (base.after_move(m), Some(m))
        }
        None => (base, None),
    };

    let wants_children = Category::VALUES
        .iter()
        .filter_map(|&c| request.options(c))
        .any(|o| o.fetch_children);
    let children: Vec<(Move, Position)> = if wants_children {
        pos.legal_moves()
            .into_iter()
            .map(|m| (m, pos.after_move(m)))
            .collect()
    } else {
        Vec::new()
    };

    // Смещения на гидрацию, по уровням.
    let mut wanted_offsets: [Vec<u64>; 3] = Default::default();

    let mut category_values = serde_json::Map::new();
    for category in Category::VALUES {
        let options = match request.options(category) {
            Some(o) => o,
            None => continue,
        };
        let order = category.key_order();

        let mut sub = serde_json::Map::new();

        // Корень — под ключом "--".
        let root_cells = accumulate_cells(
            db,
            &pos,
            match category {
                Category::Continuations => root_reverse_move,
                _ => None,
            },
            order,
            levels,
            results,
            options.fetch_first_game,
            &mut wanted_offsets,
        );
        sub.insert("--".to_string(), cells_placeholder(&root_cells));

        if options.fetch_children {
            for (m, child) in &children {
                let cells = accumulate_cells(
                    db,
                    child,
                    match category {
                        Category::Continuations => Some(*m),
                        _ => None,
                    },
                    order,
                    levels,
                    results,
                    options.fetch_first_game_for_each_child,
                    &mut wanted_offsets,
                );
                let san = move_to_san(&pos, *m);
                sub.insert(san, cells_placeholder(&cells));
            }
        }

        category_values.insert(category.as_str().to_string(), Value::Object(sub));
    }

    // Гидрация первых партий: по уровню одним запросом к header-стору.
    let mut headers_by_level: [BTreeMap<u64, GameHeader>; 3] = Default::default();
    for level in GameLevel::VALUES {
        let slot = level.ordinal() as usize;
        let mut offsets = std::mem::take(&mut wanted_offsets[slot]);
        if offsets.is_empty() {
            continue;
        }
        offsets.sort_unstable();
        offsets.dedup();
        let headers = db.header_store(level).query_by_offsets(&offsets)?;
        headers_by_level[slot] = offsets.into_iter().zip(headers).collect();
    }

    // Подстановка гидрированных заголовков в placeholder'ы.
    let mut root_value = json!({
        "position": serde_json::to_value(spec)?,
    });
    for (category, value) in category_values {
        root_value[category.as_str()] = hydrate(value, &headers_by_level);
    }
    Ok(root_value)
}

#[allow(clippy::too_many_arguments)]
fn accumulate_cells(
    db: &Database,
    pos: &Position,
    reverse_move: Option<Move>,
    order: KeyOrder,
    levels: &[GameLevel],
    results: &[GameResult],
    fetch_first: bool,
    wanted_offsets: &mut [Vec<u64>; 3],
) -> Vec<CellAcc> {
    let mut cells = Vec::with_capacity(levels.len() * results.len());
    for &level in levels {
        for &result in results {
            let key = Key::new(pos, reverse_move, level, result);
            let p = key.hash_mod(NUM_HASH_PARTITIONS);
            let mut acc = CountAndGameOffset::default();
            db.partition(level, result, p).accumulate(&key, order, &mut acc);
            metrics::add_query_keys(1);

            if fetch_first && acc.count() > 0 && acc.has_game_offset() {
                wanted_offsets[level.ordinal() as usize].push(acc.game_offset());
            }
            cells.push(CellAcc {
                level,
                result,
                acc,
                fetch_first,
            });
        }
    }
    cells
}

/// JSON клетки с меткой смещения для последующей гидрации.
fn cells_placeholder(cells: &[CellAcc]) -> Value {
    let mut by_level = serde_json::Map::new();
    for cell in cells {
        if cell.acc.count() == 0 {
            continue;
        }
        let level_map = by_level
            .entry(cell.level.as_str().to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let mut entry = serde_json::Map::new();
        entry.insert("count".to_string(), json!(cell.acc.count()));
        if cell.fetch_first && cell.acc.has_game_offset() {
            entry.insert("__first_game_offset".to_string(), json!(cell.acc.game_offset()));
            entry.insert("__level".to_string(), json!(cell.level.ordinal()));
        }
        level_map[cell.result.as_word()] = Value::Object(entry);
    }
    Value::Object(by_level)
}

fn hydrate(value: Value, headers: &[BTreeMap<u64, GameHeader>; 3]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            let offset = map
                .get("__first_game_offset")
                .and_then(|v| v.as_u64())
                .filter(|&o| o != INVALID_GAME_OFFSET);
            let level = map.get("__level").and_then(|v| v.as_u64());
            for (k, v) in map {
                if k == "__first_game_offset" || k == "__level" {
                    continue;
                }
                out.insert(k, hydrate(v, headers));
            }
            if let (Some(offset), Some(level)) = (offset, level) {
                if let Some(header) = headers[level as usize].get(&offset) {
                    out.insert("first_game".to_string(), game_header_json(header));
                }
            }
            Value::Object(out)
        }
        other => other,
    }
}

fn game_header_json(header: &GameHeader) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("date".to_string(), json!(header.date.to_pgn()));
    map.insert("eco".to_string(), json!(header.eco.to_string()));
    if let Some(ply) = header.ply_count {
        map.insert("ply_count".to_string(), json!(ply));
    }
    map.insert("result".to_string(), json!(header.result.as_word()));
    map.insert("event".to_string(), json!(header.event));
    map.insert("white".to_string(), json!(header.white));
    map.insert("black".to_string(), json!(header.black));
    Value::Object(map)
}
