//! Ленивый потоковый PGN-ридер.
//!
//! Файл читается через пополняемое окно фиксированного размера; партии
//! отделяются двумя последовательными границами "\n\n" (регион тегов, затем
//! регион ходов). Разбор тегов и позиций откладывается до обращения:
//! `UnparsedGame` держит только срезы байтов своих регионов.
//!
//! Политика refill: необработанный хвост сдвигается в начало окна, дальше
//! дочитываем. Если граница не найдена после чтения в полное окно — партия
//! больше окна, это ошибка "oversize game". Окно обязано быть больше самой
//! длинной партии в файле.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::chess::san::{is_valid_san_start, parse_san};
use crate::chess::{Date, Eco, GameResult, Move, Position};
use crate::consts::PGN_REGION_END;

/// Поиск подпоследовательности (memchr-окно по first byte).
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

/// Результат из PGN-тега; Unknown приводит к пропуску партии при импорте.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgnResult {
    WhiteWin,
    BlackWin,
    Draw,
    Unknown,
}

impl PgnResult {
    pub fn to_game_result(self) -> Option<GameResult> {
        match self {
            PgnResult::WhiteWin => Some(GameResult::WhiteWin),
            PgnResult::BlackWin => Some(GameResult::BlackWin),
            PgnResult::Draw => Some(GameResult::Draw),
            PgnResult::Unknown => None,
        }
    }
}

/// Партия без разбора: байтовые регионы тегов и ходов.
pub struct UnparsedGame<'a> {
    tag_region: &'a [u8],
    move_region: &'a [u8],
}

impl<'a> UnparsedGame<'a> {
    pub fn new(tag_region: &'a [u8], move_region: &'a [u8]) -> Self {
        Self {
            tag_region,
            move_region,
        }
    }

    #[inline]
    pub fn tag_region(&self) -> &'a [u8] {
        self.tag_region
    }

    #[inline]
    pub fn move_region(&self) -> &'a [u8] {
        self.move_region
    }

    /// Значение тега по имени: подстрока `Name` в регионе тегов, затем
    /// содержимое ближайших кавычек.
    pub fn tag(&self, name: &str) -> Option<&'a str> {
        let at = find_subslice(self.tag_region, name.as_bytes())?;
        let rest = &self.tag_region[at + name.len()..];
        let q0 = rest.iter().position(|&b| b == b'"')?;
        let rest = &rest[q0 + 1..];
        let q1 = rest.iter().position(|&b| b == b'"')?;
        std::str::from_utf8(&rest[..q1]).ok()
    }

    /// Результат по фиксированному смещению внутри закавыченного значения:
    /// третий байт различает "1-0" / "0-1" / "1/2-1/2".
    pub fn result(&self) -> PgnResult {
        let value = match self.tag("Result") {
            Some(v) => v,
            None => return PgnResult::Unknown,
        };
        match value.as_bytes().get(2) {
            Some(b'0') => PgnResult::WhiteWin,
            Some(b'1') => PgnResult::BlackWin,
            Some(b'2') => PgnResult::Draw,
            _ => PgnResult::Unknown,
        }
    }

    pub fn date(&self) -> Date {
        self.tag("Date").map(Date::from_pgn).unwrap_or_default()
    }

    pub fn eco(&self) -> Eco {
        self.tag("ECO").map(Eco::from_str).unwrap_or_default()
    }

    pub fn white(&self) -> &'a str {
        self.tag("White").unwrap_or("")
    }

    pub fn black(&self) -> &'a str {
        self.tag("Black").unwrap_or("")
    }

    pub fn event(&self) -> &'a str {
        self.tag("Event").unwrap_or("")
    }

    pub fn site(&self) -> &'a str {
        self.tag("Site").unwrap_or("")
    }

    pub fn round(&self) -> u16 {
        self.tag("Round")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn white_elo(&self) -> u16 {
        self.tag("WhiteElo")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn black_elo(&self) -> u16 {
        self.tag("BlackElo")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn ply_count(&self, default: u16) -> u16 {
        self.tag("PlyCount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Стартовая позиция партии: тег FEN либо обычный старт.
    pub fn start_position(&self) -> Result<Position> {
        match self.tag("FEN") {
            Some(fen) => Position::from_fen(fen)
                .with_context(|| format!("bad FEN tag '{}'", fen)),
            None => Ok(Position::start()),
        }
    }

    /// Итератор позиций: стартовая позиция, затем позиция после каждого
    /// применённого SAN-хода (N-ходовая партия даёт N+1 позиций).
    pub fn positions(&self) -> Result<PositionIter<'a>> {
        Ok(PositionIter {
            moves: self.move_region,
            cursor: 0,
            pos: self.start_position()?,
            yielded_start: false,
            done: false,
            terminated_by_result: false,
        })
    }
}

/// Итератор позиций региона ходов. Ходы применяются к текущей позиции;
/// пропускаются номера ходов, точки, NAG (`$n`), комментарии `{...}` и
/// `;...\n`, вложенные вариации `(...)` (комментарии плоские, вариации
/// вкладываются, комментарии встречаются внутри вариаций).
pub struct PositionIter<'a> {
    moves: &'a [u8],
    cursor: usize,
    pos: Position,
    yielded_start: bool,
    done: bool,
    terminated_by_result: bool,
}

impl<'a> PositionIter<'a> {
    /// Следующая позиция вместе с ходом, который к ней привёл
    /// (None у стартовой).
    pub fn next_position(&mut self) -> Result<Option<(Position, Option<Move>)>> {
        if self.done {
            return Ok(None);
        }
        if !self.yielded_start {
            self.yielded_start = true;
            return Ok(Some((self.pos, None)));
        }

        let token = match self.seek_san_token()? {
            Some(t) => t,
            None => {
                self.done = true;
                return Ok(None);
            }
        };

        let san = std::str::from_utf8(token).context("SAN token is not UTF-8")?;
        let m = parse_san(&self.pos, san)
            .with_context(|| format!("cannot apply SAN '{}'", san))?;
        self.pos.do_move(m);
        Ok(Some((self.pos, Some(m))))
    }

    /// Партия закончилась токеном результата (а не отсутствием SAN).
    pub fn terminated_by_result(&self) -> bool {
        self.terminated_by_result
    }

    pub fn current_position(&self) -> &Position {
        &self.pos
    }

    fn seek_san_token(&mut self) -> Result<Option<&'a [u8]>> {
        loop {
            // Пробелы и переводы строк.
            while self.cursor < self.moves.len()
                && self.moves[self.cursor].is_ascii_whitespace()
            {
                self.cursor += 1;
            }
            if self.cursor >= self.moves.len() {
                return Ok(None);
            }

            match self.moves[self.cursor] {
                b'{' => {
                    // Комментарии плоские.
                    match find_subslice(&self.moves[self.cursor..], b"}") {
                        Some(end) => self.cursor += end + 1,
                        None => return Ok(None),
                    }
                }
                b';' => match find_subslice(&self.moves[self.cursor..], b"\n") {
                    Some(end) => self.cursor += end + 1,
                    None => return Ok(None),
                },
                b'(' => {
                    if !self.skip_variation() {
                        return Ok(None);
                    }
                }
                b'$' => {
                    self.cursor += 1;
                    while self.cursor < self.moves.len()
                        && self.moves[self.cursor].is_ascii_digit()
                    {
                        self.cursor += 1;
                    }
                }
                _ => {
                    let start = self.cursor;
                    let mut end = start;
                    while end < self.moves.len()
                        && !self.moves[end].is_ascii_whitespace()
                        && !matches!(self.moves[end], b'{' | b'(' | b';')
                    {
                        end += 1;
                    }
                    let token = &self.moves[start..end];
                    self.cursor = end;

                    if is_move_number(token) {
                        continue;
                    }
                    if is_result_token(token) {
                        self.terminated_by_result = true;
                        return Ok(None);
                    }
                    if !token.is_empty() && is_valid_san_start(token[0]) {
                        return Ok(Some(token));
                    }
                    // SAN не найден: конец партии (возможно, мусор).
                    return Ok(None);
                }
            }
        }
    }

    /// Пропуск сбалансированной вариации; комментарии внутри учитываются.
    fn skip_variation(&mut self) -> bool {
        debug_assert_eq!(self.moves[self.cursor], b'(');
        let mut depth = 0usize;
        while self.cursor < self.moves.len() {
            match self.moves[self.cursor] {
                b'(' => {
                    depth += 1;
                    self.cursor += 1;
                }
                b')' => {
                    depth -= 1;
                    self.cursor += 1;
                    if depth == 0 {
                        return true;
                    }
                }
                b'{' => match find_subslice(&self.moves[self.cursor..], b"}") {
                    Some(end) => self.cursor += end + 1,
                    None => return false,
                },
                b';' => match find_subslice(&self.moves[self.cursor..], b"\n") {
                    Some(end) => self.cursor += end + 1,
                    None => return false,
                },
                _ => self.cursor += 1,
            }
        }
        false
    }
}

fn is_move_number(token: &[u8]) -> bool {
    !token.is_empty()
        && token[0].is_ascii_digit()
        && token.iter().all(|&b| b.is_ascii_digit() || b == b'.')
}

fn is_result_token(token: &[u8]) -> bool {
    matches!(token, b"1-0" | b"0-1" | b"1/2-1/2" | b"1/2" | b"*")
}

/// Потоковый ридер: окно фиксированного размера поверх файла.
pub struct LazyPgnReader {
    file: File,
    buffer: Vec<u8>,
    len: usize,
    first_unprocessed: usize,
    eof: bool,
}

impl LazyPgnReader {
    pub fn open(path: &Path, buffer_bytes: usize) -> Result<LazyPgnReader> {
        let file = File::open(path)
            .with_context(|| format!("open pgn {}", path.display()))?;
        let mut reader = LazyPgnReader {
            file,
            buffer: vec![0u8; buffer_bytes.max(4 * 1024)],
            len: 0,
            first_unprocessed: 0,
            eof: false,
        };
        reader.fill()?;
        Ok(reader)
    }

    /// Следующая партия; регионы заимствуют внутреннее окно до следующего
    /// вызова.
    pub fn next_game(&mut self) -> Result<Option<UnparsedGame<'_>>> {
        loop {
            let window = &self.buffer[self.first_unprocessed..self.len];

            if let Some(tag_end_rel) = find_subslice(window, PGN_REGION_END) {
                let moves_from = tag_end_rel + PGN_REGION_END.len();
                if let Some(move_end_rel) =
                    find_subslice(&window[moves_from..], PGN_REGION_END)
                {
                    let base = self.first_unprocessed;
                    let tag_range = base..base + tag_end_rel;
                    let move_range =
                        base + moves_from..base + moves_from + move_end_rel;
                    self.first_unprocessed =
                        move_range.end + PGN_REGION_END.len();
                    return Ok(Some(UnparsedGame::new(
                        &self.buffer[tag_range],
                        &self.buffer[move_range],
                    )));
                }

                if self.eof {
                    // Файл не оканчивается пустой строкой: последний регион
                    // ходов тянется до конца данных.
                    let base = self.first_unprocessed;
                    let tag_range = base..base + tag_end_rel;
                    let move_range = base + moves_from..self.len;
                    self.first_unprocessed = self.len;
                    if move_range.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(UnparsedGame::new(
                        &self.buffer[tag_range],
                        &self.buffer[move_range],
                    )));
                }
            } else if self.eof {
                // Хвост без границы: либо пусто, либо мусор.
                return Ok(None);
            }

            self.refill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        while self.len < self.buffer.len() && !self.eof {
            let n = self
                .file
                .read(&mut self.buffer[self.len..])
                .context("read pgn")?;
            if n == 0 {
                self.eof = true;
            } else {
                self.len += n;
            }
        }
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        if self.first_unprocessed == 0 && self.len == self.buffer.len() {
            bail!(
                "pgn game exceeds the reader window of {} bytes (oversize game)",
                self.buffer.len()
            );
        }
        // Сдвиг необработанного хвоста в начало окна.
        self.buffer.copy_within(self.first_unprocessed..self.len, 0);
        self.len -= self.first_unprocessed;
        self.first_unprocessed = 0;
        self.fill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rookdb-pgn-{}-{}.pgn",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    const ONE_GAME: &str = "[Event \"Test\"]\n[Result \"1-0\"]\n\n1. e4 e5 2. Nf3 Nc6 1-0\n\n";

    #[test]
    fn reads_single_game_with_positions() {
        let path = write_temp(ONE_GAME);
        let mut reader = LazyPgnReader::open(&path, 64 * 1024).unwrap();

        let game = reader.next_game().unwrap().expect("one game");
        assert_eq!(game.tag("Event"), Some("Test"));
        assert_eq!(game.result(), PgnResult::WhiteWin);

        let mut iter = game.positions().unwrap();
        let mut count = 0;
        while let Some((_pos, _mv)) = iter.next_position().unwrap() {
            count += 1;
        }
        // 4 полухода => 5 позиций.
        assert_eq!(count, 5);
        assert!(iter.terminated_by_result());

        assert!(reader.next_game().unwrap().is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn skips_comments_variations_and_nags() {
        let pgn = "[Result \"0-1\"]\n\n1. e4 $1 {best} (1. d4 d5 (1... Nf6) {note}) 1... e5 ; line comment\n2. Nf3 0-1\n\n";
        let path = write_temp(pgn);
        let mut reader = LazyPgnReader::open(&path, 64 * 1024).unwrap();
        let game = reader.next_game().unwrap().unwrap();

        let mut iter = game.positions().unwrap();
        let mut plies = Vec::new();
        while let Some((_p, m)) = iter.next_position().unwrap() {
            if let Some(m) = m {
                plies.push(m);
            }
        }
        assert_eq!(plies.len(), 3); // e4, e5, Nf3
        assert!(iter.terminated_by_result());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn oversize_game_fails() {
        let mut long = String::from("[Result \"1-0\"]\n\n");
        for _ in 0..4000 {
            long.push_str("1. e4 e5 ");
        }
        long.push_str("\n\n");
        let path = write_temp(&long);
        let mut reader = LazyPgnReader::open(&path, 8 * 1024).unwrap();
        assert!(reader.next_game().is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn multiple_games_and_unknown_result() {
        let pgn = "[Result \"1-0\"]\n\n1. e4 1-0\n\n[Result \"*\"]\n\n1. d4 *\n\n[Result \"0-1\"]\n\n1. c4 0-1\n\n";
        let path = write_temp(pgn);
        let mut reader = LazyPgnReader::open(&path, 64 * 1024).unwrap();

        let mut results = Vec::new();
        while let Some(game) = reader.next_game().unwrap() {
            results.push(game.result());
        }
        assert_eq!(
            results,
            vec![PgnResult::WhiteWin, PgnResult::Unknown, PgnResult::BlackWin]
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn custom_fen_start() {
        let pgn = "[FEN \"4k3/8/8/8/8/8/4P3/4K3 w - - 0 1\"]\n[Result \"1/2-1/2\"]\n\n1. e4 Kd7 1/2-1/2\n\n";
        let path = write_temp(pgn);
        let mut reader = LazyPgnReader::open(&path, 64 * 1024).unwrap();
        let game = reader.next_game().unwrap().unwrap();
        let mut iter = game.positions().unwrap();
        let (start, rm) = iter.next_position().unwrap().unwrap();
        assert!(rm.is_none());
        assert_eq!(start.fen(), "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1");
        let _ = std::fs::remove_file(&path);
    }
}
