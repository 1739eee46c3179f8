//! Потоковый BCGN-райтер с двойной буферизацией.
//!
//! Партия накапливается в GameEntryBuffer и на end_game сериализуется в
//! front-буфер. Когда следующая партия может не поместиться, буферы
//! меняются местами и полный блок уходит на диск одной фоновой записью
//! (ровно одна запись в полёте). Деструктор доливает остаток.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crate::chess::{CompressedPosition, Date, Eco, GameResult, Move, Position};
use crate::consts::{BCGN_FILE_HEADER_LEN, BCGN_MAX_GAME_LENGTH, BCGN_MIN_BUFFER_SIZE};

use super::{BcgnFileHeader, GameEntryBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpenMode {
    Truncate,
    Append,
}

type PendingWrite = JoinHandle<(File, Vec<u8>, std::io::Result<()>)>;

pub struct BcgnWriter {
    header: BcgnFileHeader,
    game: GameEntryBuffer,
    path: PathBuf,
    // file отсутствует, пока фоновая запись в полёте.
    file: Option<File>,
    front: Vec<u8>,
    spare: Option<Vec<u8>>,
    pending: Option<PendingWrite>,
    finished: bool,
}

impl BcgnWriter {
    pub fn create(
        path: &Path,
        header: BcgnFileHeader,
        mode: FileOpenMode,
        buffer_bytes: usize,
    ) -> Result<BcgnWriter> {
        let exists = path.exists();
        let file = match mode {
            FileOpenMode::Truncate => OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path),
            FileOpenMode::Append => OpenOptions::new().create(true).append(true).open(path),
        }
        .with_context(|| format!("open bcgn {}", path.display()))?;

        let needs_header = mode != FileOpenMode::Append
            || !exists
            || file.metadata().map(|m| m.len() == 0).unwrap_or(true);

        let capacity = buffer_bytes.max(BCGN_MIN_BUFFER_SIZE);
        let mut writer = BcgnWriter {
            header,
            game: GameEntryBuffer::new(),
            path: path.to_path_buf(),
            file: Some(file),
            front: Vec::with_capacity(capacity),
            spare: Some(Vec::with_capacity(capacity)),
            pending: None,
            finished: false,
        };

        if needs_header {
            let mut buf = [0u8; BCGN_FILE_HEADER_LEN];
            header.write_to(&mut buf);
            writer.front.extend_from_slice(&buf);
        }
        Ok(writer)
    }

    pub fn file_header(&self) -> &BcgnFileHeader {
        &self.header
    }

    pub fn begin_game(&mut self) {
        self.game.clear();
    }

    pub fn set_date(&mut self, date: Date) {
        self.game.date = date;
    }

    pub fn set_white_elo(&mut self, elo: u16) {
        self.game.white_elo = elo;
    }

    pub fn set_black_elo(&mut self, elo: u16) {
        self.game.black_elo = elo;
    }

    pub fn set_round(&mut self, round: u16) {
        self.game.round = round;
    }

    pub fn set_eco(&mut self, eco: Eco) {
        self.game.eco = eco;
    }

    pub fn set_custom_start_pos(&mut self, pos: &Position) {
        self.game.custom_start_pos = Some(CompressedPosition::compress(pos));
    }

    pub fn set_result(&mut self, result: Option<GameResult>) {
        self.game.result = result;
    }

    pub fn set_white_player(&mut self, name: &str) {
        self.game.white = name.to_string();
    }

    pub fn set_black_player(&mut self, name: &str) {
        self.game.black = name.to_string();
    }

    pub fn set_event(&mut self, event: &str) {
        self.game.event = event.to_string();
    }

    pub fn set_site(&mut self, site: &str) {
        self.game.site = site.to_string();
    }

    pub fn set_additional_tag(&mut self, name: &str, value: &str) {
        self.game.set_additional_tag(name, value);
    }

    /// Добавить ход; pos — позиция ДО хода.
    pub fn add_move(&mut self, pos: &Position, m: Move) -> Result<()> {
        self.game.add_move(&self.header, pos, m)
    }

    /// Завершить партию: сериализовать в front-буфер; при нехватке места
    /// под следующую партию — отправить блок фоновой записью.
    pub fn end_game(&mut self) -> Result<()> {
        self.game.write_to(&mut self.front)?;
        if !self.enough_space_for_next_game() {
            self.swap_and_persist_front()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.swap_and_persist_front()?;
        self.reap_pending()?;
        if let Some(f) = self.file.as_mut() {
            f.sync_data()
                .with_context(|| format!("sync bcgn {}", self.path.display()))?;
        }
        Ok(())
    }

    fn enough_space_for_next_game(&self) -> bool {
        self.front.capacity() - self.front.len() >= BCGN_MAX_GAME_LENGTH
    }

    fn swap_and_persist_front(&mut self) -> Result<()> {
        if self.front.is_empty() {
            return Ok(());
        }
        self.reap_pending()?;

        let file = self
            .file
            .take()
            .ok_or_else(|| anyhow!("bcgn writer lost its file handle"))?;
        let mut block = self
            .spare
            .take()
            .expect("spare buffer present when no write is pending");
        std::mem::swap(&mut block, &mut self.front);

        self.pending = Some(std::thread::spawn(move || {
            let mut file = file;
            let res = file.write_all(&block);
            block.clear();
            (file, block, res)
        }));
        Ok(())
    }

    /// Дождаться фоновой записи и вернуть дескриптор/буфер.
    fn reap_pending(&mut self) -> Result<()> {
        if let Some(handle) = self.pending.take() {
            let (file, block, res) = handle
                .join()
                .map_err(|_| anyhow!("bcgn background write thread panicked"))?;
            self.file = Some(file);
            self.spare = Some(block);
            res.with_context(|| format!("write bcgn {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Явное завершение с ошибкой вместо паники в Drop.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.flush()
    }
}

impl Drop for BcgnWriter {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.flush() {
                log::error!("bcgn writer flush on drop failed: {:#}", e);
            }
        }
    }
}
