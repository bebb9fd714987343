//! 共有トラック/ハンドシェイク領域
//!
//! Phase Tracker、Bit Engine、Controller の三者が通信する唯一の経路。
//! レイアウトはバイト単位で固定されている。
//!
//! | 領域 | オフセット | 内容 | 書き手 | 読み手 |
//! |---|---|---|---|---|
//! | phase | 0x0300 | 現在のトラック番号 | Phase Tracker | Controller |
//! | drive | 0x0300 | トラックデータ 16×374 | Controller | Bit Engine |
//! | drive | 0x1B00 | EN-状態（0=選択中） | Bit Engine | Controller |
//! | drive | 0x1B01 | 最後に送信完了したセクタ | Bit Engine | Controller |
//! | drive | 0x1B02 | 書き込み発生フラグ | Bit Engine（セット）/ Controller（クリア） | 両方 |
//! | drive | 0x1B03 | 書き込みバイト数 (u32 LE) | Bit Engine | Controller |
//! | drive | 0x1B07 | 一時停止フラグ（1=停止） | Controller | Bit Engine |
//! | drive | 0x1C00 | 書き込みキャプチャバッファ | Bit Engine | Controller |
//!
//! 書き込み発生フラグだけは両側が書くため、Release/Acquireで順序を保証する。

use crate::gcr::{NibbleSector, NIBBLE_SECTOR_LEN};
use crate::skew::SECTORS_PER_TRACK;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 各領域のサイズ（PRUデータRAM 8KB相当）
pub const REGION_LEN: usize = 0x2000;

/// phase領域: 現在のトラック番号
pub const TRACK_NUMBER_ADDR: usize = 0x0300;

/// drive領域: トラックデータ先頭
pub const TRACK_DATA_ADDR: usize = 0x0300;
/// トラックデータ長 (16 * 374)
pub const TRACK_DATA_LEN: usize = SECTORS_PER_TRACK * NIBBLE_SECTOR_LEN;
/// EN-状態
pub const ENABLE_ADDR: usize = 0x1B00;
/// 現在のセクタ番号
pub const SECTOR_ADDR: usize = 0x1B01;
/// 1 = 書き込み発生
pub const WRITE_ADDR: usize = 0x1B02;
/// 書き込みバイト数 (u32)
pub const WRITE_COUNT_ADDR: usize = 0x1B03;
/// Controller割り込み、1 = 停止
pub const PAUSE_ADDR: usize = 0x1B07;
/// 書き込みデータ先頭
pub const WRITE_DATA_ADDR: usize = 0x1C00;
/// 書き込みキャプチャバッファの容量
pub const WRITE_DATA_CAPACITY: usize = REGION_LEN - WRITE_DATA_ADDR;

const _: () = assert!(TRACK_DATA_ADDR + TRACK_DATA_LEN <= ENABLE_ADDR);
const _: () = assert!(PAUSE_ADDR < WRITE_DATA_ADDR);
const _: () = assert!(WRITE_COUNT_ADDR + 4 <= PAUSE_ADDR);
const _: () = assert!(TRACK_NUMBER_ADDR < REGION_LEN);

/// 領域外アクセス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionError {
    pub offset: usize,
    pub len: usize,
    pub size: usize,
}

impl std::error::Error for RegionError {}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "access of {} byte(s) at {:#06X} is outside the {:#06X}-byte region",
            self.len, self.offset, self.size
        )
    }
}

/// 境界チェック付きのバイト領域
///
/// 生アドレスは外に出さず、オフセットでのみアクセスする。
pub struct SharedRegion {
    cells: Box<[AtomicU8]>,
}

impl SharedRegion {
    pub fn new(len: usize) -> Self {
        SharedRegion {
            cells: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn range(&self, offset: usize, len: usize) -> Result<&[AtomicU8], RegionError> {
        offset
            .checked_add(len)
            .and_then(|end| self.cells.get(offset..end))
            .ok_or(RegionError { offset, len, size: self.cells.len() })
    }

    fn cell(&self, offset: usize) -> Result<&AtomicU8, RegionError> {
        self.cells.get(offset).ok_or(RegionError { offset, len: 1, size: self.cells.len() })
    }

    pub fn read(&self, offset: usize) -> Result<u8, RegionError> {
        Ok(self.cell(offset)?.load(Ordering::Relaxed))
    }

    pub fn write(&self, offset: usize, value: u8) -> Result<(), RegionError> {
        self.cell(offset)?.store(value, Ordering::Relaxed);
        Ok(())
    }

    /// フラグ読み取り（Acquire）
    pub fn read_acquire(&self, offset: usize) -> Result<u8, RegionError> {
        Ok(self.cell(offset)?.load(Ordering::Acquire))
    }

    /// フラグ書き込み（Release）: それ以前の書き込みが読み手から見えることを保証
    pub fn write_release(&self, offset: usize, value: u8) -> Result<(), RegionError> {
        self.cell(offset)?.store(value, Ordering::Release);
        Ok(())
    }

    pub fn read_into(&self, offset: usize, dst: &mut [u8]) -> Result<(), RegionError> {
        let cells = self.range(offset, dst.len())?;
        for (d, c) in dst.iter_mut().zip(cells) {
            *d = c.load(Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn write_from(&self, offset: usize, src: &[u8]) -> Result<(), RegionError> {
        let cells = self.range(offset, src.len())?;
        for (c, &s) in cells.iter().zip(src) {
            c.store(s, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn read_u32_le(&self, offset: usize) -> Result<u32, RegionError> {
        let mut buf = [0u8; 4];
        self.read_into(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u32_le(&self, offset: usize, value: u32) -> Result<(), RegionError> {
        self.write_from(offset, &value.to_le_bytes())
    }
}

/// 固定オフセットへのアクセス結果を取り出す
///
/// オフセットはすべて上のconst assertで範囲内と確認済み。ここでエラーを捨てるのは
/// それが前提で、debugビルドでは前提が崩れたら止める。
#[inline]
fn fixed<T: Default>(result: Result<T, RegionError>) -> T {
    debug_assert!(result.is_ok(), "fixed shared offset out of range: {:?}", result.as_ref().err());
    result.unwrap_or_default()
}

/// 名前付きフィールドで共有領域にアクセスする
///
/// 固定オフセットはすべてREGION_LEN内にあるので、名前付きアクセサは失敗しない。
pub struct SharedState {
    phase_ram: SharedRegion,
    drive_ram: SharedRegion,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        let state = SharedState {
            phase_ram: SharedRegion::new(REGION_LEN),
            drive_ram: SharedRegion::new(REGION_LEN),
        };
        // 起動時はドライブ非選択
        state.set_drive_selected(false);
        state
    }

    fn flag(&self, offset: usize) -> u8 {
        fixed(self.drive_ram.read_acquire(offset))
    }

    fn set_flag(&self, offset: usize, value: u8) {
        fixed(self.drive_ram.write_release(offset, value));
    }

    // ---- Phase Tracker -> Controller ----

    /// ホストが指示している現在のトラック
    pub fn track(&self) -> u8 {
        fixed(self.phase_ram.read_acquire(TRACK_NUMBER_ADDR))
    }

    pub fn set_track(&self, track: u8) {
        fixed(self.phase_ram.write_release(TRACK_NUMBER_ADDR, track));
    }

    // ---- Bit Engine -> Controller ----

    /// ドライブが選択されているか（EN- = 0）
    pub fn drive_selected(&self) -> bool {
        self.flag(ENABLE_ADDR) == 0
    }

    pub fn set_drive_selected(&self, selected: bool) {
        self.set_flag(ENABLE_ADDR, if selected { 0 } else { 1 });
    }

    /// 最後に送信を終えたセクタ
    pub fn sector(&self) -> u8 {
        self.flag(SECTOR_ADDR)
    }

    pub fn set_sector(&self, sector: u8) {
        self.set_flag(SECTOR_ADDR, sector);
    }

    pub fn write_count(&self) -> u32 {
        fixed(self.drive_ram.read_u32_le(WRITE_COUNT_ADDR))
    }

    pub fn set_write_count(&self, count: u32) {
        fixed(self.drive_ram.write_u32_le(WRITE_COUNT_ADDR, count));
    }

    /// キャプチャバッファに1バイト格納。容量を超えたらfalse
    pub fn store_capture_byte(&self, index: usize, value: u8) -> bool {
        index < WRITE_DATA_CAPACITY && self.drive_ram.write(WRITE_DATA_ADDR + index, value).is_ok()
    }

    /// キャプチャバッファ先頭からlenバイト（容量で切り詰め）
    pub fn capture(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len.min(WRITE_DATA_CAPACITY)];
        fixed(self.drive_ram.read_into(WRITE_DATA_ADDR, &mut buf));
        buf
    }

    // ---- 書き込み発生フラグ（Engineがセット、Controllerがクリア） ----

    pub fn write_occurred(&self) -> bool {
        self.flag(WRITE_ADDR) == 1
    }

    pub fn set_write_occurred(&self) {
        self.set_flag(WRITE_ADDR, 1);
    }

    pub fn clear_write_occurred(&self) {
        self.set_flag(WRITE_ADDR, 0);
    }

    // ---- Controller -> Bit Engine ----

    /// Controllerが一時停止を要求しているか
    pub fn paused(&self) -> bool {
        self.flag(PAUSE_ADDR) == 1
    }

    pub fn set_paused(&self, paused: bool) {
        self.set_flag(PAUSE_ADDR, paused as u8);
    }

    /// トラックバッファ内の1バイト（送信用）
    #[inline]
    pub fn track_byte(&self, index: usize) -> Option<u8> {
        if index >= TRACK_DATA_LEN {
            return None;
        }
        self.drive_ram.read(TRACK_DATA_ADDR + index).ok()
    }

    /// セクタをトラックバッファに書き込む
    pub fn store_track_sector(&self, sector: usize, nib: &NibbleSector) -> Result<(), RegionError> {
        self.write_track_bytes(sector, 0, nib)
    }

    /// セクタ内オフセットから部分的に書き込む
    pub fn write_track_bytes(&self, sector: usize, offset: usize, bytes: &[u8]) -> Result<(), RegionError> {
        let start = sector * NIBBLE_SECTOR_LEN + offset;
        if sector >= SECTORS_PER_TRACK || start + bytes.len() > TRACK_DATA_LEN {
            return Err(RegionError { offset: TRACK_DATA_ADDR + start, len: bytes.len(), size: TRACK_DATA_LEN });
        }
        self.drive_ram.write_from(TRACK_DATA_ADDR + start, bytes)
    }

    pub fn read_track_sector(&self, sector: usize) -> Result<NibbleSector, RegionError> {
        let mut nib = [0u8; NIBBLE_SECTOR_LEN];
        if sector >= SECTORS_PER_TRACK {
            return Err(RegionError {
                offset: TRACK_DATA_ADDR + sector * NIBBLE_SECTOR_LEN,
                len: NIBBLE_SECTOR_LEN,
                size: TRACK_DATA_LEN,
            });
        }
        self.drive_ram.read_into(TRACK_DATA_ADDR + sector * NIBBLE_SECTOR_LEN, &mut nib)?;
        Ok(nib)
    }
}
