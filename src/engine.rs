//! Serial Bit Engine
//!
//! ドライブ選択中、共有トラックバッファのセクタを自己クロックのパルス列として
//! ホストに送り続ける。ホストがWREQ-を出したら受信に切り替え、WSIGのエッジ
//! 間隔からビットを復元してキャプチャバッファに書き込む。
//!
//! 送信: 1ビット = パルス(1のときだけRDAT Low) + ガード。0も1も同じ時間を使う。
//! 受信: エッジ間隔をポーリング回数で数え、0...01 のビット列に変換する。

use crate::bus::DataLines;
use crate::disk_log::{log_drive_select, log_sector_sent, log_write_captured};
use crate::gcr::NIBBLE_SECTOR_LEN;
use crate::shared::SharedState;
use crate::skew::SECTORS_PER_TRACK;
use crate::timing::{Delay, Timing};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 送信終端マーカ（変換テーブルは0x00を生成しない）
pub const END_MARKER: u8 = 0x00;

/// 書き込み開始後に読み飛ばすWSIG立ち上がりエッジ数
pub const SYNC_EDGES: usize = 13;

/// エッジ待ちのポーリング回数上限。超えたらキャプチャ終了
pub const EDGE_CEILING: u32 = 65;

/// 同期読み飛ばし中のスピン上限（約2ms）
const SYNC_SPIN_LIMIT: u32 = 20_000;

/// ポーリング回数 -> ビット列長の境界
/// <10: 1, <17: 01, <24: 001, ... <52: 000 0001, それ以上: 0000 0001
const RUN_BANDS: [u32; 7] = [10, 17, 24, 31, 38, 45, 52];

/// エッジ間隔（ポーリング回数）をビット列長に変換
///
/// 長さnは「0がn-1個続いて最後に1」を表す。上限を超えたらNone（キャプチャ終了）。
pub fn bit_run(count: u32) -> Option<u8> {
    if count > EDGE_CEILING {
        return None;
    }
    let run = RUN_BANDS
        .iter()
        .position(|&limit| count < limit)
        .map_or(RUN_BANDS.len() + 1, |i| i + 1);
    Some(run as u8)
}

/// ビットを1つずつ受け取り、8ビットそろったらバイトを返す
#[derive(Debug, Clone, Default)]
pub struct BitAssembler {
    byte: u8,
    bits: u8,
}

impl BitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// パケット先頭で呼ぶ
    pub fn reset(&mut self) {
        self.byte = 0;
        self.bits = 0;
    }

    /// MSBから順にビットを入れる
    pub fn push(&mut self, bit: bool) -> Option<u8> {
        self.byte = (self.byte << 1) | bit as u8;
        self.bits += 1;
        if self.bits == 8 {
            let byte = self.byte;
            self.reset();
            Some(byte)
        } else {
            None
        }
    }
}

/// 1セクタ送信の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 終端マーカまで送信した
    Complete,
    /// ホストの書き込みを受信した（受信したバイト数。バッファ容量を超えることがある）
    Captured(usize),
    /// 書き込みを取りこぼした（前回のキャプチャが未処理、または何も受信できなかった）
    Dropped,
}

/// stepの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStep {
    /// ドライブ非選択
    Idle,
    /// Controllerが一時停止中
    Paused,
    /// 1セクタ処理した
    Sector { sector: u8, outcome: SendOutcome },
}

/// Serial Bit Engine
pub struct BitEngine<L: DataLines, D: Delay> {
    lines: L,
    delay: D,
    timing: Timing,
    shared: Arc<SharedState>,
    /// 次に送るセクタ
    sector: u8,
    /// ドライブ選択中か（前回step時点）
    selected: bool,
    assembler: BitAssembler,
    /// 直近のキャプチャで容量超過により捨てたバイト数
    overflow: usize,
}

impl<L: DataLines, D: Delay> BitEngine<L, D> {
    pub fn new(lines: L, delay: D, timing: Timing, shared: Arc<SharedState>) -> Self {
        BitEngine {
            lines,
            delay,
            timing,
            shared,
            sector: 0,
            selected: false,
            assembler: BitAssembler::new(),
            overflow: 0,
        }
    }

    pub fn lines(&self) -> &L {
        &self.lines
    }

    /// 次に送るセクタ
    pub fn next_sector(&self) -> u8 {
        self.sector
    }

    /// ステートマシンを1段進める
    pub fn step(&mut self) -> EngineStep {
        if !self.lines.drive_enabled() {
            if self.selected {
                self.selected = false;
                self.shared.set_drive_selected(false);
                log_drive_select(false);
            }
            self.delay.wait(self.timing.idle_poll());
            return EngineStep::Idle;
        }

        if !self.selected {
            // ホストがドライブを選択した
            self.selected = true;
            self.sector = 0;
            self.shared.set_drive_selected(true);
            log_drive_select(true);
        }

        if self.shared.paused() {
            // Controllerがトラックを差し替え中
            self.delay.wait(self.timing.pause_poll());
            return EngineStep::Paused;
        }

        self.delay.wait(self.timing.sector_lead());
        let sector = self.sector;
        let outcome = self.send_sector(sector);

        match outcome {
            SendOutcome::Captured(bytes) => {
                // バイト数 -> セクタ -> フラグ の順に公開
                self.shared.set_write_count(bytes as u32);
                self.shared.set_sector(sector);
                self.shared.set_write_occurred();
                log_write_captured(sector, bytes);
            }
            SendOutcome::Complete | SendOutcome::Dropped => {
                // マージ待ちの間はキャプチャしたセクタ番号を保持する
                if !self.shared.write_occurred() {
                    self.shared.set_sector(sector);
                }
                log_sector_sent(sector);
            }
        }

        self.sector = (sector + 1) % SECTORS_PER_TRACK as u8;
        EngineStep::Sector { sector, outcome }
    }

    /// runningがfalseになるまでstepを繰り返す
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            self.step();
        }
    }

    /// 1セクタ分を送信する（MSBから）
    ///
    /// 各バイトのLSBを送った直後にWREQ-を確認し、書き込みが来ていれば受信に移る。
    pub fn send_sector(&mut self, sector: u8) -> SendOutcome {
        let base = (sector as usize % SECTORS_PER_TRACK) * NIBBLE_SECTOR_LEN;
        let pulse = self.timing.bit_pulse();
        let guard = self.timing.bit_guard();

        for i in 0..NIBBLE_SECTOR_LEN {
            let byte = match self.shared.track_byte(base + i) {
                Some(b) => b,
                None => break,
            };
            if byte == END_MARKER {
                break;
            }

            for bit in (0..8).rev() {
                // 1ならRDATをLow、0ならHighのまま（時間は同じ）
                self.lines.set_read_pulse((byte >> bit) & 1 == 1);
                self.delay.wait(pulse);
                self.lines.set_read_pulse(false);

                if bit == 0 && self.lines.write_request() {
                    return self.receive();
                }
                self.delay.wait(guard);
            }
        }
        SendOutcome::Complete
    }

    /// ホストからの書き込みを受信する
    pub fn receive(&mut self) -> SendOutcome {
        if self.shared.write_occurred() && !self.wait_for_merge() {
            log::warn!("Host write dropped: previous capture has not been merged yet");
            return SendOutcome::Dropped;
        }

        self.assembler.reset();
        self.overflow = 0;

        // 最初の同期バイトの00まで待つ
        self.delay.wait(self.timing.write_settle());

        // 同期バイトとゴミを読み飛ばす
        for _ in 0..SYNC_EDGES {
            if !self.spin_while(false) {
                break;
            }
            self.delay.wait(self.timing.sync_rise_hold());
            if !self.spin_while(true) {
                break;
            }
            self.delay.wait(self.timing.sync_fall_hold());
        }

        let captured = self.capture_bits();

        if self.overflow > 0 {
            log::warn!(
                "Write capture overflowed: {} byte(s) beyond the capture buffer were discarded",
                self.overflow
            );
        }
        if captured == 0 {
            log::warn!("Host write produced no bytes; ignoring it");
            return SendOutcome::Dropped;
        }
        // 容量を超えた分も数に含めて公開し、Controllerがあふれを判定できるようにする
        SendOutcome::Captured(captured + self.overflow)
    }

    /// 前回のキャプチャがマージされるのを待つ。ホストが書き込みをやめたらfalse
    fn wait_for_merge(&mut self) -> bool {
        while self.shared.write_occurred() {
            if !self.lines.write_request() {
                return false;
            }
            self.delay.wait(self.timing.pause_poll());
        }
        true
    }

    /// WSIGがlevelの間スピンする。上限に達したらfalse
    fn spin_while(&mut self, level: bool) -> bool {
        let mut spins = 0u32;
        while self.lines.write_signal() == level {
            spins += 1;
            if spins > SYNC_SPIN_LIMIT {
                return false;
            }
            self.delay.wait(self.timing.sync_spin());
        }
        true
    }

    /// エッジ間隔からビットを復元し、キャプチャバッファに書き込む
    fn capture_bits(&mut self) -> usize {
        let poll = self.timing.edge_poll();
        let mut captured = 0usize;

        loop {
            let mut count = 0u32;
            let last = self.lines.write_signal();
            while self.lines.write_signal() == last {
                count += 1;
                if count > EDGE_CEILING {
                    return captured;
                }
                self.delay.wait(poll);
            }

            let run = match bit_run(count) {
                Some(run) => run,
                None => return captured,
            };
            for i in 1..=run {
                if let Some(byte) = self.assembler.push(i == run) {
                    if self.shared.store_capture_byte(captured, byte) {
                        captured += 1;
                    } else {
                        self.overflow += 1;
                    }
                }
            }
        }
    }
}
