//! タイミング
//!
//! プロトコルの各間隔はPRUの200MHzサイクル数で定義し、1サイクルの長さ
//! （`cycle_ns`）を変えることで全体をスケールする。ビットの有効性は間隔の
//! 比率で決まるので、比率は常に保たれる。

use std::time::{Duration, Instant};

/// 待機プリミティブ
///
/// スケジューラに頼らず、すべての待ちはこのwaitで表現する。
pub trait Delay {
    fn wait(&mut self, duration: Duration);
}

/// 単調クロックでビジーウェイト
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinDelay;

impl Delay for SpinDelay {
    #[inline]
    fn wait(&mut self, duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }
}

/// 1のビットでRDATをLowにする時間 (1.75 us)
pub const BIT_PULSE_CYCLES: u64 = 350;
/// ビット後のガード時間 (2.05 us)
pub const BIT_GUARD_CYCLES: u64 = 410;
/// セクタ送信前の待ち (10 us)
pub const SECTOR_LEAD_CYCLES: u64 = 2000;
/// 一時停止中のポーリング間隔 (1 us)
pub const PAUSE_POLL_CYCLES: u64 = 200;
/// ドライブ非選択時のポーリング間隔 (1 ms)
pub const IDLE_POLL_CYCLES: u64 = 200_000;
/// フェーズ入力の2回サンプリング間隔 (1 ms)
pub const PHASE_DEBOUNCE_CYCLES: u64 = 200_000;
/// 書き込み開始後、最初の同期バイトの00に届くまでの待ち (20.5 us)
pub const WRITE_SETTLE_CYCLES: u64 = 4100;
/// 同期エッジ読み飛ばし: 立ち上がり後の待ち (1 us)
pub const SYNC_RISE_HOLD_CYCLES: u64 = 200;
/// 同期エッジ読み飛ばし: 立ち下がり後の待ち
pub const SYNC_FALL_HOLD_CYCLES: u64 = 1;
/// 同期エッジ読み飛ばし中のポーリング間隔
pub const SYNC_SPIN_CYCLES: u64 = 20;
/// エッジ間隔計測のポーリング間隔 (0.5 us)
pub const EDGE_POLL_CYCLES: u64 = 100;

/// 1セクタの送信時間（サイクル）
pub const SECTOR_CYCLES: u64 =
    374 * 8 * (BIT_PULSE_CYCLES + BIT_GUARD_CYCLES) + SECTOR_LEAD_CYCLES;

/// 1サイクルのデフォルト長（200MHz）
pub const DEFAULT_CYCLE_NS: u64 = 5;

/// サイクル数から実時間への変換
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    cycle_ns: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(DEFAULT_CYCLE_NS)
    }
}

impl Timing {
    /// cycle_nsは1以上に丸める
    pub fn new(cycle_ns: u64) -> Self {
        Timing { cycle_ns: cycle_ns.max(1) }
    }

    pub fn cycle_ns(&self) -> u64 {
        self.cycle_ns
    }

    #[inline]
    pub fn cycles(&self, n: u64) -> Duration {
        Duration::from_nanos(n.saturating_mul(self.cycle_ns))
    }

    #[inline]
    pub fn bit_pulse(&self) -> Duration {
        self.cycles(BIT_PULSE_CYCLES)
    }

    #[inline]
    pub fn bit_guard(&self) -> Duration {
        self.cycles(BIT_GUARD_CYCLES)
    }

    pub fn sector_lead(&self) -> Duration {
        self.cycles(SECTOR_LEAD_CYCLES)
    }

    pub fn pause_poll(&self) -> Duration {
        self.cycles(PAUSE_POLL_CYCLES)
    }

    pub fn idle_poll(&self) -> Duration {
        self.cycles(IDLE_POLL_CYCLES)
    }

    pub fn phase_debounce(&self) -> Duration {
        self.cycles(PHASE_DEBOUNCE_CYCLES)
    }

    pub fn write_settle(&self) -> Duration {
        self.cycles(WRITE_SETTLE_CYCLES)
    }

    pub fn sync_rise_hold(&self) -> Duration {
        self.cycles(SYNC_RISE_HOLD_CYCLES)
    }

    pub fn sync_fall_hold(&self) -> Duration {
        self.cycles(SYNC_FALL_HOLD_CYCLES)
    }

    pub fn sync_spin(&self) -> Duration {
        self.cycles(SYNC_SPIN_CYCLES)
    }

    #[inline]
    pub fn edge_poll(&self) -> Duration {
        self.cycles(EDGE_POLL_CYCLES)
    }

    /// トラック差し替え前に待つマージン（1セクタ分）
    pub fn sector_time(&self) -> Duration {
        self.cycles(SECTOR_CYCLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let t = Timing::default();
        assert_eq!(t.bit_pulse(), Duration::from_nanos(1750));
        assert_eq!(t.bit_guard(), Duration::from_nanos(2050));
        assert_eq!(t.edge_poll(), Duration::from_nanos(500));
        assert_eq!(t.phase_debounce(), Duration::from_millis(1));
        // 1セクタは約11.4ms
        let sector = t.sector_time();
        assert!(sector > Duration::from_millis(11) && sector < Duration::from_millis(12));
    }

    #[test]
    fn test_scaling_keeps_ratios() {
        let slow = Timing::new(10);
        let fast = Timing::default();
        assert_eq!(slow.bit_pulse(), fast.bit_pulse() * 2);
        assert_eq!(slow.bit_guard(), fast.bit_guard() * 2);
        assert_eq!(Timing::new(0).cycle_ns(), 1);
    }

    #[test]
    fn test_spin_delay_waits() {
        let mut delay = SpinDelay;
        let start = Instant::now();
        delay.wait(Duration::from_micros(200));
        assert!(start.elapsed() >= Duration::from_micros(200));
    }
}
