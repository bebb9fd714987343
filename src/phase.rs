//! Phase Tracker
//!
//! 4本のフェーズ入力を監視してヘッド位置（トラック）を推定する。
//! phase_trackはハーフトラック単位（0-69）、トラックはその半分（0-34）。

use crate::bus::PhaseLines;
use crate::disk_log::log_track_change;
use crate::shared::SharedState;
use crate::timing::{Delay, Timing};
use std::sync::atomic::{AtomicBool, Ordering};

/// phase_trackの上限（トラック34）
pub const MAX_PHASE_TRACK: u8 = 69;

/// 起動直後の「前回フェーズ」。どの入力とも一致しないので最初のサンプルは必ず変化扱い
const NO_PHASE: u8 = 0x1F;

const PHASE_MASK: u8 = 0x0F;

/// フェーズ入力からトラックを追跡する
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    last_phase: u8,
    phase_track: u8,
    track: u8,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        PhaseTracker {
            last_phase: NO_PHASE,
            phase_track: 0,
            track: 0,
        }
    }

    /// ハーフトラック単位の位置
    pub fn phase_track(&self) -> u8 {
        self.phase_track
    }

    pub fn track(&self) -> u8 {
        self.track
    }

    /// デバウンス済みのサンプルを1つ処理する
    ///
    /// トラックが変わった場合のみ新しいトラックを返す。
    pub fn update(&mut self, sample: u8) -> Option<u8> {
        let sample = sample & PHASE_MASK;
        if sample == self.last_phase {
            return None;
        }
        self.last_phase = sample;

        // 現在噛み合っているフェーズ
        let cog = 1u8 << (self.phase_track % 4);

        if sample != 0 && sample & cog == 0 {
            let forward = ((cog << 1) | (cog >> 3)) & PHASE_MASK;
            let backward = ((cog >> 1) | (cog << 3)) & PHASE_MASK;

            if sample & forward != 0 {
                if self.phase_track < MAX_PHASE_TRACK {
                    self.phase_track += 1;
                }
            } else if sample & backward != 0 && self.phase_track > 0 {
                self.phase_track -= 1;
            }
        }

        let track = self.phase_track >> 1;
        if track != self.track {
            let old = self.track;
            self.track = track;
            log_track_change(old, track);
            return Some(track);
        }
        None
    }

    /// 1回分のポーリング
    ///
    /// ドライブ非選択なら何もせず待つ。選択中は約1ms間隔で2回サンプリングし、
    /// 一致した場合のみ採用する（グリッチ除去）。
    pub fn poll<L: PhaseLines, D: Delay>(
        &mut self,
        lines: &L,
        delay: &mut D,
        timing: &Timing,
        shared: &SharedState,
    ) -> Option<u8> {
        if !lines.drive_enabled() {
            delay.wait(timing.phase_debounce());
            return None;
        }

        let first = lines.phases() & PHASE_MASK;
        delay.wait(timing.phase_debounce());
        let second = lines.phases() & PHASE_MASK;

        if first != second {
            return None;
        }

        let changed = self.update(first);
        if let Some(track) = changed {
            shared.set_track(track);
        }
        changed
    }

    /// runningがfalseになるまでポーリングを続ける
    pub fn run<L: PhaseLines, D: Delay>(
        &mut self,
        lines: &L,
        delay: &mut D,
        timing: &Timing,
        shared: &SharedState,
        running: &AtomicBool,
    ) {
        while running.load(Ordering::Relaxed) {
            self.poll(lines, delay, timing, shared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::sim::{SimPhaseLines, VirtualClock};

    /// 1ステップ外向き（P0 -> P1 -> P2 -> P3 -> P0 ...）
    fn step_sequence(steps: usize, start: u8) -> Vec<u8> {
        (0..steps).map(|i| 1u8 << ((start as usize + i) % 4)).collect()
    }

    #[test]
    fn test_seek_outward_and_back() {
        let mut pt = PhaseTracker::new();
        // P0はcogと同じなので動かない
        assert_eq!(pt.update(0x01), None);
        assert_eq!(pt.phase_track(), 0);

        for p in step_sequence(4, 1) {
            pt.update(p);
        }
        // P1,P2,P3,P0 -> 4ハーフトラック
        assert_eq!(pt.phase_track(), 4);
        assert_eq!(pt.track(), 2);

        // 逆方向: P3, P2
        pt.update(0x08);
        pt.update(0x04);
        assert_eq!(pt.phase_track(), 2);
        assert_eq!(pt.track(), 1);
    }

    #[test]
    fn test_clamped_range() {
        let mut pt = PhaseTracker::new();
        // 下限: 後退方向（P3）を繰り返す
        for p in [0x08, 0x00, 0x08, 0x00] {
            pt.update(p);
        }
        assert_eq!(pt.phase_track(), 0);

        // 上限: 常に前進側の隣を入れる
        for _ in 0..200 {
            let cog = 1u8 << (pt.phase_track() % 4);
            pt.update(((cog << 1) | (cog >> 3)) & 0x0F);
            assert!(pt.phase_track() <= MAX_PHASE_TRACK);
            assert_eq!(pt.track(), pt.phase_track() >> 1);
        }
        assert_eq!(pt.phase_track(), MAX_PHASE_TRACK);
        assert_eq!(pt.track(), 34);
    }

    #[test]
    fn test_reports_only_track_changes() {
        let mut pt = PhaseTracker::new();
        assert_eq!(pt.update(0x02), None); // phase_track 1, track 0
        assert_eq!(pt.update(0x04), Some(1));
        assert_eq!(pt.update(0x04), None);
        assert_eq!(pt.update(0x00), None);
    }

    #[test]
    fn test_adjacent_pair_does_not_step() {
        let mut pt = PhaseTracker::new();
        // cog(P0)が含まれているので動かない
        pt.update(0x03);
        assert_eq!(pt.phase_track(), 0);
        pt.update(0x02);
        assert_eq!(pt.phase_track(), 1);
    }

    #[test]
    fn test_poll_rejects_glitch_and_publishes() {
        let clock = VirtualClock::new();
        let ms = 1_000_000;
        // 2ms-3msの境目で入力が変わるサンプルは捨てられる
        let lines = SimPhaseLines::new(
            clock.clone(),
            vec![(0, 0x00), (ms / 2, 0x02), (ms, 0x00), (3 * ms, 0x02), (6 * ms, 0x04)],
        );
        let shared = SharedState::new();
        let timing = Timing::default();
        let mut delay = clock.clone();
        let mut pt = PhaseTracker::new();

        // t=0: 0x00 / t=1ms: 0x00 -> 採用（変化だがステップなし）
        pt.poll(&lines, &mut delay, &timing, &shared);
        // t=1ms: 0x00 / t=2ms: 0x00
        pt.poll(&lines, &mut delay, &timing, &shared);
        assert_eq!(pt.phase_track(), 0);
        // t=2ms: 0x00 / t=3ms: 0x02 -> 不一致で破棄
        pt.poll(&lines, &mut delay, &timing, &shared);
        assert_eq!(pt.phase_track(), 0);
        // t=3ms / t=4ms: 0x02 -> 1
        pt.poll(&lines, &mut delay, &timing, &shared);
        assert_eq!(pt.phase_track(), 1);
        // t=4ms / t=5ms: 0x02 -> 変化なし
        pt.poll(&lines, &mut delay, &timing, &shared);
        // t=5ms: 0x02 / t=6ms: 0x04 -> 不一致
        pt.poll(&lines, &mut delay, &timing, &shared);
        // t=6ms / t=7ms: 0x04 -> 2, track 1
        assert_eq!(pt.poll(&lines, &mut delay, &timing, &shared), Some(1));
        assert_eq!(shared.track(), 1);
    }

    #[test]
    fn test_poll_idles_when_disabled() {
        let clock = VirtualClock::new();
        let lines = SimPhaseLines::new(clock.clone(), vec![(0, 0x02)]);
        lines.enabled.set(false);
        let shared = SharedState::new();
        let mut delay = clock.clone();
        let mut pt = PhaseTracker::new();
        assert_eq!(pt.poll(&lines, &mut delay, &Timing::default(), &shared), None);
        assert_eq!(pt.phase_track(), 0);
        assert!(clock.now() > 0);
    }
}
