//! Controller
//!
//! ニブルイメージを所有し、共有領域を通じてPhase TrackerとBit Engineを監視する。
//! - ヘッドが動いたらエンジンを止めてトラックバッファを差し替える
//! - 書き込みが起きたらキャプチャを検証し、イメージとトラックバッファにマージする
//!
//! 共有領域の各フィールドは書き手が1つだけ。ControllerはトラックバッファとPAUSE、
//! 書き込みフラグのクリアだけを書く。

use crate::disk_log::{dump_bytes, log_track_loaded, log_write_merged};
use crate::gcr::{verify_data_field, GcrError, DATA_FIELD_LEN, DATA_FIELD_OFFSET, EPILOGUE};
use crate::image::{FormatIssue, ImageError, NibbleImage, TRACKS};
use crate::shared::{SharedState, WRITE_DATA_CAPACITY};
use crate::skew::SECTORS_PER_TRACK;
use crate::timing::{Delay, Timing};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// キャプチャに期待するバイト数（データフィールド + エピローグ）
const CAPTURE_LEN: usize = DATA_FIELD_LEN + EPILOGUE.len();

/// デフォルトのポーリング間隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(10);

/// キャプチャの整合性の問題（報告のみ、マージは行う）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureIssue {
    /// データフィールドに足りない
    ShortCapture { count: usize },
    /// エピローグがDE AA EBでない
    BadEpilogue { found: [u8; 3] },
    /// データフィールドのデコード/チェックサム失敗
    DataField(GcrError),
    /// キャプチャバッファがあふれた
    Overflow,
}

impl fmt::Display for CaptureIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureIssue::ShortCapture { count } => {
                write!(f, "only {} byte(s) captured, {} expected", count, DATA_FIELD_LEN)
            }
            CaptureIssue::BadEpilogue { found } => write!(
                f,
                "bad epilogue {:02X} {:02X} {:02X}",
                found[0], found[1], found[2]
            ),
            CaptureIssue::DataField(e) => write!(f, "data field: {}", e),
            CaptureIssue::Overflow => f.write_str("capture buffer overflowed"),
        }
    }
}

/// マージ結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub track: u8,
    pub sector: u8,
    pub byte_count: usize,
    pub issues: Vec<CaptureIssue>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// pollで起きたこと
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub track_loaded: Option<u8>,
    pub sector_sent: Option<u8>,
    pub merged: Option<MergeReport>,
}

/// Controllerの状態
pub struct ControllerState {
    image: NibbleImage,
    shared: Arc<SharedState>,
    timing: Timing,
    poll_interval: Duration,
    /// トラックバッファに入っているトラック
    loaded_track: u8,
    /// 前回見たセクタ番号
    prev_sector: u8,
    /// トラック差し替え回数
    swaps: u32,
}

impl ControllerState {
    /// イメージを受け取り、トラック0をトラックバッファに入れる
    ///
    /// エンジン起動前に呼ぶので、差し替えマージンは待たない。
    pub fn new(image: NibbleImage, shared: Arc<SharedState>, timing: Timing) -> Self {
        let prev_sector = shared.sector();
        let mut state = ControllerState {
            image,
            shared,
            timing,
            poll_interval: DEFAULT_POLL_INTERVAL,
            loaded_track: 0,
            prev_sector,
            swaps: 0,
        };
        state.shared.set_paused(true);
        state.copy_track(0);
        state.shared.set_paused(false);
        state
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn image(&self) -> &NibbleImage {
        &self.image
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn loaded_track(&self) -> u8 {
        self.loaded_track
    }

    pub fn swaps(&self) -> u32 {
        self.swaps
    }

    /// トラックバッファに1トラック分コピーする（PAUSE中に呼ぶこと）
    fn copy_track(&mut self, track: u8) {
        let sectors = match self.image.track(track as usize) {
            Ok(sectors) => sectors,
            Err(e) => {
                log::error!("Cannot load track {}: {}", track, e);
                return;
            }
        };
        for (s, nib) in sectors.iter().enumerate() {
            if let Err(e) = self.shared.store_track_sector(s, nib) {
                log::error!("Track buffer write failed for T={} S={}: {}", track, s, e);
            }
        }
        self.loaded_track = track;
    }

    /// エンジンを止め、1セクタ分待ってからトラックを差し替える
    pub fn swap_track<D: Delay>(&mut self, track: u8, delay: &mut D) {
        let track = track.min(TRACKS as u8 - 1);
        self.shared.set_paused(true);
        delay.wait(self.timing.sector_time());
        self.copy_track(track);
        self.shared.set_paused(false);
        self.swaps += 1;
        log_track_loaded(track, self.swaps);
    }

    /// イメージを差し替え、トラック0を入れ直す。前のイメージを返す
    pub fn install_image<D: Delay>(&mut self, image: NibbleImage, delay: &mut D) -> NibbleImage {
        let previous = std::mem::replace(&mut self.image, image);
        self.swap_track(0, delay);
        previous
    }

    /// ファイルからイメージを読み込んで差し替える
    ///
    /// 読み込みに失敗したら現在のイメージをそのまま使い続ける。
    pub fn load_image<P: AsRef<Path>, D: Delay>(
        &mut self,
        path: P,
        delay: &mut D,
    ) -> Result<Vec<FormatIssue>, ImageError> {
        let (image, issues) = NibbleImage::load(path.as_ref(), self.image.volume())?;
        for issue in &issues {
            log::warn!("{}: {}", path.as_ref().display(), issue);
        }
        let previous = self.install_image(image, delay);
        if previous.is_modified() {
            log::warn!("Replaced an image with unsaved writes");
        }
        Ok(issues)
    }

    /// 現在のイメージを保存する
    pub fn save_image<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ImageError> {
        self.image.save(path)
    }

    /// キャプチャバッファの内容を現在のトラックにマージする
    ///
    /// エピローグやチェックサムに問題があっても報告だけしてマージする。
    pub fn merge_capture(&mut self) -> MergeReport {
        let track = self.loaded_track;
        let sector = self.shared.sector() % SECTORS_PER_TRACK as u8;
        let byte_count = self.shared.write_count() as usize;
        let capture = self.shared.capture(CAPTURE_LEN);
        let field = &capture[..DATA_FIELD_LEN];

        let mut issues = Vec::new();
        if byte_count < DATA_FIELD_LEN {
            issues.push(CaptureIssue::ShortCapture { count: byte_count });
        }
        // Engineは容量を超えた分も数えて公開する
        if byte_count > WRITE_DATA_CAPACITY {
            issues.push(CaptureIssue::Overflow);
        }
        let found = [capture[DATA_FIELD_LEN], capture[DATA_FIELD_LEN + 1], capture[DATA_FIELD_LEN + 2]];
        if found != EPILOGUE {
            issues.push(CaptureIssue::BadEpilogue { found });
        }

        self.shared.set_paused(true);
        match self.image.sector_mut(track as usize, sector as usize) {
            Ok(nib) => nib[DATA_FIELD_OFFSET..DATA_FIELD_OFFSET + DATA_FIELD_LEN].copy_from_slice(field),
            Err(e) => log::error!("Cannot merge write: {}", e),
        }
        if let Err(e) = self.shared.write_track_bytes(sector as usize, DATA_FIELD_OFFSET, field) {
            log::error!("Track buffer write failed for T={} S={}: {}", track, sector, e);
        }
        self.shared.set_paused(false);

        if let Err(e) = verify_data_field(field) {
            issues.push(CaptureIssue::DataField(e));
        }

        self.image.set_modified();
        self.shared.clear_write_occurred();

        for issue in &issues {
            log::warn!("Write to T={} S={}: {}", track, sector, issue);
        }
        if !issues.is_empty() {
            dump_bytes("capture", &self.shared.capture(byte_count.max(CAPTURE_LEN)));
        }
        log_write_merged(track, sector, issues.is_empty());

        MergeReport { track, sector, byte_count, issues }
    }

    /// 1回分のポーリング
    ///
    /// 書き込みのマージを先に行う（キャプチャ時のトラックに書くため）。
    pub fn poll<D: Delay>(&mut self, delay: &mut D) -> PollReport {
        let mut report = PollReport::default();

        if self.shared.write_occurred() {
            report.merged = Some(self.merge_capture());
        }

        let track = self.shared.track().min(TRACKS as u8 - 1);
        if track != self.loaded_track {
            self.swap_track(track, delay);
            report.track_loaded = Some(track);
        }

        let sector = self.shared.sector();
        if sector != self.prev_sector {
            self.prev_sector = sector;
            report.sector_sent = Some(sector);
        }

        report
    }

    /// runningがfalseになるまでポーリングを続ける
    pub fn run<D: Delay>(&mut self, delay: &mut D, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            self.poll(delay);
            delay.wait(self.poll_interval);
        }
        if self.image.is_modified() {
            log::warn!("Controller stopped with unsaved writes");
        }
    }
}
