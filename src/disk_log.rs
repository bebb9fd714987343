//! Disk II インターフェースのログシステム
//!
//! 原則:
//! 1. ログは「現象」ではなく「判断」を記録
//! 2. 状態遷移のみ記録（ビット単位の送受信は記録しない）
//! 3. レベル分離: TRACK / SECTOR / WRITE / NIBBLE
//!
//! 出力は`log`ファサード経由。エラーと整合性の問題はカテゴリに関係なく常に出す。

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// ログカテゴリ
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DiskLogLevel: u32 {
        /// ヘッド移動とトラック差し替え
        const TRACK  = 0b0001;
        /// セクタ送信とドライブ選択
        const SECTOR = 0b0010;
        /// 書き込みキャプチャとマージ
        const WRITE  = 0b0100;
        /// 生データダンプ
        const NIBBLE = 0b1000;
    }
}

/// グローバルログレベル
static LOG_LEVEL: AtomicU32 = AtomicU32::new(0);

/// ログレベルを設定
pub fn set_log_level(level: DiskLogLevel) {
    LOG_LEVEL.store(level.bits(), Ordering::Relaxed);
}

/// 現在のログレベルを取得
pub fn get_log_level() -> DiskLogLevel {
    DiskLogLevel::from_bits_truncate(LOG_LEVEL.load(Ordering::Relaxed))
}

/// ログレベルが有効かチェック
#[inline]
pub fn is_enabled(flag: DiskLogLevel) -> bool {
    (LOG_LEVEL.load(Ordering::Relaxed) & flag.bits()) != 0
}

/// "track+write" のような指定をパース。未知の名前は無視
pub fn parse_log_level(s: &str) -> DiskLogLevel {
    let mut level = DiskLogLevel::empty();
    for part in s.to_lowercase().split('+') {
        match part.trim() {
            "none" | "" => {}
            "track" => level |= DiskLogLevel::TRACK,
            "sector" => level |= DiskLogLevel::SECTOR,
            "write" => level |= DiskLogLevel::WRITE,
            "nibble" => level |= DiskLogLevel::NIBBLE,
            "all" => level = DiskLogLevel::all(),
            other => log::warn!("Unknown disk log category: {}", other),
        }
    }
    level
}

// ============================================================
// ログ出力関数
// ============================================================

/// [TRACK] ヘッド移動によるトラック変化
pub fn log_track_change(from: u8, to: u8) {
    if is_enabled(DiskLogLevel::TRACK) {
        log::info!("[TRACK] Head {} -> {}", from, to);
    }
}

/// [TRACK] トラックバッファ差し替え完了
pub fn log_track_loaded(track: u8, swaps: u32) {
    if is_enabled(DiskLogLevel::TRACK) {
        log::info!("[TRACK] Loaded T=${:02X} (swap #{})", track, swaps);
    }
}

/// [SECTOR] ドライブ選択状態の変化
pub fn log_drive_select(selected: bool) {
    if is_enabled(DiskLogLevel::SECTOR) {
        if selected {
            log::info!("[SECTOR] Drive selected");
        } else {
            log::info!("[SECTOR] Drive deselected");
        }
    }
}

/// [SECTOR] セクタ送信完了
pub fn log_sector_sent(sector: u8) {
    if is_enabled(DiskLogLevel::SECTOR) {
        log::debug!("[SECTOR] Sent S={}", sector);
    }
}

/// [WRITE] キャプチャ完了
pub fn log_write_captured(sector: u8, bytes: usize) {
    if is_enabled(DiskLogLevel::WRITE) {
        log::info!("[WRITE] Captured {} bytes during S={}", bytes, sector);
    }
}

/// [WRITE] マージ完了
pub fn log_write_merged(track: u8, sector: u8, clean: bool) {
    if is_enabled(DiskLogLevel::WRITE) {
        if clean {
            log::info!("[WRITE] Merged T={} S={}", track, sector);
        } else {
            log::info!("[WRITE] Merged T={} S={} (with integrity issues)", track, sector);
        }
    }
}

/// [NIBBLE] 生バイトのダンプ
pub fn dump_bytes(label: &str, bytes: &[u8]) {
    if !is_enabled(DiskLogLevel::NIBBLE) {
        return;
    }
    log::info!("[DUMP] {} ({} bytes):", label, bytes.len());
    for chunk in bytes.chunks(16) {
        let line: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        log::info!("[DUMP] {}", line.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("none"), DiskLogLevel::empty());
        assert_eq!(
            parse_log_level("Track+write"),
            DiskLogLevel::TRACK | DiskLogLevel::WRITE
        );
        assert_eq!(parse_log_level("all"), DiskLogLevel::all());
        assert_eq!(parse_log_level("bogus+sector"), DiskLogLevel::SECTOR);
    }

    #[test]
    fn test_log_level() {
        set_log_level(DiskLogLevel::TRACK | DiskLogLevel::SECTOR);
        assert!(is_enabled(DiskLogLevel::TRACK));
        assert!(is_enabled(DiskLogLevel::SECTOR));
        assert!(!is_enabled(DiskLogLevel::WRITE));
        assert!(!is_enabled(DiskLogLevel::NIBBLE));
        assert_eq!(get_log_level(), DiskLogLevel::TRACK | DiskLogLevel::SECTOR);
        set_log_level(DiskLogLevel::empty());
    }
}
