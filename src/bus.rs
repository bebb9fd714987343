//! Disk IIインターフェースの信号線
//!
//! 入力:
//! - P0..P3  フェーズ（ステッパーモーター）
//! - EN-     ドライブ選択
//! - WREQ-   書き込み要求
//! - WSIG    書き込みデータ
//!
//! 出力:
//! - RDAT    読み取りデータ（1のビットでLowパルス）
//!
//! 実機ではGPIOレジスタの読み書きになる。極性の扱いは実装側で吸収し、
//! ここでは論理値（有効ならtrue）で受け渡す。

/// Phase Trackerが見る信号
pub trait PhaseLines {
    /// EN-がLow（ドライブが選択されている）
    fn drive_enabled(&self) -> bool;
    /// フェーズ入力 bit0=P0 .. bit3=P3
    fn phases(&self) -> u8;
}

/// Bit Engineが見る/駆動する信号
pub trait DataLines {
    /// EN-がLow（ドライブが選択されている）
    fn drive_enabled(&self) -> bool;
    /// WREQ-がLow（ホストが書き込み中）
    fn write_request(&self) -> bool;
    /// WSIGの現在のレベル
    fn write_signal(&self) -> bool;
    /// RDATをLowに引く（true）/ 解放する（false）
    fn set_read_pulse(&mut self, active: bool);
}
