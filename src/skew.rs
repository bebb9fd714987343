//! セクタスキュー（ファイル内セクタ順と物理セクタ順の対応）
//!
//! 物理セクタ`p`にはファイルセクタ`skew[p]`が入る。保存時は逆テーブルで戻す。

use std::path::Path;

/// 1トラックあたりのセクタ数
pub const SECTORS_PER_TRACK: usize = 16;

/// DOS 3.3セクターインターリーブ (*.dsk, *.do)
const DOS_SECTOR_ORDER: [u8; SECTORS_PER_TRACK] = [
    0x00, 0x07, 0x0E, 0x06, 0x0D, 0x05, 0x0C, 0x04,
    0x0B, 0x03, 0x0A, 0x02, 0x09, 0x01, 0x08, 0x0F,
];

/// ProDOSセクターオーダー (*.po)
const PRODOS_SECTOR_ORDER: [u8; SECTORS_PER_TRACK] = [
    0x00, 0x08, 0x01, 0x09, 0x02, 0x0A, 0x03, 0x0B,
    0x04, 0x0C, 0x05, 0x0D, 0x06, 0x0E, 0x07, 0x0F,
];

const fn invert(table: &[u8; SECTORS_PER_TRACK]) -> [u8; SECTORS_PER_TRACK] {
    let mut inverse = [0u8; SECTORS_PER_TRACK];
    let mut i = 0;
    while i < SECTORS_PER_TRACK {
        inverse[table[i] as usize] = i as u8;
        i += 1;
    }
    inverse
}

const DOS_INVERSE: [u8; SECTORS_PER_TRACK] = invert(&DOS_SECTOR_ORDER);
const PRODOS_INVERSE: [u8; SECTORS_PER_TRACK] = invert(&PRODOS_SECTOR_ORDER);

/// ディスクイメージのセクタ順
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorOrder {
    /// DOS順（.dsk / .do）
    Dos,
    /// ProDOS順（.po）
    ProDos,
}

impl SectorOrder {
    /// 拡張子からセクタ順を判定（大文字小文字は区別しない）
    ///
    /// 判定できない場合はNone。呼び出し側はProDOS順として扱う。
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "dsk" | "do" => Some(SectorOrder::Dos),
            "po" => Some(SectorOrder::ProDos),
            _ => None,
        }
    }

    /// 物理セクタ -> ファイルセクタ
    #[inline]
    pub fn translate(self, physical: u8) -> u8 {
        match self {
            SectorOrder::Dos => dos_translate_sector(physical),
            SectorOrder::ProDos => prodos_translate_sector(physical),
        }
    }

    /// ファイルセクタ -> 物理セクタ
    #[inline]
    pub fn untranslate(self, file_sector: u8) -> u8 {
        let table = match self {
            SectorOrder::Dos => &DOS_INVERSE,
            SectorOrder::ProDos => &PRODOS_INVERSE,
        };
        table[file_sector as usize & 0x0F]
    }
}

/// DOS順の変換（物理セクタ -> ファイルセクタ）
#[inline]
pub fn dos_translate_sector(sector: u8) -> u8 {
    DOS_SECTOR_ORDER[sector as usize & 0x0F]
}

/// ProDOS順の変換（物理セクタ -> ファイルセクタ）
#[inline]
pub fn prodos_translate_sector(sector: u8) -> u8 {
    PRODOS_SECTOR_ORDER[sector as usize & 0x0F]
}
