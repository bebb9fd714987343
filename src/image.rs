//! ディスクイメージ
//!
//! .dsk/.do（DOS順）と.po（ProDOS順）の143,360バイトのイメージを読み込み、
//! 35トラック x 16セクタ x 374バイトのニブルイメージとしてメモリに保持する。
//! 保存はその逆変換で、全セクタをデコードしてファイル順に並べ直す。

use crate::gcr::{decode_sector, encode_sector, GcrError, LogicalSector, NibbleSector, LOGICAL_SECTOR_LEN};
use crate::skew::{SectorOrder, SECTORS_PER_TRACK};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// トラック数
pub const TRACKS: usize = 35;
/// 1トラックのバイト数（ファイル上）
pub const TRACK_SIZE: usize = SECTORS_PER_TRACK * LOGICAL_SECTOR_LEN;
/// イメージファイルのサイズ
pub const IMAGE_SIZE: usize = TRACKS * TRACK_SIZE;
/// デフォルトのボリューム番号
pub const DEFAULT_VOLUME: u8 = 254;

/// イメージの読み書きエラー
#[derive(Debug)]
pub enum ImageError {
    /// ファイルを開けない/書けない
    Io { path: PathBuf, source: io::Error },
    /// セクタがデコードできない（sectorは物理セクタ）
    Decode { track: u8, sector: u8, source: GcrError },
    /// 範囲外のトラック/セクタ
    Geometry { track: usize, sector: usize },
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageError::Io { source, .. } => Some(source),
            ImageError::Decode { source, .. } => Some(source),
            ImageError::Geometry { .. } => None,
        }
    }
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            ImageError::Decode { track, sector, source } => {
                write!(f, "T={} S={}: {}", track, sector, source)
            }
            ImageError::Geometry { track, sector } => {
                write!(f, "T={} S={} is outside the disk geometry", track, sector)
            }
        }
    }
}

/// 読み込み時の問題（報告のみ、読み込みは続行）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatIssue {
    /// ファイルが短く、このセクタのデータが足りない（空セクタで置き換え）
    ShortFile { track: u8, sector: u8, available: usize },
    /// 143,360バイトを超えた分は無視
    TrailingBytes { extra: usize },
    /// 拡張子から順序を判定できない（ProDOS順として扱う）
    UnknownExtension { ext: String },
}

impl fmt::Display for FormatIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatIssue::ShortFile { track, sector, available } => write!(
                f,
                "file too short for T={} S={} ({} of {} bytes present), sector left blank",
                track, sector, available, LOGICAL_SECTOR_LEN
            ),
            FormatIssue::TrailingBytes { extra } => {
                write!(f, "{} byte(s) past the end of a 35 track image ignored", extra)
            }
            FormatIssue::UnknownExtension { ext } => {
                write!(f, "unknown image extension '{}', assuming ProDOS order", ext)
            }
        }
    }
}

/// メモリ上のニブルイメージ
#[derive(Clone)]
pub struct NibbleImage {
    /// track * 16 + 物理セクタ
    sectors: Vec<NibbleSector>,
    order: SectorOrder,
    volume: u8,
    modified: bool,
}

impl fmt::Debug for NibbleImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NibbleImage")
            .field("order", &self.order)
            .field("volume", &self.volume)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

impl NibbleImage {
    /// 全セクタ0のイメージ
    pub fn blank(order: SectorOrder, volume: u8) -> Self {
        let (image, _) = Self::from_logical(&vec![0u8; IMAGE_SIZE], order, volume);
        image
    }

    /// ファイル順のバイト列からニブルイメージを作る
    ///
    /// 物理セクタpにはファイルセクタ`order.translate(p)`が入る。
    pub fn from_logical(data: &[u8], order: SectorOrder, volume: u8) -> (Self, Vec<FormatIssue>) {
        let mut issues = Vec::new();
        let mut sectors = Vec::with_capacity(TRACKS * SECTORS_PER_TRACK);
        let blank = [0u8; LOGICAL_SECTOR_LEN];

        for track in 0..TRACKS {
            for physical in 0..SECTORS_PER_TRACK {
                let file_sector = order.translate(physical as u8) as usize;
                let offset = track * TRACK_SIZE + file_sector * LOGICAL_SECTOR_LEN;

                let logical: &LogicalSector = match data
                    .get(offset..offset + LOGICAL_SECTOR_LEN)
                    .and_then(|s| s.try_into().ok())
                {
                    Some(sector) => sector,
                    None => {
                        issues.push(FormatIssue::ShortFile {
                            track: track as u8,
                            sector: file_sector as u8,
                            available: data.len().saturating_sub(offset).min(LOGICAL_SECTOR_LEN),
                        });
                        &blank
                    }
                };
                sectors.push(encode_sector(logical, volume, track as u8, physical as u8));
            }
        }

        if data.len() > IMAGE_SIZE {
            issues.push(FormatIssue::TrailingBytes { extra: data.len() - IMAGE_SIZE });
        }
        // ShortFileはトラック順に並べる
        issues.sort_by_key(|issue| match issue {
            FormatIssue::ShortFile { track, sector, .. } => (*track as usize) * SECTORS_PER_TRACK + *sector as usize,
            _ => usize::MAX,
        });

        let image = NibbleImage { sectors, order, volume, modified: false };
        (image, issues)
    }

    /// イメージファイルを読み込む
    ///
    /// 拡張子でセクタ順を決める（.dsk/.do: DOS、.po: ProDOS、その他: ProDOSとして報告）。
    pub fn load<P: AsRef<Path>>(path: P, volume: u8) -> Result<(Self, Vec<FormatIssue>), ImageError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })?;

        let mut issues = Vec::new();
        let order = match SectorOrder::from_path(path) {
            Some(order) => order,
            None => {
                let ext = path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default();
                issues.push(FormatIssue::UnknownExtension { ext });
                SectorOrder::ProDos
            }
        };

        let (image, format_issues) = Self::from_logical(&data, order, volume);
        issues.extend(format_issues);
        Ok((image, issues))
    }

    pub fn order(&self) -> SectorOrder {
        self.order
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// 読み込み/保存以降に書き込みがあったか
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    fn index(track: usize, sector: usize) -> Result<usize, ImageError> {
        if track >= TRACKS || sector >= SECTORS_PER_TRACK {
            return Err(ImageError::Geometry { track, sector });
        }
        Ok(track * SECTORS_PER_TRACK + sector)
    }

    /// 物理セクタを参照
    pub fn sector(&self, track: usize, sector: usize) -> Result<&NibbleSector, ImageError> {
        Ok(&self.sectors[Self::index(track, sector)?])
    }

    pub fn sector_mut(&mut self, track: usize, sector: usize) -> Result<&mut NibbleSector, ImageError> {
        let index = Self::index(track, sector)?;
        Ok(&mut self.sectors[index])
    }

    /// 1トラック分（物理セクタ順）
    pub fn track(&self, track: usize) -> Result<&[NibbleSector], ImageError> {
        let start = Self::index(track, 0)?;
        Ok(&self.sectors[start..start + SECTORS_PER_TRACK])
    }

    /// 全セクタを連結したニブルデータ（232,960バイト）
    pub fn nibbles(&self) -> Vec<u8> {
        self.sectors.iter().flat_map(|s| s.iter().copied()).collect()
    }

    /// 指定した順序でファイルイメージに戻す
    ///
    /// ファイルセクタfは物理セクタ`order.untranslate(f)`からデコードする。
    /// デコードできないセクタがあれば中止する。
    pub fn to_logical(&self, order: SectorOrder) -> Result<Vec<u8>, ImageError> {
        let mut data = vec![0u8; IMAGE_SIZE];
        for track in 0..TRACKS {
            for file_sector in 0..SECTORS_PER_TRACK {
                let physical = order.untranslate(file_sector as u8) as usize;
                let decoded = decode_sector(self.sector(track, physical)?).map_err(|source| {
                    ImageError::Decode { track: track as u8, sector: physical as u8, source }
                })?;
                let offset = track * TRACK_SIZE + file_sector * LOGICAL_SECTOR_LEN;
                data[offset..offset + LOGICAL_SECTOR_LEN].copy_from_slice(&decoded.data);
            }
        }
        Ok(data)
    }

    /// 拡張子が示す順序で保存する（判定できなければProDOS順）
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ImageError> {
        let order = SectorOrder::from_path(path.as_ref()).unwrap_or(SectorOrder::ProDos);
        self.save_as(path, order)
    }

    /// 順序を指定して保存する。失敗した場合ファイルは書かない
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P, order: SectorOrder) -> Result<(), ImageError> {
        let path = path.as_ref();
        let data = self.to_logical(order)?;
        fs::write(path, data).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })?;
        self.modified = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcr::DATA_FIELD_OFFSET;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("disk2if_{}_{}", std::process::id(), name))
    }

    fn random_image(seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = vec![0u8; IMAGE_SIZE];
        rng.fill(&mut data[..]);
        data
    }

    #[test]
    fn test_zero_po_image_sector_zero() {
        let path = temp_path("zero.po");
        fs::write(&path, vec![0u8; IMAGE_SIZE]).unwrap();
        let (image, issues) = NibbleImage::load(&path, DEFAULT_VOLUME).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(issues.is_empty());
        assert_eq!(image.order(), SectorOrder::ProDos);
        let decoded = decode_sector(image.sector(0, 0).unwrap()).unwrap();
        assert_eq!(decoded.data, [0u8; 256]);
        assert_eq!((decoded.volume, decoded.track, decoded.sector), (254, 0, 0));
    }

    #[test]
    fn test_physical_slot_holds_skewed_file_sector() {
        // 各ファイルセクタの先頭にトラックとセクタ番号を入れる
        let mut data = vec![0u8; IMAGE_SIZE];
        for track in 0..TRACKS {
            for s in 0..SECTORS_PER_TRACK {
                let offset = track * TRACK_SIZE + s * LOGICAL_SECTOR_LEN;
                data[offset] = track as u8;
                data[offset + 1] = s as u8;
            }
        }
        let (image, _) = NibbleImage::from_logical(&data, SectorOrder::Dos, DEFAULT_VOLUME);
        for physical in 0..SECTORS_PER_TRACK {
            let decoded = decode_sector(image.sector(7, physical).unwrap()).unwrap();
            assert_eq!(decoded.sector, physical as u8);
            assert_eq!(decoded.data[0], 7);
            assert_eq!(decoded.data[1], SectorOrder::Dos.translate(physical as u8));
        }
    }

    #[test]
    fn test_save_is_inverse_of_load() {
        for (name, seed) in [("rt.dsk", 1u64), ("rt.po", 2u64)] {
            let data = random_image(seed);
            let src = temp_path(name);
            let dst = temp_path(&format!("out_{}", name));
            fs::write(&src, &data).unwrap();

            let (mut image, issues) = NibbleImage::load(&src, DEFAULT_VOLUME).unwrap();
            assert!(issues.is_empty());
            image.set_modified();
            image.save(&dst).unwrap();
            assert!(!image.is_modified());
            let saved = fs::read(&dst).unwrap();

            fs::remove_file(&src).unwrap();
            fs::remove_file(&dst).unwrap();
            assert_eq!(saved, data, "{}", name);
        }
    }

    #[test]
    fn test_convert_between_orders() {
        let data = random_image(3);
        let (mut image, _) = NibbleImage::from_logical(&data, SectorOrder::Dos, DEFAULT_VOLUME);
        let po = temp_path("convert.po");
        image.save(&po).unwrap();

        let (reloaded, _) = NibbleImage::load(&po, DEFAULT_VOLUME).unwrap();
        fs::remove_file(&po).unwrap();
        assert_eq!(reloaded.to_logical(SectorOrder::Dos).unwrap(), data);
        assert_ne!(reloaded.to_logical(SectorOrder::ProDos).unwrap(), data);
    }

    #[test]
    fn test_short_file_reports_sectors() {
        let data = vec![0x11u8; IMAGE_SIZE - 300];
        let (image, issues) = NibbleImage::from_logical(&data, SectorOrder::Dos, DEFAULT_VOLUME);
        assert_eq!(
            issues,
            vec![
                FormatIssue::ShortFile { track: 34, sector: 14, available: 212 },
                FormatIssue::ShortFile { track: 34, sector: 15, available: 0 },
            ]
        );
        // 足りないセクタは空、それ以外はそのまま
        let last = SectorOrder::Dos.untranslate(15) as usize;
        assert_eq!(decode_sector(image.sector(34, last).unwrap()).unwrap().data, [0u8; 256]);
        assert_eq!(decode_sector(image.sector(34, 0).unwrap()).unwrap().data, [0x11u8; 256]);
    }

    #[test]
    fn test_trailing_bytes_and_unknown_extension() {
        let path = temp_path("odd.img");
        fs::write(&path, vec![0u8; IMAGE_SIZE + 10]).unwrap();
        let (image, issues) = NibbleImage::load(&path, DEFAULT_VOLUME).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(image.order(), SectorOrder::ProDos);
        assert_eq!(
            issues,
            vec![
                FormatIssue::UnknownExtension { ext: "img".to_string() },
                FormatIssue::TrailingBytes { extra: 10 },
            ]
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = temp_path("missing.dsk");
        match NibbleImage::load(&path, DEFAULT_VOLUME) {
            Err(ImageError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {:?}", other.map(|(i, _)| i)),
        }
    }

    #[test]
    fn test_corrupt_sector_aborts_save() {
        let mut image = NibbleImage::blank(SectorOrder::Dos, DEFAULT_VOLUME);
        image.sector_mut(3, 5).unwrap()[DATA_FIELD_OFFSET + 100] = 0xD5;

        match image.to_logical(SectorOrder::Dos) {
            Err(ImageError::Decode { track, sector, source }) => {
                assert_eq!((track, sector), (3, 5));
                assert_eq!(source, GcrError::OutOfAlphabet { offset: 100, value: 0xD5 });
            }
            other => panic!("unexpected result {:?}", other.map(|d| d.len())),
        }

        let path = temp_path("corrupt.dsk");
        assert!(image.save(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_geometry_checked() {
        let image = NibbleImage::blank(SectorOrder::ProDos, DEFAULT_VOLUME);
        assert!(matches!(image.sector(35, 0), Err(ImageError::Geometry { track: 35, sector: 0 })));
        assert!(matches!(image.sector(0, 16), Err(ImageError::Geometry { .. })));
        assert_eq!(image.track(34).unwrap().len(), SECTORS_PER_TRACK);
        assert_eq!(image.nibbles().len(), TRACKS * SECTORS_PER_TRACK * 374);
    }
}
