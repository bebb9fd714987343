//! GCR (6-and-2) セクタコーデック
//!
//! 256バイトの論理セクタと、374バイトのニブルセクタ（同期・アドレス・データ・
//! エピローグを含むオンワイヤ形式）を相互変換する。
//!
//! ニブルセクタのレイアウト:
//! ```text
//!   0  FF 3F CF F3 FC          同期ストリーム
//!   5  D5 AA 96                アドレスプロローグ
//!   8  vol trk sec chk         4-and-4エンコード（各2バイト）
//!  16  DE AA EB                アドレスエピローグ
//!  19  3F CF F3 FC             同期ストリーム（部分）
//!  23  D5 AA AD                データプロローグ
//!  26  342 + 1                 6-and-2データ + チェックサム
//! 369  DE AA EB 00 00          データエピローグ（00は送信終端マーカ）
//! ```

use std::fmt;

/// 論理セクタのバイト数
pub const LOGICAL_SECTOR_LEN: usize = 256;
/// ニブルセクタのバイト数（同期、プロローグ、データ、全部込み）
pub const NIBBLE_SECTOR_LEN: usize = 374;
/// 6-and-2データシンボル数
pub const DATA_SYMBOLS: usize = 342;
/// データフィールド長（シンボル + チェックサム）
pub const DATA_FIELD_LEN: usize = DATA_SYMBOLS + 1;
/// データフィールド先頭オフセット
pub const DATA_FIELD_OFFSET: usize = 26;
/// データエピローグ先頭オフセット
pub const DATA_EPILOGUE_OFFSET: usize = DATA_FIELD_OFFSET + DATA_FIELD_LEN;

/// 下位2ビットを集める補助シンボル数
const AUX_SYMBOLS: usize = 0x56;

const VOLUME_OFFSET: usize = 8;
const TRACK_OFFSET: usize = 10;
const SECTOR_OFFSET: usize = 12;
const CHECKSUM_OFFSET: usize = 14;

const SYNC_STREAM: [u8; 5] = [0xFF, 0x3F, 0xCF, 0xF3, 0xFC];
const ADDRESS_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0x96];
const DATA_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0xAD];
/// アドレス/データ共通のエピローグ
pub const EPILOGUE: [u8; 3] = [0xDE, 0xAA, 0xEB];

/// 論理セクタ
pub type LogicalSector = [u8; LOGICAL_SECTOR_LEN];
/// ニブルセクタ
pub type NibbleSector = [u8; NIBBLE_SECTOR_LEN];

/// 6-and-2エンコーディングテーブル
pub const WRITE_TABLE: [u8; 64] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6,
    0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3,
    0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC,
    0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3,
    0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE,
    0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC,
    0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6,
    0xF7, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];

/// READ_TABLEでテーブル外を示す値
const NOT_IN_TABLE: u8 = 0xFF;

/// 6-and-2デコードテーブル（WRITE_TABLEの逆写像）
pub const READ_TABLE: [u8; 256] = build_read_table();

const fn build_read_table() -> [u8; 256] {
    let mut table = [NOT_IN_TABLE; 256];
    let mut i = 0;
    while i < WRITE_TABLE.len() {
        table[WRITE_TABLE[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// アドレスフィールドの項目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    Volume,
    Track,
    Sector,
    Checksum,
}

impl fmt::Display for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressField::Volume => f.write_str("volume"),
            AddressField::Track => f.write_str("track"),
            AddressField::Sector => f.write_str("sector"),
            AddressField::Checksum => f.write_str("checksum"),
        }
    }
}

/// デコードエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcrError {
    /// 4-and-4フィールドが0xAAマスクを満たさない
    AddressField { field: AddressField },
    /// アドレスチェックサム不一致
    AddressChecksum { expected: u8, found: u8 },
    /// 変換テーブル外のバイト（offsetはデータフィールド内の位置）
    OutOfAlphabet { offset: usize, value: u8 },
    /// データチェックサム不一致
    DataChecksum { expected: u8, found: u8 },
    /// データフィールド長が足りない
    BadLength { len: usize },
}

impl std::error::Error for GcrError {}

impl fmt::Display for GcrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcrError::AddressField { field } => {
                write!(f, "failed to decode {} field", field)
            }
            GcrError::AddressChecksum { expected, found } => {
                write!(f, "address checksum mismatch: expected {:02X}, found {:02X}", expected, found)
            }
            GcrError::OutOfAlphabet { offset, value } => {
                write!(f, "nibble {:02X} at data offset {} is not in the translate table", value, offset)
            }
            GcrError::DataChecksum { expected, found } => {
                write!(f, "data checksum mismatch: expected {:02X}, found {:02X}", expected, found)
            }
            GcrError::BadLength { len } => {
                write!(f, "data field too short: {} bytes ({} expected)", len, DATA_FIELD_LEN)
            }
        }
    }
}

/// デコード結果
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedSector {
    pub volume: u8,
    pub track: u8,
    pub sector: u8,
    pub data: LogicalSector,
}

impl fmt::Debug for DecodedSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedSector")
            .field("volume", &self.volume)
            .field("track", &self.track)
            .field("sector", &self.sector)
            .finish_non_exhaustive()
    }
}

/// 4-and-4エンコード
/// byte1 = 奇数ビット (D7,D5,D3,D1) + 0xAA
/// byte2 = 偶数ビット (D6,D4,D2,D0) + 0xAA
#[inline]
pub fn encode_4and4(value: u8) -> [u8; 2] {
    [(value >> 1) | 0xAA, value | 0xAA]
}

/// 4-and-4デコード。どちらかのバイトが0xAAマスクを満たさなければNone
#[inline]
pub fn decode_4and4(pair: [u8; 2]) -> Option<u8> {
    if pair[0] & 0xAA != 0xAA || pair[1] & 0xAA != 0xAA {
        return None;
    }
    Some(((pair[0] & 0x55) << 1) | (pair[1] & 0x55))
}

/// 出力位置iの6ビットシンボル（XOR前）
#[inline]
fn split_symbol(data: &LogicalSector, i: usize) -> u8 {
    if i >= AUX_SYMBOLS {
        // 上位6ビット
        return data[i - AUX_SYMBOLS] >> 2;
    }
    // 下位2ビット x 3（D0とD1は入れ替えて格納）
    let mut value = ((data[i] & 0x01) << 1) | ((data[i] & 0x02) >> 1);
    value |= ((data[i + AUX_SYMBOLS] & 0x01) << 3) | ((data[i + AUX_SYMBOLS] & 0x02) << 1);
    if i + 2 * AUX_SYMBOLS < LOGICAL_SECTOR_LEN {
        let b = data[i + 2 * AUX_SYMBOLS];
        value |= ((b & 0x01) << 5) | ((b & 0x02) << 3);
    }
    value
}

/// 256バイトを343バイトのデータフィールドに6-and-2エンコード
pub fn encode_data_field(data: &LogicalSector) -> [u8; DATA_FIELD_LEN] {
    let mut field = [0u8; DATA_FIELD_LEN];
    let mut prev = 0u8;
    for (i, out) in field.iter_mut().take(DATA_SYMBOLS).enumerate() {
        let value = split_symbol(data, i);
        *out = WRITE_TABLE[((value ^ prev) & 0x3F) as usize];
        prev = value;
    }
    // 最終チェックサム
    field[DATA_SYMBOLS] = WRITE_TABLE[(prev & 0x3F) as usize];
    field
}

/// 343バイトのデータフィールドを256バイトにデコード
///
/// 下位2ビットと上位6ビットは別々のシンボルから届くので、必ずORで書き込む。
pub fn decode_data_field(field: &[u8]) -> Result<LogicalSector, GcrError> {
    if field.len() < DATA_FIELD_LEN {
        return Err(GcrError::BadLength { len: field.len() });
    }

    let mut data = [0u8; LOGICAL_SECTOR_LEN];
    let mut prev = 0u8;
    for (i, &code) in field.iter().take(DATA_SYMBOLS).enumerate() {
        let symbol = READ_TABLE[code as usize];
        if symbol == NOT_IN_TABLE {
            return Err(GcrError::OutOfAlphabet { offset: i, value: code });
        }
        let value = symbol ^ prev;

        if i >= AUX_SYMBOLS {
            data[i - AUX_SYMBOLS] |= value << 2;
        } else {
            data[i] |= ((value >> 1) & 0x01) | ((value << 1) & 0x02);
            data[i + AUX_SYMBOLS] |= ((value >> 3) & 0x01) | ((value >> 1) & 0x02);
            if i + 2 * AUX_SYMBOLS < LOGICAL_SECTOR_LEN {
                data[i + 2 * AUX_SYMBOLS] |= ((value >> 5) & 0x01) | ((value >> 3) & 0x02);
            }
        }
        prev = value;
    }

    check_data_checksum(field[DATA_SYMBOLS], prev)?;
    Ok(data)
}

/// データフィールドのチェックサムだけを検証（ランニングXORの再計算）
pub fn verify_data_field(field: &[u8]) -> Result<(), GcrError> {
    if field.len() < DATA_FIELD_LEN {
        return Err(GcrError::BadLength { len: field.len() });
    }
    let mut prev = 0u8;
    for (i, &code) in field.iter().take(DATA_SYMBOLS).enumerate() {
        let symbol = READ_TABLE[code as usize];
        if symbol == NOT_IN_TABLE {
            return Err(GcrError::OutOfAlphabet { offset: i, value: code });
        }
        prev ^= symbol;
    }
    check_data_checksum(field[DATA_SYMBOLS], prev)
}

fn check_data_checksum(code: u8, expected: u8) -> Result<(), GcrError> {
    let found = READ_TABLE[code as usize];
    if found == NOT_IN_TABLE {
        return Err(GcrError::OutOfAlphabet { offset: DATA_SYMBOLS, value: code });
    }
    if found != expected {
        return Err(GcrError::DataChecksum { expected, found });
    }
    Ok(())
}

/// 256バイトのファイルセクタを374バイトのディスクセクタに変換
pub fn encode_sector(data: &LogicalSector, volume: u8, track: u8, sector: u8) -> NibbleSector {
    let mut nib = [0xFFu8; NIBBLE_SECTOR_LEN];
    let checksum = volume ^ track ^ sector;

    nib[0..5].copy_from_slice(&SYNC_STREAM);
    nib[5..8].copy_from_slice(&ADDRESS_PROLOGUE);
    nib[VOLUME_OFFSET..VOLUME_OFFSET + 2].copy_from_slice(&encode_4and4(volume));
    nib[TRACK_OFFSET..TRACK_OFFSET + 2].copy_from_slice(&encode_4and4(track));
    nib[SECTOR_OFFSET..SECTOR_OFFSET + 2].copy_from_slice(&encode_4and4(sector));
    nib[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&encode_4and4(checksum));
    nib[16..19].copy_from_slice(&EPILOGUE);
    nib[19..23].copy_from_slice(&SYNC_STREAM[1..]);
    nib[23..26].copy_from_slice(&DATA_PROLOGUE);

    nib[DATA_FIELD_OFFSET..DATA_EPILOGUE_OFFSET].copy_from_slice(&encode_data_field(data));

    nib[DATA_EPILOGUE_OFFSET..DATA_EPILOGUE_OFFSET + 3].copy_from_slice(&EPILOGUE);
    nib[DATA_EPILOGUE_OFFSET + 3] = 0x00;
    nib[DATA_EPILOGUE_OFFSET + 4] = 0x00;
    nib
}

fn address_byte(nib: &NibbleSector, offset: usize, field: AddressField) -> Result<u8, GcrError> {
    decode_4and4([nib[offset], nib[offset + 1]]).ok_or(GcrError::AddressField { field })
}

/// 374バイトのディスクセクタを256バイトのファイルセクタに変換
pub fn decode_sector(nib: &NibbleSector) -> Result<DecodedSector, GcrError> {
    let volume = address_byte(nib, VOLUME_OFFSET, AddressField::Volume)?;
    let track = address_byte(nib, TRACK_OFFSET, AddressField::Track)?;
    let sector = address_byte(nib, SECTOR_OFFSET, AddressField::Sector)?;
    let checksum = address_byte(nib, CHECKSUM_OFFSET, AddressField::Checksum)?;

    let expected = volume ^ track ^ sector;
    if checksum != expected {
        return Err(GcrError::AddressChecksum { expected, found: checksum });
    }

    let data = decode_data_field(&nib[DATA_FIELD_OFFSET..DATA_EPILOGUE_OFFSET])?;
    Ok(DecodedSector { volume, track, sector, data })
}
