//! disk2if - Disk II Interface
//!
//! Version 0.1
//!
//! ディスクイメージの変換・検証ツール。インターフェース本体と同じ
//! GCRコーデックとスキューテーブルを使う。
//!
//! # 使用方法
//! ```text
//! disk2if verify dos33.dsk
//! disk2if nibblize dos33.dsk dos33.nib
//! disk2if convert prodos.po prodos.dsk
//! disk2if dump dos33.dsk 17 0
//! ```

use disk2if::config::Config;
use disk2if::disk_log::{self, parse_log_level};
use disk2if::gcr::decode_sector;
use disk2if::image::{NibbleImage, TRACKS};
use disk2if::skew::{SectorOrder, SECTORS_PER_TRACK};

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// disk2if - Apple II Disk II Interface
#[derive(Parser, Debug)]
#[command(name = "disk2if")]
#[command(version = "0.1.0")]
#[command(about = "Apple II Disk II interface tools", long_about = None)]
struct Args {
    /// 設定ファイルのパス
    #[arg(short, long)]
    config: Option<String>,

    /// ディスクログレベル: none, track, sector, write, nibble, all
    /// 複数指定可: track+write
    #[arg(long)]
    disk_log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 35x16x374バイトのニブルイメージを書き出す
    Nibblize {
        image: String,
        output: PathBuf,
    },
    /// 全セクタをエンコード、デコードしてファイルと比較する
    Verify {
        image: Option<String>,
    },
    /// 出力ファイルの拡張子が示すセクタ順で保存し直す
    Convert {
        input: String,
        output: PathBuf,
    },
    /// 1セクタ分のニブルデータを表示する
    Dump {
        image: String,
        track: usize,
        /// 物理セクタ
        sector: usize,
    },
}

/// イメージを読み込み、問題があれば表示する
fn load_image(config: &Config, name: &str) -> Result<NibbleImage, String> {
    let path = config.resolve_path(name);
    let (image, issues) = NibbleImage::load(&path, config.volume).map_err(|e| e.to_string())?;
    for issue in &issues {
        log::warn!("{}: {}", path.display(), issue);
    }
    Ok(image)
}

fn nibblize(config: &Config, name: &str, output: &Path) -> Result<(), String> {
    let image = load_image(config, name)?;
    let nibbles = image.nibbles();
    fs::write(output, &nibbles).map_err(|e| format!("{}: {}", output.display(), e))?;
    println!("{} -> {} ({} bytes)", name, output.display(), nibbles.len());
    Ok(())
}

fn verify(config: &Config, name: &str) -> Result<(), String> {
    let path = config.resolve_path(name);
    let original = fs::read(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let image = load_image(config, name)?;

    // 各物理セクタのアドレスフィールドを確認
    let mut bad = 0usize;
    for track in 0..TRACKS {
        for physical in 0..SECTORS_PER_TRACK {
            let decoded = image
                .sector(track, physical)
                .map_err(|e| e.to_string())
                .and_then(|nib| decode_sector(nib).map_err(|e| e.to_string()));
            match decoded {
                Ok(d) if d.track as usize == track && d.sector as usize == physical => {}
                Ok(d) => {
                    bad += 1;
                    log::error!("T={} S={}: address field says T={} S={}", track, physical, d.track, d.sector);
                }
                Err(e) => {
                    bad += 1;
                    log::error!("T={} S={}: {}", track, physical, e);
                }
            }
        }
    }
    if bad > 0 {
        return Err(format!("{} sector(s) failed to decode", bad));
    }

    let data = image.to_logical(image.order()).map_err(|e| e.to_string())?;
    let len = original.len().min(data.len());
    if original.len() != data.len() || original[..len] != data[..len] {
        let first = (0..len).find(|&i| original[i] != data[i]).unwrap_or(len);
        return Err(format!("contents differ at byte offset {}", first));
    }
    println!("{}: {} sectors OK ({:?} order)", name, TRACKS * SECTORS_PER_TRACK, image.order());
    Ok(())
}

fn convert(config: &Config, input: &str, output: &Path) -> Result<(), String> {
    let mut image = load_image(config, input)?;
    let order = SectorOrder::from_path(output).unwrap_or(SectorOrder::ProDos);
    image.save_as(output, order).map_err(|e| e.to_string())?;
    println!("{} ({:?}) -> {} ({:?})", input, image.order(), output.display(), order);
    Ok(())
}

fn dump(config: &Config, name: &str, track: usize, sector: usize) -> Result<(), String> {
    let image = load_image(config, name)?;
    let nib = image.sector(track, sector).map_err(|e| e.to_string())?;
    println!("T={} S={} ({} bytes)", track, sector, nib.len());
    for (row, chunk) in nib.chunks(16).enumerate() {
        let line: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        println!("{:03X}: {}", row * 16, line.join(" "));
    }
    match decode_sector(nib) {
        Ok(d) => println!("volume={} track={} sector={} checksum OK", d.volume, d.track, d.sector),
        Err(e) => println!("decode error: {}", e),
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    let (config, config_path) = Config::load_with_options(args.config.as_deref());
    log::debug!("Config: {}", config_path.display());

    // ディスクログレベルを設定（コマンドライン優先）
    let disk_log_names = args.disk_log.as_deref().unwrap_or(&config.disk_log);
    disk_log::set_log_level(parse_log_level(disk_log_names));

    let result = match &args.command {
        Command::Nibblize { image, output } => nibblize(&config, image, output),
        Command::Verify { image } => match image.as_deref().or(config.startup_image.as_deref()) {
            Some(name) => verify(&config, name),
            None => Err("no image given and no startup_image configured".to_string()),
        },
        Command::Convert { input, output } => convert(&config, input, output),
        Command::Dump { image, track, sector } => dump(&config, image, *track, *sector),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
