//! 設定ファイル管理モジュール
//!
//! インターフェースの設定をJSON形式で永続化

use crate::image::DEFAULT_VOLUME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 設定ファイルのデフォルトファイル名
const CONFIG_FILENAME: &str = "disk2if_config.json";

/// 実行ファイルのディレクトリを取得
pub fn get_exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 相対パスを指定されたベースディレクトリからの絶対パスに解決
pub fn resolve_path_with_base(base: &str, relative: &str) -> PathBuf {
    let path = Path::new(relative);
    if path.is_absolute() {
        path.to_path_buf()
    } else if base.is_empty() {
        get_exe_dir().join(relative)
    } else {
        let base_path = Path::new(base);
        if base_path.is_absolute() {
            base_path.join(relative)
        } else {
            get_exe_dir().join(base).join(relative)
        }
    }
}

/// 設定ファイルのパスを取得
pub fn get_config_path() -> PathBuf {
    get_exe_dir().join(CONFIG_FILENAME)
}

/// インターフェース設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// ディスクイメージディレクトリ（相対パスの基準）
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    /// 起動時に読み込むイメージ
    #[serde(default)]
    pub startup_image: Option<String>,
    /// アドレスフィールドに書くボリューム番号
    #[serde(default = "default_volume")]
    pub volume: u8,
    /// ログカテゴリ（"track+write" など）
    #[serde(default = "default_disk_log")]
    pub disk_log: String,
}

fn default_image_dir() -> String { "disk_images".to_string() }
fn default_volume() -> u8 { DEFAULT_VOLUME }
fn default_disk_log() -> String { "none".to_string() }

impl Default for Config {
    fn default() -> Self {
        Config {
            image_dir: default_image_dir(),
            startup_image: None,
            volume: default_volume(),
            disk_log: default_disk_log(),
        }
    }
}

impl Config {
    /// オプション指定で設定ファイルを読み込む
    /// config_path が指定されていればそれを、なければ実行ファイルディレクトリの
    /// disk2if_config.json を使う
    pub fn load_with_options(config_path: Option<&str>) -> (Self, PathBuf) {
        let config_file_path = match config_path {
            Some(path) => PathBuf::from(path),
            None => get_config_path(),
        };
        let config = Self::load_from(&config_file_path);
        (config, config_file_path)
    }

    /// 指定したパスから設定を読み込む
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Failed to parse config {:?}: {}, using defaults", path.as_ref(), e);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// 指定したパスに設定を保存する
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, json)
            .map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(())
    }

    /// 相対パスのイメージをimage_dirからの絶対パスに解決
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        resolve_path_with_base(&self.image_dir, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("disk2if_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{ "volume": 17 }"#).unwrap();
        assert_eq!(config.volume, 17);
        assert_eq!(config.image_dir, "disk_images");
        assert_eq!(config.disk_log, "none");
        assert_eq!(config.startup_image, None);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("config.json");
        let config = Config {
            startup_image: Some("games.dsk".to_string()),
            volume: 1,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        let (loaded, used) = Config::load_with_options(path.to_str());
        fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(used, path);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        // 以前の設定ファイルにあったタイミング項目は読み飛ばす
        let config: Config =
            serde_json::from_str(r#"{ "cycle_ns": 10, "poll_interval_us": 50, "disk_log": "write" }"#).unwrap();
        assert_eq!(config.disk_log, "write");
        assert_eq!(config.volume, DEFAULT_VOLUME);
    }

    #[test]
    fn test_broken_file_falls_back() {
        let path = temp_path("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let config = Config::load_from(&path);
        fs::remove_file(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_resolve_path() {
        let config = Config { image_dir: "/srv/disks".to_string(), ..Config::default() };
        assert_eq!(config.resolve_path("a.po"), PathBuf::from("/srv/disks/a.po"));
        assert_eq!(config.resolve_path("/tmp/b.dsk"), PathBuf::from("/tmp/b.dsk"));
    }
}
