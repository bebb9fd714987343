//! disk2if - Apple II Disk II Interface
//!
//! 実機のDisk IIドライブの代わりに信号を出し、ディスク内容を通常の
//! セクタ単位のファイルとして保持する。
//! - GCR (6-and-2) セクタコーデック
//! - フェーズ入力からのトラック追跡
//! - 自己クロックのビットシリアル送受信
//! - 共有領域を介したControllerとのハンドシェイク

pub mod gcr;
pub mod skew;
pub mod image;
pub mod shared;
pub mod timing;
pub mod bus;
pub mod phase;
pub mod engine;
pub mod controller;
pub mod disk_log;
pub mod config;
