//! Fixed Window Appender
//!
//! ----------------------------------------------------------------------------
//!
//! このクレートは、YAML形式のログ設定を読み込み、設定されたアペンダーにログを
//! 出力する。
//!
//! アペンダーには、以下の2種類がある。
//!
//! - `console`: 標準出力（または標準エラー出力）に書き込む。
//! - `rolling_file`: ファイルに書き込み、ファイルのサイズが上限を超えるときに、
//!   ファイルを切り替える。
//!
//! `rolling_file`は、切り替えたファイルを固定ウィンドウでアーカイブする。
//! アーカイブ数が最大数に達している場合は、最も古いアーカイブを削除する。
//! アーカイブのパターンが`.gz`で終わる場合は、gzipで圧縮する。
//!
//! ```yaml
//! appenders:
//!   trading:
//!     kind: rolling_file
//!     path: "log/trading.log"
//!     encoder:
//!       pattern: "{d(%Y-%m-%d %H:%M:%S)} {l:<5.5} {f}:{L} - {m}{n}"
//!     policy:
//!       trigger:
//!         kind: size
//!         limit: 30 mb
//!       roller:
//!         kind: fixed_window
//!         pattern: "log/trading.{}.log.gz"
//!         count: 5
//!         base: 1
//! root:
//!   level: info
//!   appenders:
//!     - trading
//! ```

pub mod appenders;
pub mod config;
pub mod encoder;
pub mod error;
pub mod layer;
pub mod log_bridge;
pub mod logger;
pub mod policy;
pub mod record;

pub use config::LogConfig;
pub use error::{
    ConfigError, ConfigReferenceError, LogError, PatternError, RollerError, SinkError,
};
pub use layer::LoggerLayer;
pub use log_bridge::{init_log_bridge, LogBridge};
pub use logger::Logger;
pub use record::Record;
