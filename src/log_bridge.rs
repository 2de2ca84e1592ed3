//! `log`クレートから`Logger`へのブリッジ

use std::sync::Arc;

use log::{Log, Metadata, Record as LogRecord};
use tracing::{level_filters::LevelFilter, Level};

use crate::{layer::is_self_target, logger::Logger, record::Record};

/// `log`クレートのマクロで出力されたレコードを`Logger`に渡す。
#[derive(Debug, Clone)]
pub struct LogBridge {
    logger: Arc<Logger>,
}

impl LogBridge {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        !is_self_target(metadata.target())
            && self
                .logger
                .enabled(map_level(metadata.level()), metadata.target())
    }

    fn log(&self, record: &LogRecord<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = record.args().to_string();
        let mut bridged = Record::new(map_level(record.level()), record.target(), &message);
        if let (Some(file), Some(line)) = (record.file(), record.line()) {
            bridged = bridged.with_location(file, line);
        }
        if let Some(module_path) = record.module_path() {
            bridged = bridged.with_module_path(module_path);
        }

        // `Log::log`は結果を返せないので、標準エラー出力に報告する
        if let Err(err) = self.logger.log(&bridged) {
            eprintln!("{}", err);
        }
    }

    fn flush(&self) {
        if let Err(err) = self.logger.flush() {
            eprintln!("{}", err);
        }
    }
}

/// `LogBridge`を`log`クレートのロガーとして登録する。
///
/// 最大レベルは、設定されたロガーの中で最も詳細なレベルにする。
///
/// # 引数
///
/// * logger: レコードを振り分ける`Logger`。
///
/// # 戻り値
///
/// 既にロガーが登録されている場合は、`log::SetLoggerError`。
pub fn init_log_bridge(logger: Arc<Logger>) -> Result<(), log::SetLoggerError> {
    let max_level = map_level_filter(logger.max_level());
    // `log::set_logger`は`'static`な参照を要求する
    let bridge: &'static LogBridge = Box::leak(Box::new(LogBridge::new(logger)));
    log::set_logger(bridge)?;
    log::set_max_level(max_level);

    Ok(())
}

fn map_level(level: log::Level) -> Level {
    match level {
        log::Level::Error => Level::ERROR,
        log::Level::Warn => Level::WARN,
        log::Level::Info => Level::INFO,
        log::Level::Debug => Level::DEBUG,
        log::Level::Trace => Level::TRACE,
    }
}

fn map_level_filter(filter: LevelFilter) -> log::LevelFilter {
    match filter.into_level() {
        None => log::LevelFilter::Off,
        Some(Level::ERROR) => log::LevelFilter::Error,
        Some(Level::WARN) => log::LevelFilter::Warn,
        Some(Level::INFO) => log::LevelFilter::Info,
        Some(Level::DEBUG) => log::LevelFilter::Debug,
        Some(Level::TRACE) => log::LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use super::*;
    use crate::config::LogConfig;

    fn logger(dir: &Path) -> Arc<Logger> {
        let path = dir.join("trading.log");
        let pattern = dir.join("trading.{}.log");
        let document = format!(
            "appenders:\n  trading:\n    kind: rolling_file\n    path: '{}'\n    encoder:\n      pattern: \"{{l:<5.5}} {{f}}:{{L}} {{t}} - {{m}}{{n}}\"\n    policy:\n      trigger: {{ kind: size, limit: 30 mb }}\n      roller: {{ kind: fixed_window, pattern: '{}', count: 5, base: 1 }}\nroot:\n  level: info\n  appenders: [trading]\nloggers:\n  strategies::corridors:\n    level: debug\n",
            path.display(),
            pattern.display()
        );
        Arc::new(Logger::new(&LogConfig::from_yaml_str(&document).unwrap()))
    }

    #[test]
    fn test_map_level_filter() {
        assert_eq!(log::LevelFilter::Off, map_level_filter(LevelFilter::OFF));
        assert_eq!(log::LevelFilter::Warn, map_level_filter(LevelFilter::WARN));
        assert_eq!(log::LevelFilter::Trace, map_level_filter(LevelFilter::TRACE));
    }

    #[test]
    fn test_bridge_writes_log_records() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(dir.path());
        let bridge = LogBridge::new(Arc::clone(&logger));

        bridge.log(
            &LogRecord::builder()
                .args(format_args!("volume per order — {}", 0.5))
                .level(log::Level::Info)
                .target("strategies::order_utils")
                .file(Some("src/order_utils.rs"))
                .line(Some(112))
                .build(),
        );
        bridge.log(
            &LogRecord::builder()
                .args(format_args!("hidden"))
                .level(log::Level::Debug)
                .target("strategies::order_utils")
                .build(),
        );
        bridge.log(
            &LogRecord::builder()
                .args(format_args!("new cropped small corridor is empty"))
                .level(log::Level::Debug)
                .target("strategies::corridors")
                .file(Some("src/corridors.rs"))
                .line(Some(243))
                .build(),
        );
        bridge.flush();

        assert_eq!(
            "INFO  src/order_utils.rs:112 strategies::order_utils - volume per order — 0.5\n\
             DEBUG src/corridors.rs:243 strategies::corridors - new cropped small corridor is empty\n",
            fs::read_to_string(dir.path().join("trading.log")).unwrap()
        );
    }

    #[test]
    fn test_global_log_macros_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(dir.path());

        init_log_bridge(Arc::clone(&logger)).unwrap();
        assert_eq!(log::LevelFilter::Debug, log::max_level());

        log::error!(target: "trading_api::helpers", "request failed");
        log::debug!(target: "trading_api::helpers", "hidden");
        log::logger().flush();

        let content = fs::read_to_string(dir.path().join("trading.log")).unwrap();
        assert!(content.starts_with("ERROR "), "{:?}", content);
        assert!(content.ends_with("trading_api::helpers - request failed\n"));
        assert_eq!(1, content.lines().count());
    }
}
