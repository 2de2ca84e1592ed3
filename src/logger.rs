use std::{collections::BTreeMap, path::Path};

use tracing::{level_filters::LevelFilter, Level};

use crate::{
    appenders::Appender,
    config::LogConfig,
    error::{ConfigError, LogError},
    record::Record,
};

/// 設定に従って、ログレコードをアペンダーに振り分けるロガー
///
/// グローバルな状態は持たない。プロセスの起動時に作成し、`Arc`で共有して、
/// ログを出力するコンポーネントに渡す。
#[derive(Debug)]
pub struct Logger {
    appenders: Vec<(String, Appender)>,
    root: Route,
    loggers: BTreeMap<String, Route>,
}

#[derive(Debug)]
struct Route {
    level: Option<LevelFilter>,
    appenders: Vec<usize>,
    additive: bool,
}

impl Logger {
    /// 検証済みの設定から`Logger`を作成する。
    pub fn new(config: &LogConfig) -> Self {
        let appenders: Vec<(String, Appender)> = config
            .appenders
            .iter()
            .map(|(name, spec)| (name.clone(), Appender::from_spec(spec)))
            .collect();
        let indices = |names: &[String]| -> Vec<usize> {
            names
                .iter()
                .filter_map(|name| appenders.iter().position(|(n, _)| n == name))
                .collect()
        };

        let root = Route {
            level: Some(config.root.level),
            appenders: indices(&config.root.appenders),
            additive: false,
        };
        let loggers = config
            .loggers
            .iter()
            .map(|(name, spec)| {
                let route = Route {
                    level: spec.level,
                    appenders: indices(&spec.appenders),
                    additive: spec.additive,
                };
                (name.clone(), route)
            })
            .collect();

        Self {
            appenders,
            root,
            loggers,
        }
    }

    /// 設定ファイルを読み込んで、`Logger`を作成する。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::new(&LogConfig::load(path)?))
    }

    pub fn appender(&self, name: &str) -> Option<&Appender> {
        self.appenders
            .iter()
            .find_map(|(n, appender)| (n == name).then_some(appender))
    }

    /// ターゲットに適用するレベルを返却する。
    ///
    /// ターゲットに最も近いロガーのレベルを使用し、どのロガーもレベルを
    /// 指定していない場合は、ルートロガーのレベルを使用する。
    pub fn level_for(&self, target: &str) -> LevelFilter {
        ancestors(target)
            .filter_map(|name| self.loggers.get(name))
            .find_map(|route| route.level)
            .or(self.root.level)
            .unwrap_or(LevelFilter::OFF)
    }

    /// どのターゲットでも出力され得る、最も詳細なレベルを返却する。
    pub fn max_level(&self) -> LevelFilter {
        self.loggers
            .values()
            .filter_map(|route| route.level)
            .chain(self.root.level)
            .max()
            .unwrap_or(LevelFilter::OFF)
    }

    pub fn enabled(&self, level: Level, target: &str) -> bool {
        level <= self.level_for(target)
    }

    /// レコードを、ターゲットに対応するすべてのアペンダーに書き込む。
    ///
    /// 1つのアペンダーが失敗しても、残りのアペンダーには書き込む。
    ///
    /// # 戻り値
    ///
    /// 最初に失敗したアペンダーのエラー。
    pub fn log(&self, record: &Record<'_>) -> Result<(), LogError> {
        if !self.enabled(record.level(), record.target()) {
            return Ok(());
        }

        let mut result = Ok(());
        for index in self.route(record.target()) {
            let (name, appender) = &self.appenders[index];
            if let Err(source) = appender.append(record) {
                if result.is_ok() {
                    result = Err(LogError {
                        appender: name.clone(),
                        source,
                    });
                }
            }
        }

        result
    }

    pub fn flush(&self) -> Result<(), LogError> {
        let mut result = Ok(());
        for (name, appender) in &self.appenders {
            if let Err(source) = appender.flush() {
                if result.is_ok() {
                    result = Err(LogError {
                        appender: name.clone(),
                        source,
                    });
                }
            }
        }

        result
    }

    /// バッファーを書き出して、すべてのファイルを閉じる。
    ///
    /// `Arc`で共有していても呼び出せる。閉じた後に書き込まれたレコードは、
    /// 既存のファイルに追記する。
    pub fn shutdown(&self) -> Result<(), LogError> {
        let mut result = Ok(());
        for (name, appender) in &self.appenders {
            if let Err(source) = appender.close() {
                if result.is_ok() {
                    result = Err(LogError {
                        appender: name.clone(),
                        source,
                    });
                }
            }
        }

        result
    }

    /// ターゲットのレコードを書き込むアペンダーのインデックスを返却する。
    fn route(&self, target: &str) -> Vec<usize> {
        let mut indices = Vec::new();
        let mut additive = true;

        let routes = ancestors(target).filter_map(|name| self.loggers.get(name));
        for route in routes.chain(std::iter::once(&self.root)) {
            if !additive {
                break;
            }
            for index in &route.appenders {
                if !indices.contains(index) {
                    indices.push(*index);
                }
            }
            additive = route.additive;
        }

        indices
    }
}

/// `a::b::c`に対して、`a::b::c`、`a::b`、`a`の順に返却する。
fn ancestors(target: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(target), |name| name.rfind("::").map(|i| &name[..i]))
}
