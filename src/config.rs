use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::OnceLock,
};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, level_filters::LevelFilter};

use crate::{
    encoder::{PatternEncoder, DEFAULT_PATTERN},
    error::{ConfigError, ConfigReferenceError},
    policy::{FixedWindowRoller, SizeTrigger},
};

/// ルートロガーの名前。エラーメッセージで使用する。
pub const ROOT_LOGGER: &str = "root";

/// 検証済みのログ設定
///
/// プロセスの起動時に1度だけ作成し、その後は変更しない。
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub appenders: BTreeMap<String, AppenderSpec>,
    pub root: RootLogger,
    pub loggers: BTreeMap<String, LoggerSpec>,
}

#[derive(Debug, Clone)]
pub enum AppenderSpec {
    Console(ConsoleSpec),
    RollingFile(RollingFileSpec),
}

#[derive(Debug, Clone)]
pub struct ConsoleSpec {
    pub encoder: PatternEncoder,
    pub target: ConsoleTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct RollingFileSpec {
    pub path: PathBuf,
    pub append: bool,
    pub encoder: PatternEncoder,
    pub trigger: SizeTrigger,
    pub roller: FixedWindowRoller,
}

#[derive(Debug, Clone)]
pub struct RootLogger {
    pub level: LevelFilter,
    pub appenders: Vec<String>,
}

/// ターゲットごとのロガー
///
/// `level`が`None`の場合は、親のロガーのレベルを引き継ぐ。
#[derive(Debug, Clone)]
pub struct LoggerSpec {
    pub level: Option<LevelFilter>,
    pub appenders: Vec<String>,
    pub additive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    appenders: BTreeMap<String, RawAppender>,
    root: RawRoot,
    #[serde(default)]
    loggers: BTreeMap<String, RawLogger>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAppender {
    kind: String,
    target: Option<ConsoleTarget>,
    encoder: Option<RawEncoder>,
    path: Option<PathBuf>,
    append: Option<bool>,
    policy: Option<RawPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEncoder {
    kind: Option<String>,
    pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicy {
    kind: Option<String>,
    trigger: Option<RawTrigger>,
    roller: Option<RawRoller>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTrigger {
    kind: String,
    limit: Option<RawLimit>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLimit {
    Bytes(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRoller {
    kind: String,
    pattern: Option<String>,
    count: Option<i64>,
    base: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRoot {
    level: Option<String>,
    #[serde(default)]
    appenders: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogger {
    level: Option<String>,
    #[serde(default)]
    appenders: Vec<String>,
    #[serde(default = "default_additive")]
    additive: bool,
}

fn default_additive() -> bool {
    true
}

impl LogConfig {
    /// 設定ファイルを読み込む。
    ///
    /// # 引数
    ///
    /// * path: YAML形式の設定ファイルのパス。
    ///
    /// # 戻り値
    ///
    /// 検証済みの`LogConfig`インスタンス。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = document.parse::<Self>()?;
        debug!(
            "loaded logging configuration from {:?} ({} appenders)",
            path,
            config.appenders.len()
        );

        Ok(config)
    }

    /// YAML形式の文字列から設定を作成する。
    pub fn from_yaml_str(document: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(document)?;

        let appenders = raw
            .appenders
            .into_iter()
            .map(|(name, appender)| {
                let spec = appender_spec(&name, appender)?;
                Ok((name, spec))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let root = RootLogger {
            level: match raw.root.level {
                Some(level) => parse_level(ROOT_LOGGER, &level)?,
                None => LevelFilter::DEBUG,
            },
            appenders: raw.root.appenders,
        };
        check_references(ROOT_LOGGER, &root.appenders, &appenders)?;

        let loggers = raw
            .loggers
            .into_iter()
            .map(|(name, logger)| {
                let level = logger
                    .level
                    .map(|level| parse_level(&name, &level))
                    .transpose()?;
                check_references(&name, &logger.appenders, &appenders)?;
                let spec = LoggerSpec {
                    level,
                    appenders: logger.appenders,
                    additive: logger.additive,
                };
                Ok((name, spec))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        Ok(Self {
            appenders,
            root,
            loggers,
        })
    }
}

impl FromStr for LogConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml_str(s)
    }
}

fn check_references(
    logger: &str,
    names: &[String],
    appenders: &BTreeMap<String, AppenderSpec>,
) -> Result<(), ConfigError> {
    match names.iter().find(|name| !appenders.contains_key(*name)) {
        Some(name) => Err(ConfigReferenceError {
            logger: logger.to_string(),
            appender: name.clone(),
        }
        .into()),
        None => Ok(()),
    }
}

fn parse_level(logger: &str, value: &str) -> Result<LevelFilter, ConfigError> {
    value
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| ConfigError::InvalidLevel {
            logger: logger.to_string(),
            value: value.to_string(),
        })
}

fn appender_spec(name: &str, raw: RawAppender) -> Result<AppenderSpec, ConfigError> {
    let encoder = encoder(name, raw.encoder)?;

    match raw.kind.as_str() {
        "console" => {
            let inapplicable = [
                ("path", raw.path.is_some()),
                ("append", raw.append.is_some()),
                ("policy", raw.policy.is_some()),
            ];
            reject_inapplicable(name, "console", &inapplicable)?;

            Ok(AppenderSpec::Console(ConsoleSpec {
                encoder,
                target: raw.target.unwrap_or_default(),
            }))
        }
        "rolling_file" => {
            reject_inapplicable(name, "rolling_file", &[("target", raw.target.is_some())])?;

            let path = raw.path.ok_or_else(|| missing(name, "path"))?;
            let policy = raw.policy.ok_or_else(|| missing(name, "policy"))?;
            if let Some(kind) = policy.kind.filter(|kind| kind != "compound") {
                return Err(unknown_kind(name, "policy kind", kind));
            }
            let trigger = policy
                .trigger
                .ok_or_else(|| missing(name, "policy.trigger"))?;
            let roller = policy
                .roller
                .ok_or_else(|| missing(name, "policy.roller"))?;
            let trigger = size_trigger(name, trigger)?;
            let roller = fixed_window_roller(name, roller)?;

            Ok(AppenderSpec::RollingFile(RollingFileSpec {
                path,
                append: raw.append.unwrap_or(true),
                encoder,
                trigger,
                roller,
            }))
        }
        _ => Err(ConfigError::UnknownAppenderKind {
            appender: name.to_string(),
            kind: raw.kind,
        }),
    }
}

/// 種類に関係しないフィールドが指定されている場合はエラーとする。
fn reject_inapplicable(
    appender: &str,
    kind: &'static str,
    fields: &[(&'static str, bool)],
) -> Result<(), ConfigError> {
    match fields.iter().find(|(_, present)| *present) {
        Some((field, _)) => Err(ConfigError::InapplicableField {
            appender: appender.to_string(),
            kind,
            field: *field,
        }),
        None => Ok(()),
    }
}

fn encoder(name: &str, raw: Option<RawEncoder>) -> Result<PatternEncoder, ConfigError> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(PatternEncoder::default()),
    };
    if let Some(kind) = raw.kind.filter(|kind| kind != "pattern") {
        return Err(unknown_kind(name, "encoder kind", kind));
    }

    let pattern = raw.pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
    PatternEncoder::new(pattern).map_err(|source| ConfigError::InvalidEncoderPattern {
        appender: name.to_string(),
        source,
    })
}

fn size_trigger(name: &str, raw: RawTrigger) -> Result<SizeTrigger, ConfigError> {
    if raw.kind != "size" {
        return Err(unknown_kind(name, "trigger kind", raw.kind));
    }

    let (limit, value) = match raw.limit.ok_or_else(|| missing(name, "policy.trigger.limit"))? {
        RawLimit::Bytes(bytes) => (Some(bytes), bytes.to_string()),
        RawLimit::Text(text) => (parse_size(&text), text),
    };
    match limit {
        Some(limit) if limit > 0 => Ok(SizeTrigger::new(limit)),
        _ => Err(ConfigError::InvalidSizeLimit {
            appender: name.to_string(),
            value,
        }),
    }
}

fn fixed_window_roller(name: &str, raw: RawRoller) -> Result<FixedWindowRoller, ConfigError> {
    if raw.kind != "fixed_window" {
        return Err(unknown_kind(name, "roller kind", raw.kind));
    }

    let pattern = raw
        .pattern
        .ok_or_else(|| missing(name, "policy.roller.pattern"))?;
    let count = raw.count.ok_or_else(|| missing(name, "policy.roller.count"))?;
    let count = u32::try_from(count)
        .ok()
        .filter(|count| *count >= 1)
        .ok_or_else(|| ConfigError::InvalidRollerValue {
            appender: name.to_string(),
            field: "policy.roller.count",
            value: count,
        })?;
    let base = raw.base.unwrap_or(0);
    let base = u32::try_from(base).map_err(|_| ConfigError::InvalidRollerValue {
        appender: name.to_string(),
        field: "policy.roller.base",
        value: base,
    })?;

    FixedWindowRoller::new(&pattern, count, base).map_err(|source| {
        ConfigError::InvalidRollerPattern {
            appender: name.to_string(),
            pattern,
            source,
        }
    })
}

fn missing(appender: &str, field: &'static str) -> ConfigError {
    ConfigError::MissingField {
        appender: appender.to_string(),
        field,
    }
}

fn unknown_kind(appender: &str, field: &'static str, kind: String) -> ConfigError {
    ConfigError::UnknownKind {
        appender: appender.to_string(),
        field,
        kind,
    }
}

/// `"30 mb"`のような、単位付きのサイズをバイト数に変換する。
///
/// 単位は大文字と小文字を区別しない。`kb`、`mb`、`gb`、`tb`は10進数
/// （`mb`は1,000,000バイト）、`kib`、`mib`、`gib`、`tib`は2進数
/// （`mib`は1,048,576バイト）で換算する。単位を省略した場合はバイトとする。
///
/// # 戻り値
///
/// バイト数。書式が不正な場合やオーバーフローする場合は`None`。
pub fn parse_size(text: &str) -> Option<u64> {
    static SIZE: OnceLock<Regex> = OnceLock::new();
    let re = SIZE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*([A-Za-z]*)\s*$").expect("size regex is valid")
    });

    let caps = re.captures(text)?;
    let number: u64 = caps[1].parse().ok()?;
    let multiplier: u64 = match caps[2].to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        _ => return None,
    };

    number.checked_mul(multiplier)
}
