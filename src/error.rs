use std::{io, path::PathBuf};

use thiserror::Error;

/// 設定の読み込み時に発生するエラー。
///
/// いずれも致命的なエラーで、ホストプロセスは起動を中止するべきである。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("appender `{appender}`: unknown appender kind `{kind}`")]
    UnknownAppenderKind { appender: String, kind: String },

    #[error("appender `{appender}`: unknown {field} `{kind}`")]
    UnknownKind {
        appender: String,
        field: &'static str,
        kind: String,
    },

    #[error("appender `{appender}`: missing field `{field}`")]
    MissingField {
        appender: String,
        field: &'static str,
    },

    #[error("appender `{appender}`: invalid size limit `{value}`")]
    InvalidSizeLimit { appender: String, value: String },

    #[error("appender `{appender}`: invalid roller pattern `{pattern}`: {source}")]
    InvalidRollerPattern {
        appender: String,
        pattern: String,
        #[source]
        source: RollerError,
    },

    #[error("appender `{appender}`: invalid value {value} for `{field}`")]
    InvalidRollerValue {
        appender: String,
        field: &'static str,
        value: i64,
    },

    #[error("appender `{appender}`: invalid encoder pattern: {source}")]
    InvalidEncoderPattern {
        appender: String,
        #[source]
        source: PatternError,
    },

    #[error("appender `{appender}`: field `{field}` does not apply to `{kind}` appenders")]
    InapplicableField {
        appender: String,
        kind: &'static str,
        field: &'static str,
    },

    #[error("logger `{logger}`: invalid level `{value}`")]
    InvalidLevel { logger: String, value: String },

    #[error(transparent)]
    Reference(#[from] ConfigReferenceError),
}

/// エンコーダーのパターンが不正である。
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("unmatched `}}`")]
    UnmatchedBrace,

    #[error("empty placeholder")]
    EmptyPlaceholder,

    #[error("missing `}}` after placeholder `{0}`")]
    UnclosedPlaceholder(String),

    #[error("unknown placeholder `{0}`")]
    UnknownPlaceholder(String),

    #[error("placeholder `{0}` does not take arguments")]
    UnexpectedArgument(String),

    #[error("missing `)` after argument")]
    UnclosedArgument,

    #[error("`{0}` requires a nested pattern")]
    MissingNestedPattern(String),

    #[error("missing `)` after highlighted pattern")]
    UnclosedHighlight,

    #[error("missing maximum width after `.`")]
    MissingMaxWidth,

    #[error("unexpected `{0}` in format spec")]
    UnexpectedSpecChar(char),

    #[error("unterminated format spec")]
    UnterminatedSpec,

    #[error("unknown timezone `{0}`")]
    UnknownTimezone(String),

    #[error("unsupported date specifier in `{0}`")]
    UnsupportedDateSpecifier(String),

    #[error("invalid date format `{format}`: {source}")]
    InvalidDateFormat {
        format: String,
        #[source]
        source: time::error::InvalidFormatDescription,
    },
}

/// ローラーのパターンまたはウィンドウが不正である。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RollerError {
    #[error("missing `{{}}` index placeholder")]
    MissingPlaceholder,

    #[error("more than one `{{}}` index placeholder")]
    MultiplePlaceholders,

    #[error("count must be at least 1")]
    ZeroCount,

    #[error("index window overflows")]
    WindowOverflow,
}

/// ロガーが存在しないアペンダーを参照している。
#[derive(Debug, Error)]
#[error("logger `{logger}` references unknown appender `{appender}`")]
pub struct ConfigReferenceError {
    pub logger: String,
    pub appender: String,
}

/// アペンダーの書き込み時に発生するエラー。
///
/// 呼び出し元は、レコードを破棄するか、エラーを伝搬するかを選択できる。
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write log record to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to rotate {path}: {source}")]
    Rotate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write log record to console: {0}")]
    Console(#[source] io::Error),
}

/// `Logger`がアペンダーへの書き込みに失敗したときのエラー。
#[derive(Debug, Error)]
#[error("appender `{appender}` failed: {source}")]
pub struct LogError {
    pub appender: String,
    #[source]
    pub source: SinkError,
}
