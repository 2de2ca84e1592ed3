use time::OffsetDateTime;
use tracing::Level;

/// アペンダーに渡すログレコード。
#[derive(Debug, Clone)]
pub struct Record<'a> {
    level: Level,
    target: &'a str,
    module_path: Option<&'a str>,
    file: Option<&'a str>,
    line: Option<u32>,
    message: &'a str,
    timestamp: OffsetDateTime,
}

impl<'a> Record<'a> {
    /// 現在時刻をタイムスタンプとする`Record`を作成する。
    ///
    /// # 引数
    ///
    /// - level: ログレベル。
    /// - target: ログの出力対象（通常はモジュールパス）。
    /// - message: メッセージ。
    ///
    /// # 戻り値
    ///
    /// `Record`インスタンス。
    pub fn new(level: Level, target: &'a str, message: &'a str) -> Self {
        Self {
            level,
            target,
            module_path: None,
            file: None,
            line: None,
            message,
            timestamp: now(),
        }
    }

    pub fn with_location(mut self, file: &'a str, line: u32) -> Self {
        self.file = Some(file);
        self.line = Some(line);
        self
    }

    pub fn with_module_path(mut self, module_path: &'a str) -> Self {
        self.module_path = Some(module_path);
        self
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn target(&self) -> &'a str {
        self.target
    }

    pub fn module_path(&self) -> Option<&'a str> {
        self.module_path
    }

    pub fn file(&self) -> Option<&'a str> {
        self.file
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn message(&self) -> &'a str {
        self.message
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }
}

/// ローカル時刻を返却する。
///
/// ローカルのオフセットを取得できない環境では、UTCを返却する。
fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
