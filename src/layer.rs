use std::{
    fmt::{self, Write},
    sync::Arc,
};

use tracing::{
    field::{Field, Visit},
    Event, Metadata, Subscriber,
};
use tracing_subscriber::layer::{Context, Layer};

use crate::{logger::Logger, record::Record};

/// このクレート自身が出力するイベントのターゲット
const SELF_TARGET: &str = env!("CARGO_CRATE_NAME");

/// `tracing`のイベントを`Logger`に渡すレイヤー
///
/// ```no_run
/// use std::sync::Arc;
///
/// use fixed_window_appender::{Logger, LoggerLayer};
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let logger = Arc::new(Logger::load("log_config.yaml").unwrap());
/// let subscriber = tracing_subscriber::registry().with(LoggerLayer::new(logger));
/// tracing::subscriber::set_global_default(subscriber).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct LoggerLayer {
    logger: Arc<Logger>,
}

impl LoggerLayer {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for LoggerLayer {
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        // アペンダーの中から出力したイベントを、再びアペンダーに渡さない
        !is_self_target(metadata.target())
            && self.logger.enabled(*metadata.level(), metadata.target())
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_self_target(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.finish();

        let mut record = Record::new(*metadata.level(), metadata.target(), &message);
        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            record = record.with_location(file, line);
        }
        if let Some(module_path) = metadata.module_path() {
            record = record.with_module_path(module_path);
        }

        // イベントには呼び出し元がいないので、標準エラー出力に報告する
        if let Err(err) = self.logger.log(&record) {
            eprintln!("{}", err);
        }
    }
}

pub(crate) fn is_self_target(target: &str) -> bool {
    target
        .strip_prefix(SELF_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// `message`フィールドをメッセージとし、それ以外のフィールドを` key=value`として
/// 後ろに付け加える。
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(mut self) -> String {
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
