use std::{
    fs::{self, File, OpenOptions},
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::warn;

use crate::{
    config::{AppenderSpec, ConsoleSpec, ConsoleTarget, RollingFileSpec},
    encoder::PatternEncoder,
    error::SinkError,
    policy::{FixedWindowRoller, SizeTrigger},
    record::Record,
};

/// ログの出力先
///
/// 設定の`kind`に対応する、閉じた列挙型。
#[derive(Debug)]
pub enum Appender {
    Console(ConsoleAppender),
    RollingFile(RollingFileAppender),
}

impl Appender {
    /// 設定から`Appender`を作成する。
    ///
    /// ファイルは最初に書き込むときに開くため、この関数は失敗しない。
    pub fn from_spec(spec: &AppenderSpec) -> Self {
        match spec {
            AppenderSpec::Console(spec) => Self::Console(ConsoleAppender::new(spec)),
            AppenderSpec::RollingFile(spec) => Self::RollingFile(RollingFileAppender::new(spec)),
        }
    }

    pub fn append(&self, record: &Record<'_>) -> Result<(), SinkError> {
        match self {
            Self::Console(appender) => appender.append(record),
            Self::RollingFile(appender) => appender.append(record),
        }
    }

    pub fn flush(&self) -> Result<(), SinkError> {
        match self {
            Self::Console(appender) => appender.flush(),
            Self::RollingFile(appender) => appender.flush(),
        }
    }

    /// バッファーを書き出して、ファイルを閉じる。
    pub fn close(&self) -> Result<(), SinkError> {
        match self {
            Self::Console(appender) => appender.flush(),
            Self::RollingFile(appender) => appender.close(),
        }
    }
}

/// 標準出力または標準エラー出力に書き込むアペンダー
#[derive(Debug)]
pub struct ConsoleAppender {
    encoder: PatternEncoder,
    target: ConsoleTarget,
    ansi: bool,
}

impl ConsoleAppender {
    pub fn new(spec: &ConsoleSpec) -> Self {
        let ansi = match spec.target {
            ConsoleTarget::Stdout => io::stdout().is_terminal(),
            ConsoleTarget::Stderr => io::stderr().is_terminal(),
        };

        Self {
            encoder: spec.encoder.clone(),
            target: spec.target,
            ansi,
        }
    }

    /// レコードを整形して、ストリームのロックを取得したまま1行を書き込む。
    pub fn append(&self, record: &Record<'_>) -> Result<(), SinkError> {
        match self.target {
            ConsoleTarget::Stdout => self.write_to(&mut io::stdout().lock(), record),
            ConsoleTarget::Stderr => self.write_to(&mut io::stderr().lock(), record),
        }
    }

    fn write_to(&self, writer: &mut impl Write, record: &Record<'_>) -> Result<(), SinkError> {
        let line = self.encoder.encode(record, self.ansi);
        write_line(writer, line.as_bytes()).map_err(SinkError::Console)
    }

    pub fn flush(&self) -> Result<(), SinkError> {
        let result = match self.target {
            ConsoleTarget::Stdout => io::stdout().flush(),
            ConsoleTarget::Stderr => io::stderr().flush(),
        };

        result.map_err(SinkError::Console)
    }
}

fn write_line(writer: &mut impl Write, line: &[u8]) -> io::Result<()> {
    writer.write_all(line)?;
    writer.flush()
}

/// サイズでファイルを切り替えるアペンダー
///
/// 書き込み、サイズの確認及びファイルの切り替えは、1つのロックの中で行う。
/// このため、複数のスレッドから書き込まれても、上限を超えて書き込んだり、
/// 同時に切り替えたりすることはない。
#[derive(Debug)]
pub struct RollingFileAppender {
    path: PathBuf,
    append: bool,
    encoder: PatternEncoder,
    trigger: SizeTrigger,
    roller: FixedWindowRoller,
    state: Mutex<WriterState>,
}

/// ロックで保護する状態
///
/// `opened`は、一度でもファイルを開いたかを示す。`append`が`false`でも、
/// ファイルを空にするのは最初に開くときだけである。
#[derive(Debug, Default)]
struct WriterState {
    active: Option<LogWriter>,
    opened: bool,
}

/// アクティブなログファイルと、その書き込み済みサイズ
#[derive(Debug)]
struct LogWriter {
    file: File,
    len: u64,
}

impl RollingFileAppender {
    /// `RollingFileAppender`を作成する。
    ///
    /// # 引数
    ///
    /// * spec: ローリングファイルアペンダーの設定。
    ///
    /// # 戻り値
    ///
    /// `RollingFileAppender`インスタンス。ファイルは最初の書き込みで作成する。
    pub fn new(spec: &RollingFileSpec) -> Self {
        Self {
            path: spec.path.clone(),
            append: spec.append,
            encoder: spec.encoder.clone(),
            trigger: spec.trigger,
            roller: spec.roller.clone(),
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// レコードを整形してファイルに追記する。
    ///
    /// 追記するとサイズの上限を超える場合は、ファイルを切り替えてから、新しい
    /// ファイルに書き込む。
    pub fn append(&self, record: &Record<'_>) -> Result<(), SinkError> {
        let line = self.encoder.encode(record, false);
        let incoming = line.len() as u64;

        let mut state = self.lock();
        if state.active.is_none() {
            let append = self.append || state.opened;
            state.active = Some(self.open(append)?);
            state.opened = true;
        }

        let needs_roll = state
            .active
            .as_ref()
            .is_some_and(|w| self.trigger.should_roll(w.len, incoming));
        if needs_roll {
            // ファイルを閉じてから切り替える
            state.active = None;
            self.roller.roll(&self.path).map_err(|source| {
                warn!("failed to rotate {:?}: {}", self.path, source);
                SinkError::Rotate {
                    path: self.path.clone(),
                    source,
                }
            })?;
            state.active = Some(self.open(false)?);
        }

        let Some(active) = state.active.as_mut() else {
            return Ok(());
        };
        active
            .file
            .write_all(line.as_bytes())
            .map_err(|source| self.write_error(source))?;
        active.len += incoming;

        Ok(())
    }

    pub fn flush(&self) -> Result<(), SinkError> {
        match self.lock().active.as_mut() {
            Some(active) => active.file.flush().map_err(|source| self.write_error(source)),
            None => Ok(()),
        }
    }

    /// ファイルを閉じる。次に書き込むときは、既存のファイルに追記する。
    pub fn close(&self) -> Result<(), SinkError> {
        let mut state = self.lock();
        if let Some(mut active) = state.active.take() {
            active.file.flush().map_err(|source| self.write_error(source))?;
        }

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, append: bool) -> Result<LogWriter, SinkError> {
        let file = create_writer(&self.path, append).map_err(|source| self.write_error(source))?;
        let len = file
            .metadata()
            .map_err(|source| self.write_error(source))?
            .len();

        Ok(LogWriter { file, len })
    }

    fn write_error(&self, source: io::Error) -> SinkError {
        SinkError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

/// ライターを作成する。
///
/// 親ディレクトリが存在しない場合は作成する。
///
/// # 引数
///
/// * path: ログファイルパス。
/// * append: `true`の場合は既存のファイルに追記し、`false`の場合は空にする。
///
/// # 戻り値
///
/// `File`インスタンス。
fn create_writer(path: &Path, append: bool) -> io::Result<File> {
    let mut open_options = OpenOptions::new();
    open_options.create(true);
    if append {
        open_options.append(true);
    } else {
        open_options.write(true).truncate(true);
    }

    let new_file = open_options.open(path);
    if new_file.is_err() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            return open_options.open(path);
        }
    }

    new_file
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc, thread};

    use tracing::Level;

    use super::*;

    fn spec(dir: &Path, limit: u64, count: u32, base: u32) -> RollingFileSpec {
        let pattern = dir.join("app.{}.log");
        RollingFileSpec {
            path: dir.join("app.log"),
            append: true,
            encoder: PatternEncoder::new("{m}{n}").unwrap(),
            trigger: SizeTrigger::new(limit),
            roller: FixedWindowRoller::new(pattern.to_str().unwrap(), count, base).unwrap(),
        }
    }

    /// 改行を含めて`len`バイトのメッセージを作成する。
    fn message(c: char, len: usize) -> String {
        std::iter::repeat(c).take(len - 1).collect()
    }

    fn archives(appender: &RollingFileAppender) -> Vec<u32> {
        (0..1000)
            .filter(|i| appender.roller.archive_path(*i).exists())
            .collect()
    }

    #[test]
    fn test_create_writer_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.log");

        create_writer(&path, true).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_rotates_before_the_overflowing_record() {
        let dir = tempfile::tempdir().unwrap();
        let appender = RollingFileAppender::new(&spec(dir.path(), 100, 3, 0));

        let first = message('a', 40);
        let second = message('b', 40);
        let third = message('c', 40);
        appender.append(&Record::new(Level::INFO, "app", &first)).unwrap();
        appender.append(&Record::new(Level::INFO, "app", &second)).unwrap();
        assert_eq!(80, fs::metadata(appender.path()).unwrap().len());
        assert!(archives(&appender).is_empty());

        appender.append(&Record::new(Level::INFO, "app", &third)).unwrap();

        assert_eq!(vec![0], archives(&appender));
        assert_eq!(
            format!("{}\n{}\n", first, second),
            fs::read_to_string(appender.roller.archive_path(0)).unwrap()
        );
        assert_eq!(
            format!("{}\n", third),
            fs::read_to_string(appender.path()).unwrap()
        );
    }

    #[test]
    fn test_keeps_count_archives() {
        let dir = tempfile::tempdir().unwrap();
        let appender = RollingFileAppender::new(&spec(dir.path(), 10, 3, 1));

        // 1レコードごとに切り替わる
        for c in ['a', 'b', 'c', 'd', 'e', 'f'] {
            let line = message(c, 10);
            appender.append(&Record::new(Level::INFO, "app", &line)).unwrap();
        }

        assert_eq!(vec![1, 2, 3], archives(&appender));
        assert_eq!(
            format!("{}\n", message('e', 10)),
            fs::read_to_string(appender.roller.archive_path(1)).unwrap()
        );
        assert_eq!(
            format!("{}\n", message('c', 10)),
            fs::read_to_string(appender.roller.archive_path(3)).unwrap()
        );
        assert!(!appender.roller.archive_path(4).exists());
        assert_eq!(
            format!("{}\n", message('f', 10)),
            fs::read_to_string(appender.path()).unwrap()
        );
    }

    #[test]
    fn test_oversized_record_is_written_alone() {
        let dir = tempfile::tempdir().unwrap();
        let appender = RollingFileAppender::new(&spec(dir.path(), 10, 2, 0));

        let line = message('x', 50);
        appender.append(&Record::new(Level::INFO, "app", &line)).unwrap();

        assert!(archives(&appender).is_empty());
        assert_eq!(50, fs::metadata(appender.path()).unwrap().len());
    }

    #[test]
    fn test_existing_file_size_counts_towards_limit() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec(dir.path(), 100, 2, 0);
        fs::write(&spec.path, message('z', 90) + "\n").unwrap();
        let appender = RollingFileAppender::new(&spec);

        let line = message('a', 20);
        appender.append(&Record::new(Level::INFO, "app", &line)).unwrap();

        assert_eq!(vec![0], archives(&appender));
        assert_eq!(20, fs::metadata(appender.path()).unwrap().len());
    }

    #[test]
    fn test_truncates_existing_file_without_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(dir.path(), 100, 2, 0);
        spec.append = false;
        fs::write(&spec.path, "stale\n").unwrap();
        let appender = RollingFileAppender::new(&spec);

        appender.append(&Record::new(Level::INFO, "app", "fresh")).unwrap();

        assert_eq!("fresh\n", fs::read_to_string(appender.path()).unwrap());
    }

    #[test]
    fn test_rotation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(dir.path(), 10, 2, 0);
        // アーカイブの親がファイルなので、ディレクトリを作成できない
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let pattern = blocker.join("app.{}.log");
        spec.roller = FixedWindowRoller::new(pattern.to_str().unwrap(), 2, 0).unwrap();
        let appender = RollingFileAppender::new(&spec);

        let line = message('a', 10);
        appender.append(&Record::new(Level::INFO, "app", &line)).unwrap();
        let result = appender.append(&Record::new(Level::INFO, "app", &line));

        assert!(matches!(result, Err(SinkError::Rotate { .. })));
        // アクティブなファイルは残り、次の書き込みで再び開く
        assert!(appender.path().exists());
    }

    #[test]
    fn test_failed_rotation_keeps_written_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(dir.path(), 10, 2, 0);
        spec.append = false;
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let pattern = blocker.join("app.{}.log");
        spec.roller = FixedWindowRoller::new(pattern.to_str().unwrap(), 2, 0).unwrap();
        let appender = RollingFileAppender::new(&spec);

        appender.append(&Record::new(Level::INFO, "app", "precious")).unwrap();
        let result = appender.append(&Record::new(Level::INFO, "app", "second"));
        assert!(matches!(result, Err(SinkError::Rotate { .. })));

        // 再び開いたファイルは空にしない
        let _ = appender.append(&Record::new(Level::INFO, "app", "third"));

        let content = fs::read_to_string(appender.path()).unwrap();
        assert!(content.starts_with("precious\n"), "{:?}", content);
    }

    #[test]
    fn test_close_then_append_keeps_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(dir.path(), 100, 2, 0);
        spec.append = false;
        let appender = RollingFileAppender::new(&spec);

        appender.append(&Record::new(Level::INFO, "app", "before")).unwrap();
        appender.close().unwrap();
        assert!(appender.lock().active.is_none());
        appender.append(&Record::new(Level::INFO, "app", "after")).unwrap();

        assert_eq!(
            "before\nafter\n",
            fs::read_to_string(appender.path()).unwrap()
        );
    }

    /// 書き込んだ内容と、`flush`が呼ばれたかを記録するライター
    #[derive(Default)]
    struct RecordingWriter {
        written: Vec<u8>,
        flushed: bool,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    fn console(pattern: &str, ansi: bool) -> ConsoleAppender {
        ConsoleAppender {
            encoder: PatternEncoder::new(pattern).unwrap(),
            target: ConsoleTarget::Stderr,
            ansi,
        }
    }

    #[test]
    fn test_console_writes_rendered_line_and_flushes() {
        let appender = console("[{l:<5.5}] {t} {m}{n}", false);
        let mut writer = RecordingWriter::default();

        appender
            .write_to(&mut writer, &Record::new(Level::WARN, "app::net", "retrying"))
            .unwrap();

        assert_eq!(
            "[WARN ] app::net retrying\n",
            String::from_utf8(writer.written).unwrap()
        );
        assert!(writer.flushed);
    }

    #[test]
    fn test_console_highlights_when_ansi() {
        let appender = console("{h({l})} {m}", true);
        let mut buf = Vec::new();

        appender
            .write_to(&mut buf, &Record::new(Level::ERROR, "app", "down"))
            .unwrap();

        assert_eq!("\x1b[31mERROR\x1b[0m down", String::from_utf8(buf).unwrap());
    }

    #[test]
    fn test_console_from_spec() {
        let spec = AppenderSpec::Console(ConsoleSpec {
            encoder: PatternEncoder::new("{m}").unwrap(),
            target: ConsoleTarget::Stderr,
        });

        let appender = Appender::from_spec(&spec);

        let Appender::Console(console) = &appender else {
            panic!("expected a console appender");
        };
        assert_eq!(ConsoleTarget::Stderr, console.target);
        appender
            .append(&Record::new(Level::INFO, "app", "to stderr"))
            .unwrap();
        appender.close().unwrap();
    }

    #[test]
    fn test_concurrent_writers() {
        const THREADS: usize = 8;
        const RECORDS: usize = 50;
        const LINE_LEN: u64 = 40;
        const LIMIT: u64 = 1000;

        let dir = tempfile::tempdir().unwrap();
        let appender = Arc::new(RollingFileAppender::new(&spec(dir.path(), LIMIT, 64, 0)));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let appender = Arc::clone(&appender);
                thread::spawn(move || {
                    for r in 0..RECORDS {
                        // 改行を含めて40バイト
                        let line = format!("thread-{:02}-record-{:04}-{}", t, r, "x".repeat(17));
                        assert_eq!(LINE_LEN as usize - 1, line.len());
                        appender
                            .append(&Record::new(Level::INFO, "app", &line))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        appender.flush().unwrap();

        let indices = archives(&appender);
        let expected: Vec<u32> = (0..indices.len() as u32).collect();
        assert_eq!(expected, indices);

        let mut files: Vec<PathBuf> = indices
            .iter()
            .map(|i| appender.roller.archive_path(*i))
            .collect();
        files.push(appender.path().to_path_buf());

        let mut lines = BTreeSet::new();
        for file in &files {
            let content = fs::read_to_string(file).unwrap();
            assert!(content.len() as u64 <= LIMIT);
            for line in content.lines() {
                assert_eq!(LINE_LEN as usize - 1, line.len());
                assert!(lines.insert(line.to_string()));
            }
        }
        assert_eq!(THREADS * RECORDS, lines.len());
    }
}
