use std::{iter::Peekable, str::Chars, thread};

use time::{
    format_description::{self, well_known::Rfc3339, OwnedFormatItem},
    UtcOffset,
};
use tracing::Level;

use crate::{error::PatternError, record::Record};

/// パターンを指定しなかったときに使用するパターン。
pub const DEFAULT_PATTERN: &str = "{d} {l} {t} - {m}{n}";

/// パターン文字列に従ってログレコードを整形するエンコーダー。
///
/// パターンは、リテラル文字列と`{name}`、`{name(arg)}`、`{name:spec}`形式の
/// プレースホルダーで構成される。`{{`と`}}`は、それぞれ`{`と`}`を出力する。
///
/// | プレースホルダー | 出力 |
/// |---|---|
/// | `d`, `date` | タイムスタンプ。引数にstrftime形式の書式、2つ目の引数に`utc`を指定できる |
/// | `l`, `level` | ログレベル |
/// | `m`, `message` | メッセージ |
/// | `n` | 改行 |
/// | `t`, `target` | ターゲット |
/// | `M`, `module` | モジュールパス |
/// | `f`, `file` | ソースファイル |
/// | `L`, `line` | ソースファイルの行番号 |
/// | `T`, `thread` | スレッド名 |
/// | `h(..)`, `highlight(..)` | 括弧内のパターンをログレベルに応じて色付けする |
///
/// `spec`は`[<|>][最小幅][.最大幅]`で、例えば`{l:<5.5}`はログレベルを5文字に
/// 揃える。
#[derive(Debug, Clone)]
pub struct PatternEncoder {
    pattern: String,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
enum Chunk {
    Text(String),
    Field { field: Field, spec: FormatSpec },
    Highlight { chunks: Vec<Chunk>, spec: FormatSpec },
}

#[derive(Debug, Clone)]
enum Field {
    Date { format: DateFormat, utc: bool },
    Level,
    Message,
    Newline,
    Target,
    Module,
    File,
    Line,
    Thread,
}

#[derive(Debug, Clone)]
enum DateFormat {
    Rfc3339,
    Custom(OwnedFormatItem),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Align {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FormatSpec {
    align: Align,
    min: Option<usize>,
    max: Option<usize>,
}

impl PatternEncoder {
    /// パターン文字列を解析して、`PatternEncoder`を作成する。
    ///
    /// # 引数
    ///
    /// * pattern: パターン文字列。
    ///
    /// # 戻り値
    ///
    /// `PatternEncoder`インスタンス。パターンが不正な場合は、その理由。
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let mut parser = Parser {
            chars: pattern.chars().peekable(),
        };
        let chunks = parser.chunks(false)?;

        Ok(Self {
            pattern: pattern.to_string(),
            chunks,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// ログレコードを整形して返却する。
    ///
    /// `ansi`が`true`の場合、`{h(..)}`の範囲をANSIエスケープシーケンスで色付けする。
    pub fn encode(&self, record: &Record<'_>, ansi: bool) -> String {
        let mut out = String::with_capacity(self.pattern.len() + record.message().len());
        render(&self.chunks, record, ansi, &mut out);
        out
    }
}

impl Default for PatternEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN).expect("the default pattern is valid")
    }
}

fn render(chunks: &[Chunk], record: &Record<'_>, ansi: bool, out: &mut String) {
    for chunk in chunks {
        match chunk {
            Chunk::Text(text) => out.push_str(text),
            Chunk::Field { field, spec } => {
                let value = render_field(field, record);
                write_with_spec(out, &value, *spec);
            }
            Chunk::Highlight { chunks, spec } => {
                let mut inner = String::new();
                render(chunks, record, ansi, &mut inner);
                if ansi {
                    out.push_str(level_color(record.level()));
                    write_with_spec(out, &inner, *spec);
                    out.push_str("\x1b[0m");
                } else {
                    write_with_spec(out, &inner, *spec);
                }
            }
        }
    }
}

fn render_field(field: &Field, record: &Record<'_>) -> String {
    match field {
        Field::Date { format, utc } => {
            let timestamp = if *utc {
                record.timestamp().to_offset(UtcOffset::UTC)
            } else {
                record.timestamp()
            };
            let formatted = match format {
                DateFormat::Rfc3339 => timestamp.format(&Rfc3339),
                DateFormat::Custom(item) => timestamp.format(item),
            };
            formatted.unwrap_or_default()
        }
        Field::Level => record.level().to_string(),
        Field::Message => record.message().to_string(),
        Field::Newline => "\n".to_string(),
        Field::Target => record.target().to_string(),
        Field::Module => record.module_path().unwrap_or_default().to_string(),
        Field::File => record.file().unwrap_or_default().to_string(),
        Field::Line => record.line().map(|line| line.to_string()).unwrap_or_default(),
        Field::Thread => {
            let current = thread::current();
            match current.name() {
                Some(name) => name.to_string(),
                None => format!("{:?}", current.id()),
            }
        }
    }
}

fn write_with_spec(out: &mut String, value: &str, spec: FormatSpec) {
    if spec == FormatSpec::default() {
        out.push_str(value);
        return;
    }

    let value: String = match spec.max {
        Some(max) => value.chars().take(max).collect(),
        None => value.to_string(),
    };
    let padding = spec
        .min
        .map_or(0, |min| min.saturating_sub(value.chars().count()));

    match spec.align {
        Align::Left => {
            out.push_str(&value);
            out.extend(std::iter::repeat(' ').take(padding));
        }
        Align::Right => {
            out.extend(std::iter::repeat(' ').take(padding));
            out.push_str(&value);
        }
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::ERROR => "\x1b[31m",
        Level::WARN => "\x1b[33m",
        Level::INFO => "\x1b[32m",
        Level::DEBUG => "\x1b[36m",
        Level::TRACE => "\x1b[2m",
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    /// `nested`が`true`のときは、対応する`)`までを解析する。
    fn chunks(&mut self, nested: bool) -> Result<Vec<Chunk>, PatternError> {
        let mut chunks = Vec::new();
        let mut text = String::new();

        loop {
            match self.chars.next() {
                None if nested => return Err(PatternError::UnclosedHighlight),
                None => break,
                Some(')') if nested => break,
                Some('{') if self.chars.peek() == Some(&'{') => {
                    self.chars.next();
                    text.push('{');
                }
                Some('}') if self.chars.peek() == Some(&'}') => {
                    self.chars.next();
                    text.push('}');
                }
                Some('}') => return Err(PatternError::UnmatchedBrace),
                Some('{') => {
                    if !text.is_empty() {
                        chunks.push(Chunk::Text(std::mem::take(&mut text)));
                    }
                    chunks.push(self.placeholder()?);
                }
                Some(c) => text.push(c),
            }
        }

        if !text.is_empty() {
            chunks.push(Chunk::Text(text));
        }
        Ok(chunks)
    }

    fn placeholder(&mut self) -> Result<Chunk, PatternError> {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(PatternError::EmptyPlaceholder);
        }

        let chunk = if matches!(name.as_str(), "h" | "highlight") {
            if self.chars.next() != Some('(') {
                return Err(PatternError::MissingNestedPattern(name));
            }
            let chunks = self.chunks(true)?;
            let spec = self.spec()?;
            Chunk::Highlight { chunks, spec }
        } else {
            let mut args = Vec::new();
            while self.chars.peek() == Some(&'(') {
                self.chars.next();
                args.push(self.argument()?);
            }
            let field = field(&name, &args)?;
            let spec = self.spec()?;
            Chunk::Field { field, spec }
        };

        match self.chars.next() {
            Some('}') => Ok(chunk),
            _ => Err(PatternError::UnclosedPlaceholder(name)),
        }
    }

    fn argument(&mut self) -> Result<String, PatternError> {
        let mut arg = String::new();
        loop {
            match self.chars.next() {
                Some(')') => return Ok(arg),
                Some(c) => arg.push(c),
                None => return Err(PatternError::UnclosedArgument),
            }
        }
    }

    fn spec(&mut self) -> Result<FormatSpec, PatternError> {
        let mut spec = FormatSpec::default();
        if self.chars.peek() != Some(&':') {
            return Ok(spec);
        }
        self.chars.next();

        match self.chars.peek() {
            Some('<') => {
                self.chars.next();
            }
            Some('>') => {
                self.chars.next();
                spec.align = Align::Right;
            }
            _ => {}
        }
        spec.min = self.number();
        if self.chars.peek() == Some(&'.') {
            self.chars.next();
            spec.max = Some(self.number().ok_or(PatternError::MissingMaxWidth)?);
        }

        match self.chars.peek() {
            Some('}') => Ok(spec),
            Some(c) => Err(PatternError::UnexpectedSpecChar(*c)),
            None => Err(PatternError::UnterminatedSpec),
        }
    }

    fn number(&mut self) -> Option<usize> {
        let mut digits = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        digits.parse().ok()
    }
}

fn field(name: &str, args: &[String]) -> Result<Field, PatternError> {
    let field = match name {
        "d" | "date" => {
            let format = match args.first().map(String::as_str) {
                None | Some("") => DateFormat::Rfc3339,
                Some(strftime) => DateFormat::Custom(parse_strftime(strftime)?),
            };
            let utc = match args.get(1).map(String::as_str) {
                None | Some("local") => false,
                Some("utc") => true,
                Some(other) => return Err(PatternError::UnknownTimezone(other.to_string())),
            };
            return Ok(Field::Date { format, utc });
        }
        "l" | "level" => Field::Level,
        "m" | "message" => Field::Message,
        "n" => Field::Newline,
        "t" | "target" => Field::Target,
        "M" | "module" => Field::Module,
        "f" | "file" => Field::File,
        "L" | "line" => Field::Line,
        "T" | "thread" => Field::Thread,
        _ => return Err(PatternError::UnknownPlaceholder(name.to_string())),
    };

    if !args.is_empty() {
        return Err(PatternError::UnexpectedArgument(name.to_string()));
    }
    Ok(field)
}

/// strftime形式の書式を`time`クレートの書式に変換して解析する。
fn parse_strftime(strftime: &str) -> Result<OwnedFormatItem, PatternError> {
    let description = translate_strftime(strftime)
        .ok_or_else(|| PatternError::UnsupportedDateSpecifier(strftime.to_string()))?;
    format_description::parse_owned::<1>(&description).map_err(|source| {
        PatternError::InvalidDateFormat {
            format: strftime.to_string(),
            source,
        }
    })
}

/// 対応していない指定子を含む場合は`None`を返却する。
fn translate_strftime(strftime: &str) -> Option<String> {
    let mut out = String::new();
    let mut chars = strftime.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '[' => out.push_str("[["),
            '%' => {
                let dot = chars.next_if_eq(&'.').is_some();
                let colon = chars.next_if_eq(&':').is_some();
                let digits = chars.next_if(char::is_ascii_digit);
                let specifier = chars.next()?;

                let item = match (specifier, digits, colon) {
                    ('f', Some(n @ ('3' | '6' | '9')), false) => {
                        format!("[subsecond digits:{}]", n)
                    }
                    ('f', None, false) => "[subsecond digits:9]".to_string(),
                    ('z', None, true) if !dot => {
                        "[offset_hour sign:mandatory]:[offset_minute]".to_string()
                    }
                    (s, None, false) if !dot => match s {
                        'Y' => "[year]",
                        'y' => "[year repr:last_two]",
                        'm' => "[month]",
                        'b' => "[month repr:short]",
                        'B' => "[month repr:long]",
                        'd' => "[day]",
                        'e' => "[day padding:space]",
                        'a' => "[weekday repr:short]",
                        'A' => "[weekday]",
                        'j' => "[ordinal]",
                        'H' => "[hour]",
                        'I' => "[hour repr:12]",
                        'p' => "[period]",
                        'M' => "[minute]",
                        'S' => "[second]",
                        'z' => "[offset_hour sign:mandatory][offset_minute]",
                        '%' => "%",
                        _ => return None,
                    }
                    .to_string(),
                    _ => return None,
                };

                if dot {
                    out.push('.');
                }
                out.push_str(&item);
            }
            c => out.push(c),
        }
    }

    Some(out)
}
