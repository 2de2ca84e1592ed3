use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression as GzLevel};
use tracing::debug;

use crate::error::RollerError;

/// ファイルを切り替える条件
///
/// アクティブなファイルのサイズに、これから書き込むレコードのサイズを加えた値が
/// 上限を超えるときに、ファイルを切り替える。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeTrigger {
    limit: u64,
}

impl SizeTrigger {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// ファイルを切り替える必要があるか確認する。
    ///
    /// 空のファイルは切り替えない。上限を超える1レコードは、新しいファイルに
    /// 単独で書き込まれる。
    pub fn should_roll(&self, current_len: u64, incoming: u64) -> bool {
        current_len > 0 && current_len.saturating_add(incoming) > self.limit
    }
}

/// アーカイブの圧縮方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

/// 固定ウィンドウでアーカイブを管理するローラー
///
/// アーカイブのインデックスは`base`から`base + count - 1`までで、最新のアーカイブが
/// `base`に配置される。ウィンドウからあふれた最も古いアーカイブは削除する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindowRoller {
    pattern: String,
    count: u32,
    base: u32,
    compression: Compression,
}

impl FixedWindowRoller {
    /// `FixedWindowRoller`を作成する。
    ///
    /// # 引数
    ///
    /// * pattern: アーカイブファイルのパス。インデックスを展開する`{}`を1つだけ含む。
    /// * count: 残す最大アーカイブ数。1以上。
    /// * base: 最新のアーカイブのインデックス。
    ///
    /// # 戻り値
    ///
    /// `FixedWindowRoller`インスタンス。パターンが不正な場合は、その理由。
    pub fn new(pattern: &str, count: u32, base: u32) -> Result<Self, RollerError> {
        match pattern.matches("{}").count() {
            1 => {}
            0 => return Err(RollerError::MissingPlaceholder),
            _ => return Err(RollerError::MultiplePlaceholders),
        }
        if count == 0 {
            return Err(RollerError::ZeroCount);
        }
        if base.checked_add(count).is_none() {
            return Err(RollerError::WindowOverflow);
        }

        let compression = if pattern.ends_with(".gz") {
            Compression::Gzip
        } else {
            Compression::None
        };

        Ok(Self {
            pattern: pattern.to_string(),
            count,
            base,
            compression,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// インデックスを展開したアーカイブファイルのパスを返却する。
    pub fn archive_path(&self, index: u32) -> PathBuf {
        PathBuf::from(self.pattern.replacen("{}", &index.to_string(), 1))
    }

    /// アクティブなファイルをアーカイブする。
    ///
    /// 呼び出し元は、アクティブなファイルを閉じてから呼び出すこと。
    ///
    /// # 引数
    ///
    /// * active: アクティブなログファイルのパス。
    pub fn roll(&self, active: &Path) -> io::Result<()> {
        let last = self.base + self.count - 1;

        let oldest = self.archive_path(last);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
            debug!("removed oldest archive {:?}", oldest);
        }

        for index in (self.base..last).rev() {
            let src = self.archive_path(index);
            if src.exists() {
                move_file(&src, &self.archive_path(index + 1))?;
            }
        }

        let dst = self.archive_path(self.base);
        create_parent(&dst)?;
        match self.compression {
            Compression::None => move_file(active, &dst)?,
            Compression::Gzip => {
                compress_file(active, &dst)?;
                fs::remove_file(active)?;
            }
        }
        debug!("archived {:?} to {:?}", active, dst);

        Ok(())
    }
}

/// ファイルを移動する。
///
/// 名前の変更に失敗した場合は（ファイルシステムをまたぐ場合など）、複製してから
/// 元のファイルを削除する。
fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    create_parent(dst)?;
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    fs::copy(src, dst)?;
    fs::remove_file(src)
}

/// 親ディレクトリが存在しない場合は作成する。
fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// `src`をgzipで圧縮して`dst`に書き込む。
fn compress_file(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(dst)?), GzLevel::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}
