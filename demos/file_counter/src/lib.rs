//! ブレークポイントで計装したファイルカウンタ
//!
//! ファイルに保存された数値を「ロック → 読み取り → 書き込み」で1増やします。
//! ロックを無効にすると、2つのプロセスを同期させて更新の消失を再現できます。

use anyhow::Result;
use forkstep_core::{Breakpoints, Controller};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek as _, Write as _};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// ロック取得前のブレークポイント
pub const BEFORE_LOCK: &str = "before_lock";
/// 値を読み取った直後のブレークポイント
pub const AFTER_READ: &str = "after_read";

/// ファイルカウンタ
pub struct FileCounter<'a> {
    file: File,
    use_lock: bool,
    breakpoints: &'a Breakpoints,
}

impl<'a> FileCounter<'a> {
    /// カウンタファイルを開く（存在しなければ作成する）
    pub fn open<P: AsRef<Path>>(path: P, use_lock: bool, breakpoints: &'a Breakpoints) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)?;
        Ok(Self {
            file,
            use_lock,
            breakpoints,
        })
    }

    /// カウンタを1増やし、書き込んだ値を返す
    pub fn increase(self) -> Result<u64> {
        let FileCounter {
            file,
            use_lock,
            breakpoints,
        } = self;

        breakpoints.mark(BEFORE_LOCK);
        if use_lock {
            let mut locked = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| errno)?;
            increment(&mut locked, breakpoints)
        } else {
            let mut file = file;
            increment(&mut file, breakpoints)
        }
    }
}

fn increment(file: &mut File, breakpoints: &Breakpoints) -> Result<u64> {
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    // 空ファイルは0として扱う
    let value = contents.trim().parse::<u64>().unwrap_or(0) + 1;
    breakpoints.mark(AFTER_READ);

    file.rewind()?;
    writeln!(file, "{}", value)?;
    file.flush()?;
    let len = file.stream_position()?;
    file.set_len(len)?;
    Ok(value)
}

/// カウンタファイルの現在値を読む
pub fn read_counter<P: AsRef<Path>>(path: P) -> Result<u64> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.trim().parse::<u64>().unwrap_or(0))
}

/// カウンタを1回増やす子プロセスのコントローラを作成する
pub fn counter_process(name: &str, path: &Path, use_lock: bool) -> Controller {
    let path: PathBuf = path.to_path_buf();
    Controller::named(name, move |breakpoints| {
        let result = FileCounter::open(&path, use_lock, breakpoints).and_then(FileCounter::increase);
        match result {
            Ok(value) => tracing::debug!(value, "counter increased"),
            Err(e) => tracing::error!(error = %e, "failed to increase counter"),
        }
    })
}

/// 2つのプロセスを同期させてカウンタを増やし、最終値を返す
///
/// p1 が値を読んだ後、p2 がロック取得に進みます。ロックが有効なら p2 は
/// p1 の書き込みを待つので最終値は2、無効なら両者が同じ値を読むので1になります。
pub fn synced_race(path: &Path, use_lock: bool, settle: Duration) -> Result<u64> {
    let mut p1 = counter_process("p1", path, use_lock);
    let mut p2 = counter_process("p2", path, use_lock);

    p1.run_until(AFTER_READ)?.wait()?;
    p2.run_until(BEFORE_LOCK)?.wait()?;

    let p2_read = p2.run_until(AFTER_READ)?;
    if use_lock {
        // p2 はロックでブロックするので読み取りを待てない
        thread::sleep(settle);
    } else {
        p2_read.wait()?;
    }

    p1.finish()?.wait()?;
    p2.finish()?.wait()?;

    read_counter(path)
}
