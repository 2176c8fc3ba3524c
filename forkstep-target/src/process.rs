//! 子プロセスのライフサイクル管理

use crate::channel::{channel, ChildEndpoint, ParentEndpoint};
use crate::Result;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::fmt;

/// 本体関数が正常に戻った場合の終了コード
pub const EXIT_OK: i32 = 0;
/// 本体関数がパニックした場合の終了コード
pub const EXIT_BODY_PANICKED: i32 = 101;
/// チャネルの入出力に失敗した場合の終了コード
pub const EXIT_CHANNEL_FAILURE: i32 = 102;

/// 子プロセスの終了状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// 終了コード付きで終了した
    Exited(i32),
    /// シグナルで終了した
    Signaled(Signal),
}

impl ExitStatus {
    /// 正常終了（終了コード0）かどうか
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(EXIT_OK))
    }

    /// 終了コードを取得する（シグナル終了なら `None`）
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signaled(_) => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with code {}", code),
            ExitStatus::Signaled(signal) => write!(f, "killed by signal {:?}", signal),
        }
    }
}

/// fork で生成した子プロセス
///
/// 回収前にドロップされた場合は SIGKILL を送ってから回収します。
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    /// チャネルを作成し、子プロセスを fork して `entry` を実行する
    ///
    /// 子プロセスは `entry` の戻り値を終了コードとして `_exit` します。
    /// 親プロセスのスタックに戻ることはありません。
    /// 親プロセスには子プロセスのハンドルと親側の端点が返されます。
    pub fn spawn<F>(entry: F) -> Result<(Self, ParentEndpoint)>
    where
        F: FnOnce(ChildEndpoint) -> i32,
    {
        let (parent_end, child_end) = channel()?;

        // forkしてプロセスを生成
        match unsafe { fork()? } {
            ForkResult::Parent { child } => {
                // 親プロセス: 子側の端点を閉じる
                drop(child_end);
                tracing::debug!(pid = child.as_raw(), "forked child process");
                Ok((Self { pid: child, status: None }, parent_end))
            }
            ForkResult::Child => {
                // 子プロセス: 親側の端点を閉じてから本体を実行
                drop(parent_end);
                let code = entry(child_end);
                exit_child(code)
            }
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// 回収済みであれば終了状態を返す
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// 子プロセスの終了を待機して回収する
    ///
    /// 既に回収済みの場合は記録済みの終了状態を返します。
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    return Ok(self.record(ExitStatus::Exited(code)));
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(self.record(ExitStatus::Signaled(signal)));
                }
                // 停止・再開の通知は終了ではないので待ち続ける
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 子プロセスを強制終了して回収する
    pub fn kill(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        match signal::kill(self.pid, Signal::SIGKILL) {
            // 既に終了してゾンビになっている場合も回収する
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(e.into()),
        }
        self.wait()
    }

    fn record(&mut self, status: ExitStatus) -> ExitStatus {
        tracing::debug!(pid = self.pid.as_raw(), %status, "reaped child process");
        self.status = Some(status);
        status
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Err(e) = self.kill() {
                tracing::warn!(pid = self.pid.as_raw(), error = %e, "failed to kill child process");
            }
        }
    }
}

/// 子プロセスを終了させる
///
/// `_exit` するだけで、atexit ハンドラも標準出力のフラッシュも行いません。
/// fork 時に他のスレッドが標準出力のロックを保持していた場合、子プロセスでは
/// そのロックが解放されないためです。本体関数の出力は本体関数自身がフラッシュすること。
/// 親から複製されたスタックにも戻りません。fork した子プロセスの中でのみ呼び出すこと。
pub fn exit_child(code: i32) -> ! {
    unsafe { nix::libc::_exit(code) }
}
