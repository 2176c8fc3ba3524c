//! エラー型

use crate::Label;
use forkstep_target::ExitStatus;
use thiserror::Error;

/// 要求したブレークポイントに到達しないまま子プロセスが終了した
///
/// `exit` には回収できた場合の終了状態が入ります（クラッシュと正常終了の区別に使えます）。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("breakpoint `{label}` was not reached ({})", describe_exit(.exit))]
pub struct BreakpointNotReached {
    pub label: Label,
    pub exit: Option<ExitStatus>,
}

fn describe_exit(exit: &Option<ExitStatus>) -> String {
    match exit {
        Some(status) => format!("child {}", status),
        None => "child exit status unknown".to_string(),
    }
}

/// コントローラ操作のエラー
#[derive(Debug, Error)]
pub enum Error {
    /// パイプ作成または fork に失敗した
    #[error("failed to spawn child process: {0:#}")]
    Spawn(anyhow::Error),

    /// 子プロセスは既に完了している（または完了を指示済み）
    #[error("process has already finished")]
    AlreadyFinished,

    /// 前回の run_until がまだ解決していない
    #[error("run_until(`{pending}`) is still unresolved; wait on it before requesting another breakpoint")]
    RequestPending { pending: Label },

    #[error(transparent)]
    BreakpointNotReached(#[from] BreakpointNotReached),
}
