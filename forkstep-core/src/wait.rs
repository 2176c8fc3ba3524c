//! 待機ハンドル

use crate::controller::{RequestId, Shared};
use crate::errors::BreakpointNotReached;
use crate::Label;
use std::fmt;
use std::sync::Arc;

/// ハンドルが表す要求の種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// `run_until(label)`
    RunUntil(Label),
    /// `finish()`
    Finish,
}

/// `run_until` / `finish` の完了を待つハンドル
///
/// 一度解決した結果は記録され、2回目以降の `wait` は同じ結果を返します。
#[derive(Clone)]
pub struct WaitHandle {
    shared: Arc<Shared>,
    request: RequestId,
    kind: RequestKind,
}

impl WaitHandle {
    pub(crate) fn new(shared: Arc<Shared>, request: RequestId, kind: RequestKind) -> Self {
        Self {
            shared,
            request,
            kind,
        }
    }

    /// 要求の種類を取得する
    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// 既に解決済みかどうか
    pub fn is_resolved(&self) -> bool {
        self.shared.lock().is_resolved(self.request)
    }

    /// 要求が完了するまで呼び出し元スレッドをブロックする
    ///
    /// `run_until` の場合、要求したブレークポイントに到達しないまま子プロセスが
    /// 終了すると `BreakpointNotReached` を返します。`finish` は失敗しません。
    /// タイムアウトはありません。待機中もコントローラの状態参照や `finish` は使えます。
    pub fn wait(&self) -> Result<(), BreakpointNotReached> {
        self.shared.resolve(self.request)
    }

    /// `wait` の非同期版
    ///
    /// ブロッキング待機を `tokio::task::spawn_blocking` に逃がします。
    /// 返された Future をドロップしても待機スレッドはイベントを1つ受け取るまで残りますが、
    /// コントローラのロックは保持しません。
    #[cfg(feature = "tokio")]
    pub async fn wait_async(&self) -> Result<(), BreakpointNotReached> {
        let handle = self.clone();
        match tokio::task::spawn_blocking(move || handle.wait()).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // ランタイム停止でキャンセルされた場合はこのスレッドで待つ
            Err(_) => self.wait(),
        }
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("request", &self.request)
            .field("kind", &self.kind)
            .finish()
    }
}
