//! ブレークポイントラベルと子プロセス側の計装ケイパビリティ

use forkstep_target::process::{exit_child, EXIT_CHANNEL_FAILURE};
use forkstep_target::{ChildEndpoint, Command, Event};
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Shl;

/// ブレークポイントラベル
///
/// 等価比較のみ意味を持つ不透明な識別子です。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(Cow<'static, str>);

impl Label {
    /// 静的文字列からラベルを作成する（定数にも使える）
    pub const fn from_static(s: &'static str) -> Self {
        Label(Cow::Borrowed(s))
    }

    /// ラベル文字列を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label(Cow::Owned(s.to_owned()))
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Label(Cow::Owned(s))
    }
}

impl From<&Label> for Label {
    fn from(label: &Label) -> Self {
        label.clone()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ブレークポイント計装ケイパビリティ
///
/// 子プロセスの本体関数に引数として渡されます。本体関数の中でのみ使用し、
/// 戻った後に保持してはいけません。計装が必要な型はこの参照をコンストラクタで受け取ります。
pub struct Breakpoints {
    endpoint: Option<RefCell<ChildEndpoint>>,
    free_running: Cell<bool>,
}

impl Breakpoints {
    /// 子プロセス側の端点に束縛されたケイパビリティを作成する
    pub(crate) fn attached(endpoint: ChildEndpoint) -> Self {
        Self {
            endpoint: Some(RefCell::new(endpoint)),
            free_running: Cell::new(false),
        }
    }

    /// 何もしないケイパビリティを作成する
    ///
    /// コントローラ外で計装済みコードを実行する場合に使います。`mark` は即座に戻ります。
    pub fn disabled() -> Self {
        Self {
            endpoint: None,
            free_running: Cell::new(true),
        }
    }

    /// 無条件完了モードに入っているかどうか
    pub fn is_free_running(&self) -> bool {
        self.free_running.get()
    }

    /// ブレークポイント `label` に到達したことを宣言する
    ///
    /// 親プロセスに到達を通知し、継続の許可が届くまでブロックします。
    /// 無条件完了の指示を受け取った後は、何も送らずに即座に戻ります。
    /// チャネルの入出力に失敗した場合、子プロセスはその場で終了します。
    pub fn mark(&self, label: impl Into<Label>) {
        let label = label.into();
        let mut endpoint = match &self.endpoint {
            Some(endpoint) if !self.free_running.get() => endpoint.borrow_mut(),
            _ => {
                tracing::trace!(%label, "passing breakpoint without stopping");
                return;
            }
        };

        if let Err(e) = endpoint.send_event(&Event::ReachedBreakpoint(label.as_str().to_owned())) {
            channel_failure(&label, &e);
        }

        match endpoint.await_command() {
            Ok(Command::Proceed) => {
                tracing::debug!(%label, "resuming from breakpoint");
            }
            Ok(Command::FinishUnconditionally) => {
                tracing::debug!(%label, "finishing unconditionally");
                self.free_running.set(true);
            }
            Err(e) => channel_failure(&label, &e),
        }
    }

    /// 本体関数の終了を親プロセスに通知する
    pub(crate) fn report_finished(&self) {
        if let Some(endpoint) = &self.endpoint {
            if let Err(e) = endpoint.borrow().send_event(&Event::Finished) {
                // 親はEOFを完了として扱うので、ここでは記録のみ
                tracing::warn!(error = %e, "failed to report completion");
            }
        }
    }
}

impl fmt::Debug for Breakpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoints")
            .field("attached", &self.endpoint.is_some())
            .field("free_running", &self.free_running.get())
            .finish()
    }
}

impl<L: Into<Label>> Shl<L> for &Breakpoints {
    type Output = ();

    /// `breakpoints << "label"` は `breakpoints.mark("label")` と同じ
    fn shl(self, label: L) {
        self.mark(label);
    }
}

/// チャネル障害は子プロセスにとって致命的
fn channel_failure(label: &Label, err: &std::io::Error) -> ! {
    tracing::error!(%label, error = %err, "breakpoint channel failed, terminating child");
    exit_child(EXIT_CHANNEL_FAILURE)
}
