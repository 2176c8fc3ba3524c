//! プロセスコントローラ
//!
//! 子プロセスのライフサイクルを管理し、`run_until` / `finish` の要求を
//! ブレークポイントチャネル上のコマンドとイベントに変換します。

use crate::breakpoint::Breakpoints;
use crate::errors::{BreakpointNotReached, Error};
use crate::wait::{RequestKind, WaitHandle};
use crate::{Label, Result};
use forkstep_target::process::{EXIT_BODY_PANICKED, EXIT_OK};
use forkstep_target::{ChildEndpoint, ChildProcess, Command, CommandWriter, Event, EventReader, ExitStatus};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// 子プロセスで実行される本体関数
type Body = Box<dyn FnOnce(&Breakpoints) + Send + 'static>;

/// 要求ID
pub(crate) type RequestId = u64;

/// 要求の解決結果
pub(crate) type Outcome = std::result::Result<(), BreakpointNotReached>;

/// コントローラの状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    /// 子プロセスはまだ生成されていない
    NotStarted,
    /// 子プロセスが実行中
    Running,
    /// 子プロセスがブレークポイントで停止している
    AtBreakpoint(Label),
    /// 子プロセスは終了した（終端状態）
    Finished,
}

/// 未解決の run_until 要求
struct Pending {
    id: RequestId,
    label: Label,
}

/// コントローラと待機ハンドルが共有する内部状態
pub(crate) struct Session {
    name: String,
    body: Option<Body>,
    state: ControllerState,
    /// イベント読み取り端（読み取り中のスレッドが持ち出している間は `None`）
    events: Option<EventReader>,
    commands: Option<CommandWriter>,
    child: Option<ChildProcess>,
    /// 待機中の run_until
    pending: Option<Pending>,
    /// 発行済みの finish
    finish_request: Option<RequestId>,
    outcomes: HashMap<RequestId, Outcome>,
    next_request: RequestId,
}

impl Session {
    fn new(name: String, body: Body) -> Self {
        Self {
            name,
            body: Some(body),
            state: ControllerState::NotStarted,
            events: None,
            commands: None,
            child: None,
            pending: None,
            finish_request: None,
            outcomes: HashMap::new(),
            next_request: 1,
        }
    }

    fn allocate_request(&mut self) -> RequestId {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    /// 子プロセスを生成する（1回のみ）
    fn spawn(&mut self) -> Result<()> {
        let body = self.body.take().ok_or(Error::AlreadyFinished)?;
        let (child, endpoint) =
            ChildProcess::spawn(move |end| run_body(body, end)).map_err(Error::Spawn)?;

        tracing::debug!(process = %self.name, pid = child.pid(), "spawned child");
        let (events, commands) = endpoint.split();
        self.events = Some(events);
        self.commands = Some(commands);
        self.child = Some(child);
        self.state = ControllerState::Running;
        Ok(())
    }

    /// コマンドを送信する
    ///
    /// 送信失敗は子プロセスの終了を意味するので、次のイベント待ちでEOFとして観測されます。
    fn send(&self, command: Command) {
        let Some(commands) = &self.commands else {
            return;
        };
        if let Err(e) = commands.send_command(command) {
            tracing::warn!(process = %self.name, ?command, error = %e, "failed to send command");
        }
    }

    fn run_until(&mut self, label: Label) -> Result<RequestId> {
        if self.state == ControllerState::Finished || self.finish_request.is_some() {
            return Err(Error::AlreadyFinished);
        }
        if let Some(pending) = &self.pending {
            return Err(Error::RequestPending {
                pending: pending.label.clone(),
            });
        }

        match &self.state {
            ControllerState::NotStarted => self.spawn()?,
            ControllerState::AtBreakpoint(at) => {
                tracing::debug!(process = %self.name, from = %at, to = %label, "proceeding");
                self.send(Command::Proceed);
                self.state = ControllerState::Running;
            }
            ControllerState::Running | ControllerState::Finished => {}
        }

        let id = self.allocate_request();
        self.pending = Some(Pending { id, label });
        Ok(id)
    }

    fn finish(&mut self) -> Result<RequestId> {
        if let Some(id) = self.finish_request {
            return Ok(id);
        }

        let id = self.allocate_request();
        match &self.state {
            ControllerState::Finished => {
                self.outcomes.insert(id, Ok(()));
                return Ok(id);
            }
            ControllerState::NotStarted => self.spawn()?,
            ControllerState::Running | ControllerState::AtBreakpoint(_) => {}
        }

        tracing::debug!(process = %self.name, "finishing unconditionally");
        // 実行中なら子プロセスは次の mark でこのコマンドを読む
        self.send(Command::FinishUnconditionally);
        self.state = ControllerState::Running;
        self.finish_request = Some(id);
        Ok(id)
    }

    /// 要求が解決済みかどうか
    pub(crate) fn is_resolved(&self, id: RequestId) -> bool {
        self.outcomes.contains_key(&id)
    }

    /// 受信したイベントを処理する
    fn on_event(&mut self, event: io::Result<Option<Event>>) {
        match event {
            Ok(Some(Event::ReachedBreakpoint(label))) => self.on_breakpoint(Label::from(label)),
            Ok(Some(Event::Finished)) | Ok(None) => self.on_exit(false),
            Err(e) => {
                tracing::warn!(process = %self.name, error = %e, "breakpoint channel failed");
                self.on_exit(true);
            }
        }
    }

    fn on_breakpoint(&mut self, label: Label) {
        if let Some(pending) = self.pending.take() {
            if pending.label == label {
                self.outcomes.insert(pending.id, Ok(()));
                if self.finish_request.is_none() {
                    tracing::debug!(process = %self.name, %label, "stopped at breakpoint");
                    self.state = ControllerState::AtBreakpoint(label);
                }
                return;
            }
            self.pending = Some(pending);
        }

        if self.finish_request.is_some() {
            // FinishUnconditionally は既に送信済み
            tracing::trace!(process = %self.name, %label, "breakpoint passed while finishing");
        } else if self.pending.is_some() {
            tracing::debug!(process = %self.name, %label, "auto-continuing past unrequested breakpoint");
            self.send(Command::Proceed);
        } else {
            tracing::warn!(process = %self.name, %label, "breakpoint reported without a request");
            self.state = ControllerState::AtBreakpoint(label);
        }
    }

    fn on_exit(&mut self, kill: bool) {
        // チャネルを閉じてから回収する
        self.events = None;
        self.commands = None;

        let exit = self.child.as_mut().and_then(|child| {
            let reaped = if kill { child.kill() } else { child.wait() };
            reaped
                .map_err(|e| tracing::warn!(error = %e, "failed to reap child"))
                .ok()
        });
        tracing::debug!(process = %self.name, ?exit, "child finished");
        self.state = ControllerState::Finished;

        if let Some(pending) = self.pending.take() {
            self.outcomes.insert(
                pending.id,
                Err(BreakpointNotReached {
                    label: pending.label,
                    exit,
                }),
            );
        }
        if let Some(id) = self.finish_request {
            self.outcomes.entry(id).or_insert(Ok(()));
        }
    }
}

/// 子プロセス側のエントリポイント
fn run_body(body: Body, endpoint: ChildEndpoint) -> i32 {
    let breakpoints = Breakpoints::attached(endpoint);
    match panic::catch_unwind(AssertUnwindSafe(|| body(&breakpoints))) {
        Ok(()) => {
            breakpoints.report_finished();
            EXIT_OK
        }
        Err(_) => {
            tracing::error!("process body panicked");
            EXIT_BODY_PANICKED
        }
    }
}

/// コントローラと待機ハンドルが共有するセッション
pub(crate) struct Shared {
    session: Mutex<Session>,
    /// イベント読み取り端がセッションに戻されたことの通知
    reader_returned: Condvar,
}

impl Shared {
    fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            reader_returned: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 要求が解決するまでイベントを処理する
    ///
    /// イベントの読み取りはロックを外して行うので、待機中も状態の参照や
    /// `finish` の送信はブロックされません。読み取り端を持てるのは1スレッドだけで、
    /// 他の待機者は読み取り端が戻されるのを待ちます。
    pub(crate) fn resolve(&self, id: RequestId) -> Outcome {
        let mut session = self.lock();
        loop {
            if let Some(outcome) = session.outcomes.get(&id) {
                return outcome.clone();
            }
            if session.state == ControllerState::Finished {
                // 終了時に全要求を解決しているので、ここに来るのは未知のIDのみ
                return Ok(());
            }

            let Some(mut events) = session.events.take() else {
                // 他のスレッドが読み取り中
                session = self
                    .reader_returned
                    .wait(session)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            drop(session);

            let event = events.await_event();

            session = self.lock();
            session.events = Some(events);
            session.on_event(event);
            self.reader_returned.notify_all();
        }
    }
}

/// プロセスコントローラ
///
/// 本体関数を保持し、最初の `run_until` / `finish` で子プロセスを fork します。
/// 子プロセスは一度だけ生成され、再生成されることはありません。
///
/// # Examples
/// ```no_run
/// use forkstep_core::Controller;
///
/// let mut process = Controller::new(|breakpoints| {
///     std::fs::write("/tmp/first_file", b"").unwrap();
///     breakpoints.mark("after_first_file");
///     std::fs::write("/tmp/second_file", b"").unwrap();
/// });
///
/// process.run_until("after_first_file")?.wait()?;
/// process.finish()?.wait()?;
/// # Ok::<(), forkstep_core::Error>(())
/// ```
pub struct Controller {
    name: String,
    shared: Arc<Shared>,
}

impl Controller {
    /// 新しいコントローラを作成する（子プロセスはまだ生成しない）
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&Breakpoints) + Send + 'static,
    {
        Self::named("process", body)
    }

    /// ログに表示する名前付きでコントローラを作成する
    pub fn named<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&Breakpoints) + Send + 'static,
    {
        let name = name.into();
        let session = Session::new(name.clone(), Box::new(body));
        Self {
            name,
            shared: Arc::new(Shared::new(session)),
        }
    }

    /// 子プロセスがブレークポイント `label` に到達するまで実行する
    ///
    /// 必要なら子プロセスを生成し、停止中なら継続を指示します。
    /// 到達を待つには返されたハンドルの `wait` を呼びます。
    pub fn run_until(&mut self, label: impl Into<Label>) -> Result<WaitHandle> {
        let label = label.into();
        let id = self.shared.lock().run_until(label.clone())?;
        Ok(WaitHandle::new(
            Arc::clone(&self.shared),
            id,
            RequestKind::RunUntil(label),
        ))
    }

    /// 残りのブレークポイントを無視して子プロセスを最後まで実行する
    pub fn finish(&mut self) -> Result<WaitHandle> {
        let id = self.shared.lock().finish()?;
        Ok(WaitHandle::new(
            Arc::clone(&self.shared),
            id,
            RequestKind::Finish,
        ))
    }

    /// コントローラ名を取得する
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 現在の状態を取得する
    pub fn state(&self) -> ControllerState {
        self.shared.lock().state.clone()
    }

    /// 子プロセスのIDを取得する（未生成なら `None`）
    pub fn pid(&self) -> Option<i32> {
        self.shared.lock().child.as_ref().map(ChildProcess::pid)
    }

    /// 回収済みであれば子プロセスの終了状態を取得する
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.shared.lock().child.as_ref().and_then(ChildProcess::status)
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}
