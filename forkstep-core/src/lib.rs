//! Forkstep のコア機能
//!
//! このクレートは、名前付きブレークポイントで子プロセスの進行を制御する仕組みを提供します。
//! テストから複数の子プロセスを特定のブレークポイントまで進めることで、
//! 競合状態を決定的に再現できます。

pub mod breakpoint;
pub mod controller;
pub mod errors;
pub mod wait;

pub use breakpoint::{Breakpoints, Label};
pub use controller::{Controller, ControllerState};
pub use errors::{BreakpointNotReached, Error};
pub use wait::{RequestKind, WaitHandle};

// 他のクレートから使用するために再エクスポート
pub use forkstep_target::ExitStatus;

/// コントローラ操作の結果型
pub type Result<T> = std::result::Result<T, Error>;
