//! Forkstep 子プロセス制御
//!
//! このクレートは、ブレークポイントで制御される子プロセスのための低レベル機能を提供します。
//! fork による子プロセスの生成、パイプ対による双方向チャネル、終了状態の回収などを行います。

pub mod channel;
pub mod codec;
pub mod process;

pub use channel::{channel, ChildEndpoint, CommandWriter, EventReader, ParentEndpoint};
pub use codec::{Command, Event};
pub use process::{ChildProcess, ExitStatus};

/// 子プロセス制御の結果型
pub type Result<T> = anyhow::Result<T>;
