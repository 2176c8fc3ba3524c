//! ブレークポイントチャネル
//!
//! 親プロセスと子プロセスの間で、2本のパイプを使って順序付き・ブロッキングの
//! メッセージをやり取りします。fork 時に子プロセスへ継承されることを前提にしています。

use crate::codec::{self, Command, Event};
use crate::Result;
use std::fs::File;
use std::io::{self, BufReader, Write as _};

/// 親プロセス側のイベント読み取り端
#[derive(Debug)]
pub struct EventReader {
    events: BufReader<File>,
}

/// 親プロセス側のコマンド書き込み端
#[derive(Debug)]
pub struct CommandWriter {
    commands: File,
}

/// 親プロセス側の端点
///
/// イベントの読み取り端とコマンドの書き込み端を保持します。
/// イベント待機中にも別スレッドからコマンドを送れるよう、[`ParentEndpoint::split`] で分割できます。
#[derive(Debug)]
pub struct ParentEndpoint {
    events: EventReader,
    commands: CommandWriter,
}

/// 子プロセス側の端点
///
/// イベントの書き込み端とコマンドの読み取り端を保持します。
#[derive(Debug)]
pub struct ChildEndpoint {
    events: File,
    commands: BufReader<File>,
}

/// パイプ対を作成して両端点を返す
pub fn channel() -> Result<(ParentEndpoint, ChildEndpoint)> {
    let (event_rx, event_tx) = nix::unistd::pipe()?;
    let (command_rx, command_tx) = nix::unistd::pipe()?;

    let parent = ParentEndpoint {
        events: EventReader {
            events: BufReader::new(File::from(event_rx)),
        },
        commands: CommandWriter {
            commands: File::from(command_tx),
        },
    };
    let child = ChildEndpoint {
        events: File::from(event_tx),
        commands: BufReader::new(File::from(command_rx)),
    };
    Ok((parent, child))
}

/// 1メッセージを書き込んでフラッシュする
fn send<T: serde::Serialize>(mut file: &File, message: &T) -> io::Result<()> {
    file.write_all(&codec::encode(message)?)?;
    file.flush()
}

impl EventReader {
    /// 次のイベントを待機する
    ///
    /// 子プロセス側の書き込み端がすべて閉じられた場合は `Ok(None)` を返します。
    pub fn await_event(&mut self) -> io::Result<Option<Event>> {
        codec::decode(&mut self.events)
    }
}

impl CommandWriter {
    /// コマンドを送信する
    pub fn send_command(&self, command: Command) -> io::Result<()> {
        send(&self.commands, &command)
    }
}

impl ParentEndpoint {
    /// 次のイベントを待機する
    pub fn await_event(&mut self) -> io::Result<Option<Event>> {
        self.events.await_event()
    }

    /// コマンドを送信する
    pub fn send_command(&self, command: Command) -> io::Result<()> {
        self.commands.send_command(command)
    }

    /// 読み取り端と書き込み端に分割する
    pub fn split(self) -> (EventReader, CommandWriter) {
        (self.events, self.commands)
    }
}

impl ChildEndpoint {
    /// イベントを送信する
    pub fn send_event(&self, event: &Event) -> io::Result<()> {
        send(&self.events, event)
    }

    /// コマンドを待機する
    ///
    /// 親プロセス側が閉じられていた場合は `UnexpectedEof` を返します。
    pub fn await_command(&mut self) -> io::Result<Command> {
        codec::decode(&mut self.commands)?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "command channel closed by parent")
        })
    }
}
