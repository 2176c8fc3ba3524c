//! REPLコマンド

/// 操作対象のプロセス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    P1,
    P2,
}

impl Target {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "p1" | "1" => Some(Target::P1),
            "p2" | "2" => Some(Target::P2),
            _ => None,
        }
    }

    /// 表示名
    pub fn name(&self) -> &'static str {
        match self {
            Target::P1 => "p1",
            Target::P2 => "p2",
        }
    }

    /// プロセス配列のインデックス
    pub fn index(&self) -> usize {
        match self {
            Target::P1 => 0,
            Target::P2 => 1,
        }
    }
}

/// REPLコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// ブレークポイントまで実行して到達を待つ
    Until(Target, String),
    /// ブレークポイントまでの実行を指示するだけで待たない
    Resume(Target, String),
    /// 直前に指示した要求の完了を待つ
    Wait(Target),
    /// 最後まで実行する
    Finish(Target),
    /// 各プロセスの状態表示
    Status,
    /// カウンタ値の表示
    Counter,
    /// プロセスとカウンタを作り直す
    Reset,
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        match (parts[0], &parts[1..]) {
            ("until" | "u", [target, label]) => Some(Command::Until(Target::parse(target)?, label.to_string())),
            ("resume" | "r", [target, label]) => Some(Command::Resume(Target::parse(target)?, label.to_string())),
            ("wait" | "w", [target]) => Some(Command::Wait(Target::parse(target)?)),
            ("finish" | "f", [target]) => Some(Command::Finish(Target::parse(target)?)),
            ("status" | "s", []) => Some(Command::Status),
            ("counter" | "c", []) => Some(Command::Counter),
            ("reset", []) => Some(Command::Reset),
            ("help" | "h" | "?", []) => Some(Command::Help),
            ("quit" | "q" | "exit", []) => Some(Command::Quit),
            _ => None,
        }
    }
}
