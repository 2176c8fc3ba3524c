//! チャネル上を流れるメッセージ
//!
//! 1メッセージを改行で終わる1行のJSONとして送ります。
//! ラベル中の改行や制御文字はJSONのエスケープで表現されるので、行境界は崩れません。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead};

/// 子プロセスから親プロセスへのイベント
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// 指定ラベルのブレークポイントに到達した
    ReachedBreakpoint(String),
    /// 本体関数が終了した
    Finished,
}

/// 親プロセスから子プロセスへのコマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// 次のブレークポイントまで実行を継続する
    Proceed,
    /// 以降のブレークポイントを無視して最後まで実行する
    FinishUnconditionally,
}

/// メッセージを改行終端のJSON行にエンコードする
pub fn encode<T: Serialize>(message: &T) -> io::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

/// ストリームから1行読み取ってデコードする
///
/// ストリームが閉じていた場合は `Ok(None)` を返します。
/// 改行で終わらない断片は書き込み側が途中で終了したものとみなし、同じく `None` にします。
pub fn decode<T: DeserializeOwned, R: BufRead>(reader: &mut R) -> io::Result<Option<T>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 || !line.ends_with('\n') {
        return Ok(None);
    }
    let message = serde_json::from_str(line.trim_end())?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_decode_event_sequence() {
        let mut bytes = encode(&Event::ReachedBreakpoint("after_read".to_string())).unwrap();
        bytes.extend(encode(&Event::Finished).unwrap());

        let mut cursor = Cursor::new(bytes);
        assert_eq!(
            decode::<Event, _>(&mut cursor).unwrap(),
            Some(Event::ReachedBreakpoint("after_read".to_string()))
        );
        assert_eq!(decode::<Event, _>(&mut cursor).unwrap(), Some(Event::Finished));
        assert_eq!(decode::<Event, _>(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_wire_format_is_json_lines() {
        assert_eq!(
            encode(&Event::ReachedBreakpoint("a".into())).unwrap(),
            b"{\"reached_breakpoint\":\"a\"}\n"
        );
        assert_eq!(encode(&Command::FinishUnconditionally).unwrap(), b"\"finish_unconditionally\"\n");
    }

    #[test]
    fn test_label_with_newline_stays_on_one_line() {
        let label = "line one\nline two".to_string();
        let bytes = encode(&Event::ReachedBreakpoint(label.clone())).unwrap();
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);

        let decoded = decode::<Event, _>(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, Some(Event::ReachedBreakpoint(label)));
    }

    #[test]
    fn test_truncated_line_reads_as_closed() {
        let mut bytes = encode(&Event::ReachedBreakpoint("cut".into())).unwrap();
        bytes.truncate(bytes.len() - 3);

        assert_eq!(decode::<Event, _>(&mut Cursor::new(bytes)).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode::<Command, _>(&mut Cursor::new(b"\"jump\"\n".to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // コマンドはイベントとして解釈できない
        let proceed = encode(&Command::Proceed).unwrap();
        assert!(decode::<Event, _>(&mut Cursor::new(proceed)).is_err());
    }
}
