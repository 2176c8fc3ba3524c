//! ファイルディスクリプタのリーク検査
//!
//! プロセス全体のディスクリプタ数を数えるので、他のテストと並行しないよう
//! このファイルにはテストを1つだけ置きます。

use forkstep_core::Controller;
use std::fs;

fn open_descriptors() -> usize {
    fs::read_dir("/proc/self/fd")
        .expect("Failed to list /proc/self/fd")
        .count()
}

#[test]
fn test_channel_descriptors_are_closed() {
    let before = open_descriptors();

    // 完了まで実行したプロセス
    let mut finished = Controller::new(|breakpoints| breakpoints.mark("stop"));
    finished.run_until("stop").unwrap().wait().unwrap();
    assert!(open_descriptors() > before);
    finished.finish().unwrap().wait().unwrap();
    assert_eq!(open_descriptors(), before);

    // ブレークポイントに到達しないまま終了したプロセス
    let mut unreached = Controller::new(|_| {});
    assert!(unreached.run_until("missing").unwrap().wait().is_err());
    assert_eq!(open_descriptors(), before);

    // 停止中にドロップされたプロセス
    let mut dropped = Controller::new(|breakpoints| breakpoints.mark("stop"));
    dropped.run_until("stop").unwrap().wait().unwrap();
    drop(dropped);
    assert_eq!(open_descriptors(), before);

    drop(finished);
    drop(unreached);
    assert_eq!(open_descriptors(), before);
}
