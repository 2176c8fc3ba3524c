//! プロセスコントローラの結合テスト

use forkstep_core::{Controller, ControllerState, Error, ExitStatus, Label};
use nix::sys::signal::Signal;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn touch(path: &Path) {
    fs::write(path, b"").expect("Failed to touch file");
}

#[test]
fn test_run_until_then_finish() {
    let tmpdir = tempfile::tempdir().expect("Failed to create tempdir");
    let first_file = tmpdir.path().join("first_file");
    let second_file = tmpdir.path().join("second_file");

    let mut process = {
        let (first_file, second_file) = (first_file.clone(), second_file.clone());
        Controller::new(move |breakpoints| {
            touch(&first_file);
            breakpoints.mark("after_first_file");
            touch(&second_file);
        })
    };

    // 最初の要求まで子プロセスは生成されない
    assert!(!first_file.exists());
    assert!(!second_file.exists());

    process.run_until("after_first_file").unwrap().wait().unwrap();
    assert!(first_file.exists());
    assert!(!second_file.exists());

    process.finish().unwrap().wait().unwrap();
    assert!(first_file.exists());
    assert!(second_file.exists());
}

#[test]
fn test_breakpoint_not_reached() {
    let mut process = Controller::new(|breakpoints| {
        if std::env::var_os("FORKSTEP_NEVER_SET_IN_TESTS").is_some() {
            breakpoints.mark("will_not_run");
        }
    });

    let err = process.run_until("will_not_run").unwrap().wait().unwrap_err();
    assert_eq!(err.label, Label::from("will_not_run"));
    assert_eq!(err.exit, Some(ExitStatus::Exited(0)));
    assert_eq!(process.state(), ControllerState::Finished);
}

#[test]
fn test_wait_is_idempotent() {
    let tmpdir = tempfile::tempdir().expect("Failed to create tempdir");
    let log = tmpdir.path().join("log");

    let mut process = {
        let log = log.clone();
        Controller::new(move |breakpoints| {
            // 実行回数を数える
            let mut runs = fs::read_to_string(&log).unwrap_or_default();
            runs.push('x');
            fs::write(&log, runs).expect("Failed to write log");
            breakpoints.mark("once");
        })
    };

    let handle = process.run_until("once").unwrap();
    handle.wait().unwrap();
    handle.wait().unwrap();
    assert!(handle.is_resolved());

    let missing = process.run_until("missing").unwrap();
    let first = missing.wait().unwrap_err();
    let second = missing.wait().unwrap_err();
    assert_eq!(first, second);

    assert_eq!(fs::read_to_string(&log).unwrap(), "x");
}

#[test]
fn test_finish_without_run_until() {
    let tmpdir = tempfile::tempdir().expect("Failed to create tempdir");
    let files: Vec<PathBuf> = (0..3).map(|i| tmpdir.path().join(format!("file{}", i))).collect();

    let mut process = {
        let files = files.clone();
        Controller::new(move |breakpoints| {
            for (i, file) in files.iter().enumerate() {
                touch(file);
                breakpoints.mark(format!("after_file{}", i));
            }
        })
    };

    process.finish().unwrap().wait().unwrap();
    assert!(files.iter().all(|f| f.exists()));
    assert_eq!(process.exit_status(), Some(ExitStatus::Exited(0)));
}

#[test]
fn test_finish_does_not_stop_at_later_breakpoints() {
    let tmpdir = tempfile::tempdir().expect("Failed to create tempdir");
    let done = tmpdir.path().join("done");

    let mut process = {
        let done = done.clone();
        Controller::new(move |breakpoints| {
            breakpoints.mark("a");
            breakpoints.mark("b");
            breakpoints << "c";
            touch(&done);
        })
    };

    process.run_until("a").unwrap().wait().unwrap();
    assert!(!done.exists());

    process.finish().unwrap().wait().unwrap();
    assert!(done.exists());
}

#[test]
fn test_unrequested_breakpoints_are_passed() {
    let tmpdir = tempfile::tempdir().expect("Failed to create tempdir");
    let before_last = tmpdir.path().join("before_last");

    let mut process = {
        let before_last = before_last.clone();
        Controller::new(move |breakpoints| {
            breakpoints.mark("first");
            breakpoints.mark("second");
            touch(&before_last);
            breakpoints.mark("third");
        })
    };

    // first と second は自動的に通過する
    process.run_until("third").unwrap().wait().unwrap();
    assert!(before_last.exists());
    assert_eq!(process.state(), ControllerState::AtBreakpoint(Label::from("third")));

    process.finish().unwrap().wait().unwrap();
}

#[test]
fn test_earlier_breakpoint_is_not_revisited() {
    let mut process = Controller::new(|breakpoints| {
        breakpoints.mark("first");
        breakpoints.mark("second");
    });

    process.run_until("second").unwrap().wait().unwrap();

    let err = process.run_until("first").unwrap().wait().unwrap_err();
    assert_eq!(err.label, Label::from("first"));
}

#[test]
fn test_finish_supersedes_unwaited_run_until() {
    let mut process = Controller::new(|breakpoints| {
        breakpoints.mark("a");
        breakpoints.mark("b");
    });

    let pending = process.run_until("b").unwrap();
    process.finish().unwrap().wait().unwrap();

    // finish により b では停止せず、到達も報告されない
    let err = pending.wait().unwrap_err();
    assert_eq!(err.label, Label::from("b"));
    assert!(matches!(process.run_until("a"), Err(Error::AlreadyFinished)));
}

#[test]
fn test_panicking_body_reports_exit_code() {
    let mut process = Controller::new(|breakpoints| {
        breakpoints.mark("before_panic");
        panic!("boom");
    });

    process.run_until("before_panic").unwrap().wait().unwrap();

    let err = process.run_until("after_panic").unwrap().wait().unwrap_err();
    assert_eq!(err.exit, Some(ExitStatus::Exited(101)));
}

#[test]
fn test_crash_is_reported_as_not_reached() {
    let mut process = Controller::new(|_| std::process::abort());

    let err = process.run_until("unreachable").unwrap().wait().unwrap_err();
    assert_eq!(err.exit, Some(ExitStatus::Signaled(Signal::SIGABRT)));
    assert!(err.to_string().contains("SIGABRT"));
}

#[test]
fn test_controllers_are_independent() {
    let mut p1 = Controller::named("p1", |breakpoints| breakpoints.mark("stop"));
    let mut p2 = Controller::named("p2", |breakpoints| breakpoints.mark("stop"));

    let h1 = p1.run_until("stop").unwrap();
    let h2 = p2.run_until("stop").unwrap();

    // 逆順に待機しても互いにブロックしない
    h2.wait().unwrap();
    h1.wait().unwrap();

    p1.finish().unwrap().wait().unwrap();
    p2.finish().unwrap().wait().unwrap();
}

#[test]
fn test_long_label_is_reached() {
    let label = "x".repeat(70 * 1024);
    let mut process = {
        let label = label.clone();
        Controller::new(move |breakpoints| breakpoints.mark(label))
    };

    process.run_until(label.as_str()).unwrap().wait().unwrap();
    assert_eq!(process.state(), ControllerState::AtBreakpoint(Label::from(label)));
    process.finish().unwrap().wait().unwrap();
    assert_eq!(process.exit_status(), Some(ExitStatus::Exited(0)));
}

#[test]
fn test_run_until_with_runtime_label() {
    let mut process = Controller::new(|breakpoints| breakpoints.mark("step_2"));

    let label = format!("step_{}", 1 + 1);
    process.run_until(label.as_str()).unwrap().wait().unwrap();
    process.finish().unwrap().wait().unwrap();
}

#[cfg(feature = "tokio")]
#[tokio::test]
async fn test_wait_async() {
    let mut process = Controller::new(|breakpoints| breakpoints.mark("async"));

    process.run_until("async").unwrap().wait_async().await.unwrap();
    process.finish().unwrap().wait_async().await.unwrap();
    assert_eq!(process.state(), ControllerState::Finished);
}

#[cfg(feature = "tokio")]
#[tokio::test]
async fn test_cancelled_wait_async_does_not_block_controller() {
    let mut process = Controller::new(|breakpoints| {
        std::thread::sleep(Duration::from_millis(500));
        breakpoints.mark("late");
    });

    let handle = process.run_until("late").unwrap();
    let timed_out = tokio::time::timeout(Duration::from_millis(100), handle.wait_async()).await;
    assert!(timed_out.is_err());

    // 取り残された待機スレッドがあっても状態参照と finish は即座に戻る
    let started = Instant::now();
    assert_eq!(process.state(), ControllerState::Running);
    let finish = process.finish().unwrap();
    assert!(started.elapsed() < Duration::from_millis(300));

    finish.wait_async().await.unwrap();
    handle.wait_async().await.unwrap();
    assert_eq!(process.state(), ControllerState::Finished);
}
