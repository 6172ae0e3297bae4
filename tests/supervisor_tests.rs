//! Integration tests for script supervision: event routing, stream capture,
//! exit reporting, and stopping.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    TEST_DEADLINE, collect_until_end, emit_line, names, script_dir, test_config, write_script,
};
use script_host::supervisor::{
    ChannelSink, SupervisorError, Supervisor, routed_event_name, stop_script,
};
use serde_json::json;

const END: &str = "childScriptEnd";
const ERROR: &str = "childScriptError";
const LOG: &str = "scriptLog";

/// Shell loop that waits for the terminate control, then exits cleanly.
const WAIT_FOR_KILL: &str = r#"while read line <&3; do
  case "$line" in
    *'"name":"kill"'*) echo "got kill"; exit 0 ;;
  esac
done"#;

#[tokio::test]
async fn test_event_is_routed_with_single_argument_unwrapped() {
    let dir = script_dir();
    write_script(dir.path(), "progress.sh", &emit_line("progress", "[50]"));

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("progress.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    let pid = handle.pid();
    assert!(handle.is_running());

    let events = collect_until_end(&mut rx, END).await;
    assert_eq!(handle.pid(), pid);
    assert_eq!(
        names(&events),
        vec![routed_event_name(pid, "progress").as_str(), END]
    );
    assert_eq!(events[0].payload, json!(50));
    assert_eq!(events[1].payload, json!(pid));
}

#[tokio::test]
async fn test_multi_and_zero_argument_events_keep_arrays() {
    let dir = script_dir();
    let body = format!(
        "{}\n{}",
        emit_line("pair", r#"[1,"b"]"#),
        emit_line("ping", "[]")
    );
    write_script(dir.path(), "arrays.sh", &body);

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("arrays.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    let pid = handle.pid();

    let events = collect_until_end(&mut rx, END).await;
    let pair = events
        .iter()
        .find(|e| e.name == routed_event_name(pid, "pair"))
        .unwrap();
    let ping = events
        .iter()
        .find(|e| e.name == routed_event_name(pid, "ping"))
        .unwrap();
    assert_eq!(pair.payload, json!([1, "b"]));
    assert_eq!(ping.payload, json!([]));
}

#[tokio::test]
async fn test_unrecognized_channel_lines_are_ignored() {
    let dir = script_dir();
    let body = format!(
        "echo 'not json' >&3\n\
         echo '{{\"kind\":\"event\",\"name\":\"untagged\",\"args\":[]}}' >&3\n\
         echo '{{\"channel\":\"other\",\"kind\":\"event\",\"name\":\"foreign\",\"args\":[]}}' >&3\n\
         {}",
        emit_line("real", "[true]")
    );
    write_script(dir.path(), "noise.sh", &body);

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("noise.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    let pid = handle.pid();

    let events = collect_until_end(&mut rx, END).await;
    assert_eq!(
        names(&events),
        vec![routed_event_name(pid, "real").as_str(), END]
    );
}

#[tokio::test]
async fn test_stdout_lines_become_script_logs_in_order() {
    let dir = script_dir();
    write_script(
        dir.path(),
        "logs.sh",
        "echo first\necho\necho '   second   '\nprintf 'third\\n'",
    );

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("logs.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    let pid = handle.pid();

    let events = collect_until_end(&mut rx, END).await;
    let logs: Vec<_> = events.iter().filter(|e| e.name == LOG).collect();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].payload, json!({"pid": pid, "message": "first"}));
    assert_eq!(logs[1].payload, json!({"pid": pid, "message": "second"}));
    assert_eq!(logs[2].payload, json!({"pid": pid, "message": "third"}));
}

#[tokio::test]
async fn test_invalid_utf8_on_stdout_keeps_later_lines() {
    let dir = script_dir();
    write_script(
        dir.path(),
        "binary.sh",
        "echo before\nprintf 'x\\377y\\n'\necho after\necho err >&2\nexit 1",
    );

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("binary.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    let pid = handle.pid();

    let events = collect_until_end(&mut rx, END).await;
    let messages: Vec<_> = events
        .iter()
        .filter(|e| e.name == LOG)
        .map(|e| e.payload["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(messages, vec!["before", "x\u{FFFD}y", "after"]);

    // The pipe stayed open, so the real exit status was observed.
    assert_eq!(&names(&events)[3..], &[ERROR, END]);
    assert_eq!(events[3].payload, json!("err"));
    assert_eq!(events[4].payload, json!(pid));
}

#[tokio::test]
async fn test_exit_code_one_reports_accumulated_stderr() {
    let dir = script_dir();
    write_script(
        dir.path(),
        "fail.sh",
        "printf 'Error: ' >&2\nprintf 'bad input\\n' >&2\nexit 1",
    );

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("fail.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    let pid = handle.pid();

    let events = collect_until_end(&mut rx, END).await;
    assert_eq!(names(&events), vec![ERROR, END]);
    assert_eq!(events[0].payload, json!("Error: bad input"));
    assert_eq!(events[1].payload, json!(pid));
    // The error event flushes the buffer.
    assert_eq!(handle.accumulated_error_text(), "");
}

#[tokio::test]
async fn test_other_exit_codes_only_report_end() {
    let dir = script_dir();
    write_script(dir.path(), "two.sh", "echo oops >&2\nexit 2");
    write_script(dir.path(), "zero.sh", "echo warning >&2\nexit 0");

    let supervisor = Supervisor::new(test_config());
    for name in ["two.sh", "zero.sh"] {
        let (sink, mut rx) = ChannelSink::new();
        let handle = supervisor
            .start_script(name, Arc::new(sink), Some(dir.path()))
            .unwrap();
        let events = collect_until_end(&mut rx, END).await;
        assert_eq!(names(&events), vec![END], "{name}");
        assert!(!handle.accumulated_error_text().is_empty());
    }
}

#[tokio::test]
async fn test_handle_state_after_exit() {
    let dir = script_dir();
    write_script(dir.path(), "quick.sh", "exit 0");

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("quick.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();

    collect_until_end(&mut rx, END).await;
    tokio::time::timeout(TEST_DEADLINE, handle.wait())
        .await
        .unwrap();
    assert!(!handle.is_running());
    assert!(!handle.is_connected());
    assert!(matches!(
        handle.kill(),
        Err(SupervisorError::NotRunning { .. })
    ));
}

#[tokio::test]
async fn test_same_event_from_two_scripts_does_not_collide() {
    let dir = script_dir();
    write_script(dir.path(), "a.sh", &emit_line("done", r#"["a"]"#));
    write_script(dir.path(), "b.sh", &emit_line("done", r#"["b"]"#));

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let sink = Arc::new(sink);
    let a = supervisor
        .start_script("a.sh", sink.clone(), Some(dir.path()))
        .unwrap();
    let b = supervisor
        .start_script("b.sh", sink, Some(dir.path()))
        .unwrap();
    assert_ne!(a.pid(), b.pid());

    let mut seen = Vec::new();
    let mut ends = 0;
    tokio::time::timeout(TEST_DEADLINE, async {
        while let Some(event) = rx.recv().await {
            if event.name == END {
                ends += 1;
                if ends == 2 {
                    break;
                }
            } else {
                seen.push(event);
            }
        }
    })
    .await
    .unwrap();

    let from_a = seen
        .iter()
        .find(|e| e.name == routed_event_name(a.pid(), "done"))
        .unwrap();
    let from_b = seen
        .iter()
        .find(|e| e.name == routed_event_name(b.pid(), "done"))
        .unwrap();
    assert_eq!(from_a.payload, json!("a"));
    assert_eq!(from_b.payload, json!("b"));
}

#[tokio::test]
async fn test_stop_sends_terminate_then_disconnects() {
    let dir = script_dir();
    write_script(dir.path(), "wait.sh", WAIT_FOR_KILL);

    let mut config = test_config();
    config.stop_grace_ms = 150;
    let supervisor = Supervisor::new(config);
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("wait.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    let pid = handle.pid();
    assert!(handle.is_connected());

    let started = Instant::now();
    let result = handle.stop().await;
    assert_eq!(result.unwrap(), pid);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(!handle.is_connected());

    let events = collect_until_end(&mut rx, END).await;
    assert!(
        events
            .iter()
            .any(|e| e.name == LOG && e.payload == json!({"pid": pid, "message": "got kill"}))
    );
    assert_eq!(events.last().unwrap().payload, json!(pid));
}

#[tokio::test]
async fn test_second_stop_reports_not_connected() {
    let dir = script_dir();
    write_script(dir.path(), "wait.sh", WAIT_FOR_KILL);

    let supervisor = Supervisor::new(test_config());
    let (sink, _rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("wait.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    let pid = handle.pid();

    handle.stop().await.unwrap();
    match handle.stop().await {
        Err(SupervisorError::NotConnected { pid: stale }) => assert_eq!(stale, pid),
        other => panic!("Expected NotConnected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stop_script_on_stale_handle_calls_back_immediately() {
    let dir = script_dir();
    write_script(dir.path(), "quick.sh", "exit 0");

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("quick.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();
    collect_until_end(&mut rx, END).await;

    let outcome = Arc::new(std::sync::Mutex::new(None));
    let outcome_cb = Arc::clone(&outcome);
    stop_script(&handle, move |result| {
        *outcome_cb.lock().unwrap() = Some(result);
    });

    // Reported before stop_script returned, without any await in between.
    let result = outcome.lock().unwrap().take().unwrap();
    let err = result.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("{} process no longer valid for termination.", handle.pid())
    );
}

#[tokio::test]
async fn test_stop_script_callback_receives_pid() {
    let dir = script_dir();
    write_script(dir.path(), "wait.sh", WAIT_FOR_KILL);

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("wait.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();

    let (tx, done) = tokio::sync::oneshot::channel();
    stop_script(&handle, move |result| {
        let _ = tx.send(result);
    });
    let result = tokio::time::timeout(TEST_DEADLINE, done)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.unwrap(), handle.pid());

    collect_until_end(&mut rx, END).await;
}

#[tokio::test]
async fn test_kill_ends_a_script_that_ignores_stop() {
    let dir = script_dir();
    write_script(dir.path(), "stubborn.sh", "exec sleep 30");

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("stubborn.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();

    handle.stop().await.unwrap();
    assert!(handle.is_running());
    handle.kill().unwrap();

    let events = collect_until_end(&mut rx, END).await;
    assert_eq!(names(&events), vec![END]);
    assert!(!handle.is_running());
}

#[tokio::test]
async fn test_host_event_reaches_script() {
    let dir = script_dir();
    write_script(dir.path(), "echo.sh", "read line <&3\nprintf '%s\\n' \"$line\"");

    let supervisor = Supervisor::new(test_config());
    let (sink, mut rx) = ChannelSink::new();
    let handle = supervisor
        .start_script("echo.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();

    handle
        .send_event("greet", vec![json!("hello")])
        .await
        .unwrap();

    let events = collect_until_end(&mut rx, END).await;
    let log = events.iter().find(|e| e.name == LOG).unwrap();
    let echoed: serde_json::Value =
        serde_json::from_str(log.payload["message"].as_str().unwrap()).unwrap();
    assert_eq!(echoed["kind"], "event");
    assert_eq!(echoed["name"], "greet");
    assert_eq!(echoed["args"], json!(["hello"]));
    assert_eq!(echoed["channel"], "script-host");
}

#[tokio::test]
async fn test_missing_script_fails_to_spawn() {
    let dir = script_dir();
    let supervisor = Supervisor::new(test_config());
    let (sink, _rx) = ChannelSink::new();
    let result = supervisor.start_script("no_such_script", Arc::new(sink), Some(dir.path()));
    assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
}

#[tokio::test]
async fn test_configured_event_names_are_used() {
    let dir = script_dir();
    write_script(dir.path(), "fail.sh", "echo out\necho err >&2\nexit 1");

    let mut config = test_config();
    config.events.script_error = "scriptFailed".to_string();
    config.events.script_end = "scriptDone".to_string();
    config.events.script_log = "console".to_string();
    let supervisor = Supervisor::new(config);
    let (sink, mut rx) = ChannelSink::new();
    supervisor
        .start_script("fail.sh", Arc::new(sink), Some(dir.path()))
        .unwrap();

    let events = collect_until_end(&mut rx, "scriptDone").await;
    let mut seen = names(&events);
    seen.sort_unstable();
    assert_eq!(seen, vec!["console", "scriptDone", "scriptFailed"]);
}
