//! Stage 门面测试（内存传输）

use parking_lot::Mutex;
use serde_json::json;
use stagelink_client::{
    ClientError, ConnectionConfig, ConnectionState, DriverError, JogConfig, Stage, TargetFlag,
};
use stagelink_protocol::{Progress, Request, ServerMessage};
use stagelink_transport::mock::{DialScript, MockHandle, MockTransport, ScriptedDialer};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn reply(request: &Request) -> Vec<ServerMessage> {
    match request.command.as_str() {
        "get_position" => vec![ServerMessage::Result {
            data: json!({"x_um": 0.0, "y_um": 0.0}),
        }],
        "get_status" => vec![ServerMessage::Result {
            data: json!({"state": "idle", "busy": false}),
        }],
        "run_sweep" => {
            let total = request.args["configurations"].as_u64().unwrap_or(0) as u32;
            let mut replies: Vec<_> = (1..=total)
                .map(|current| ServerMessage::Progress {
                    current,
                    total,
                    message: Some(format!("configuration {}", current)),
                })
                .collect();
            replies.push(ServerMessage::Result {
                data: json!({"completed": total}),
            });
            replies
        },
        "home" => vec![ServerMessage::Result { data: json!(null) }],
        _ => Vec::new(),
    }
}

fn connected_stage() -> (Stage, MockHandle) {
    let dialer = Arc::new(ScriptedDialer::new());
    let (transport, handle) = MockTransport::with_responder(reply);
    dialer.push(DialScript::Connect(transport));

    let config = ConnectionConfig::new("127.0.0.1", 5005)
        .with_read_timeout_ms(200)
        .with_health_check(60_000, 100, 3);
    let stage = Stage::with_dialer(config, Arc::new(TargetFlag::new(true)), dialer);
    stage.connect().unwrap();
    (stage, handle)
}

fn commands(handle: &MockHandle) -> Vec<String> {
    handle
        .sent_requests()
        .into_iter()
        .map(|r| r.command)
        .collect()
}

#[test]
fn test_connect_requires_target() {
    let dialer = Arc::new(ScriptedDialer::new());
    let stage = Stage::with_dialer(
        ConnectionConfig::default(),
        Arc::new(TargetFlag::new(false)),
        dialer.clone(),
    );
    assert!(matches!(
        stage.connect(),
        Err(ClientError::Driver(DriverError::ConfigNotSet))
    ));
    assert_eq!(dialer.attempts(), 0);
}

#[test]
fn test_move_and_home() {
    let (stage, handle) = connected_stage();
    stage.move_relative(5.0, -3.0).unwrap();
    stage.home().unwrap();

    let sent = handle.sent_requests();
    let mv = sent.iter().find(|r| r.command == "move_relative").unwrap();
    assert_eq!(mv.args["dx_um"], json!(5.0));
    assert_eq!(mv.args["dy_um"], json!(-3.0));
    assert!(commands(&handle).contains(&"home".to_string()));

    assert!(matches!(
        stage.move_relative(f64::NAN, 0.0),
        Err(ClientError::InvalidParameter(_))
    ));
}

#[test]
fn test_run_sweep_reports_progress() {
    let (stage, _handle) = connected_stage();
    let progress = Mutex::new(Vec::new());

    let summary = stage
        .run_sweep(4, &|p: &Progress| progress.lock().push((p.current, p.total)))
        .unwrap();
    assert_eq!(summary.completed, 4);
    assert_eq!(*progress.lock(), vec![(1, 4), (2, 4), (3, 4), (4, 4)]);

    assert!(stage.run_sweep(0, &|_: &Progress| {}).is_err());
}

#[test]
fn test_jog_sends_relative_moves() {
    let (stage, handle) = connected_stage();
    let config = JogConfig {
        tick_interval_ms: 10,
        min_move_interval_ms: 20,
        ..Default::default()
    };
    let pad = stage.jog(config).unwrap();

    pad.begin_drag(0.0, 0.0);
    pad.update_drag(0.0, 1.0);
    let deadline = Instant::now() + Duration::from_secs(2);
    while pad.stats().sent < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    pad.end_drag();
    pad.stop();

    assert!(pad.stats().sent >= 2);
    let moves: Vec<_> = handle
        .sent_requests()
        .into_iter()
        .filter(|r| r.command == "move_relative")
        .collect();
    assert!(moves.len() >= 2);
    assert_eq!(moves[0].args["dy_um"], json!(50.0));
}

#[test]
fn test_jog_keeps_running_while_disconnected() {
    let (stage, _handle) = connected_stage();
    let config = JogConfig {
        tick_interval_ms: 10,
        min_move_interval_ms: 10,
        ..Default::default()
    };
    let pad = stage.jog(config).unwrap();
    stage.disconnect();
    assert_eq!(stage.state(), ConnectionState::Disconnected);

    pad.begin_drag(0.0, 0.0);
    pad.update_drag(1.0, 0.0);
    let deadline = Instant::now() + Duration::from_secs(2);
    while pad.stats().failed < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(pad.stats().failed >= 2);
    assert_eq!(pad.stats().sent, 0);
}

#[test]
fn test_status_through_stage() {
    let (stage, _handle) = connected_stage();
    assert!(stage.is_connected());
    assert_eq!(stage.status().unwrap().state, "idle");
    assert_eq!(stage.position().unwrap().x_um, 0.0);
    assert!(stage.metrics().requests_sent >= 3);
}
