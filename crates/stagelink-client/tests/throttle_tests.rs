//! 运动节流器行为测试

use parking_lot::Mutex;
use proptest::prelude::*;
use serial_test::serial;
use stagelink_client::{
    ClientError, DriverError, JogConfig, JogPad, MotionSample, MotionThrottler,
    deflection_to_sample,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn recorder() -> (
    Arc<Mutex<Vec<(Instant, f64, f64)>>>,
    impl Fn(f64, f64) -> Result<(), ClientError> + Send + Sync + 'static,
) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    (sent, move |dx, dy| {
        sink.lock().push((Instant::now(), dx, dy));
        Ok(())
    })
}

fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
#[serial]
fn test_floor_interval_is_enforced() {
    const MIN_MOVE_INTERVAL_MS: u64 = 400;
    let throttler =
        MotionThrottler::new(Duration::from_millis(MIN_MOVE_INTERVAL_MS), 50.0).unwrap();
    let (sent, callback) = recorder();
    throttler.set_movement_callback(callback);

    let start = Instant::now();
    let window = Duration::from_millis(2000);
    let mut i = 0.0;
    while start.elapsed() < window {
        throttler.submit(MotionSample::new(1.0 + i, 0.0)).unwrap();
        i += 1.0;
        thread::sleep(Duration::from_millis(10));
    }
    throttler.stop();

    let sent = sent.lock();
    let in_window = sent
        .iter()
        .filter(|(at, _, _)| at.duration_since(start) < window)
        .count();
    assert!(in_window as u64 <= 2000 / MIN_MOVE_INTERVAL_MS, "sent {}", in_window);
    assert!(in_window >= 3, "sent {}", in_window);

    for pair in sent.windows(2) {
        let gap = pair[1].0.duration_since(pair[0].0);
        assert!(gap >= Duration::from_millis(MIN_MOVE_INTERVAL_MS - 5), "gap {:?}", gap);
    }

    let stats = throttler.stats();
    assert!(stats.superseded > stats.sent);
}

#[test]
#[serial]
fn test_latest_target_wins_while_send_in_flight() {
    let throttler = MotionThrottler::new(Duration::from_millis(20), 100.0).unwrap();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let in_flight = Arc::new(AtomicUsize::new(0));
    {
        let sent = sent.clone();
        let in_flight = in_flight.clone();
        throttler.set_movement_callback(move |dx, _| {
            in_flight.fetch_add(1, Ordering::SeqCst);
            // 第一条命令模拟慢速发送
            if dx == 1.0 {
                thread::sleep(Duration::from_millis(150));
            }
            sent.lock().push(dx);
            Ok(())
        });
    }

    throttler.submit(MotionSample::new(1.0, 0.0)).unwrap();
    assert!(wait_for(Duration::from_secs(2), || in_flight.load(Ordering::SeqCst) == 1));

    // A、B、C 在发送进行中到达
    for dx in [2.0, 3.0, 4.0] {
        throttler.submit(MotionSample::new(dx, 0.0)).unwrap();
    }

    assert!(wait_for(Duration::from_secs(2), || sent.lock().len() == 2));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(*sent.lock(), vec![1.0, 4.0]);
    assert_eq!(throttler.stats().superseded, 2);
}

#[test]
#[serial]
fn test_send_failure_does_not_stop_worker() {
    let throttler = MotionThrottler::new(Duration::from_millis(10), 100.0).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        throttler.set_movement_callback(move |_, _| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DriverError::NotConnected.into())
            } else {
                Ok(())
            }
        });
    }

    throttler.submit(MotionSample::new(1.0, 0.0)).unwrap();
    assert!(wait_for(Duration::from_secs(1), || throttler.stats().failed == 1));
    throttler.submit(MotionSample::new(2.0, 0.0)).unwrap();
    assert!(wait_for(Duration::from_secs(1), || throttler.stats().sent == 1));
    assert!(throttler.is_running());
}

#[test]
fn test_samples_are_clamped_to_max_step() {
    let throttler = MotionThrottler::new(Duration::from_millis(10), 10.0).unwrap();
    let (sent, callback) = recorder();
    throttler.set_movement_callback(callback);

    throttler.submit(MotionSample::new(0.0, 25.0)).unwrap();
    assert!(wait_for(Duration::from_secs(1), || sent.lock().len() == 1));
    let (_, dx, dy) = sent.lock()[0];
    assert_eq!((dx, dy), (0.0, 10.0));
}

#[test]
fn test_stop_discards_pending_and_is_idempotent() {
    let throttler = MotionThrottler::new(Duration::from_millis(500), 10.0).unwrap();
    let (sent, callback) = recorder();
    throttler.set_movement_callback(callback);

    throttler.submit(MotionSample::new(1.0, 0.0)).unwrap();
    assert!(wait_for(Duration::from_secs(1), || sent.lock().len() == 1));

    // 第二个样本在最小间隔内等待，stop() 必须打断等待
    throttler.submit(MotionSample::new(2.0, 0.0)).unwrap();
    let start = Instant::now();
    throttler.stop();
    throttler.stop();
    assert!(start.elapsed() < Duration::from_millis(300));

    thread::sleep(Duration::from_millis(600));
    assert_eq!(sent.lock().len(), 1);
}

#[test]
#[serial]
fn test_dead_zone_drag_never_sends() {
    let config = JogConfig {
        tick_interval_ms: 10,
        min_move_interval_ms: 10,
        ..Default::default()
    };
    let (sent, callback) = recorder();
    let pad = JogPad::new(config, callback).unwrap();

    pad.begin_drag(0.0, 0.0);
    pad.update_drag(0.05, 0.05);
    thread::sleep(Duration::from_millis(200));
    assert!(sent.lock().is_empty());

    pad.update_drag(0.6, 0.0);
    assert!(wait_for(Duration::from_secs(1), || !sent.lock().is_empty()));
    let (_, dx, _) = sent.lock()[0];
    assert!((dx - 50.0 * 0.36).abs() < 1e-9);

    pad.end_drag();
    pad.stop();
    pad.stop();
}

#[test]
#[serial]
fn test_end_drag_stops_samples() {
    let config = JogConfig {
        tick_interval_ms: 10,
        min_move_interval_ms: 10,
        ..Default::default()
    };
    let (sent, callback) = recorder();
    let pad = JogPad::new(config, callback).unwrap();

    pad.begin_drag(0.0, 0.0);
    pad.update_drag(1.0, 0.0);
    assert!(wait_for(Duration::from_secs(1), || sent.lock().len() >= 2));
    pad.end_drag();

    thread::sleep(Duration::from_millis(50));
    let count = sent.lock().len();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(sent.lock().len(), count);
}

#[test]
#[serial]
fn test_end_drag_cancels_sample_waiting_out_floor() {
    let (sent, callback) = recorder();
    let pad = JogPad::new(JogConfig::default(), callback).unwrap();
    assert_eq!(pad.config().min_move_interval(), Duration::from_millis(400));

    let started = Instant::now();
    pad.begin_drag(0.0, 0.0);
    pad.update_drag(1.0, 0.0);
    assert!(wait_for(Duration::from_secs(1), || !sent.lock().is_empty()));

    // 第一次发送后的下一个样本正在等待最小间隔
    let release_at = started + Duration::from_millis(350);
    thread::sleep(release_at.saturating_duration_since(Instant::now()));
    pad.end_drag();
    let ended = Instant::now();

    thread::sleep(Duration::from_millis(600));
    let late: Vec<_> = sent
        .lock()
        .iter()
        .filter(|(at, _, _)| *at > ended)
        .map(|(at, _, _)| at.duration_since(ended))
        .collect();
    assert!(late.is_empty(), "moves sent after end_drag: {:?}", late);
    assert!(pad.stats().discarded >= 1);
}

proptest! {
    #[test]
    fn prop_dead_zone_produces_no_sample(
        angle in 0.0f64..std::f64::consts::TAU,
        fraction in 0.0f64..0.0999,
        radius in 0.5f64..500.0,
    ) {
        let distance = fraction * radius;
        let sample = deflection_to_sample(
            distance * angle.cos(),
            distance * angle.sin(),
            radius,
            0.10,
            50.0,
        );
        prop_assert!(sample.is_none());
    }

    #[test]
    fn prop_step_is_quadratic_and_bounded(
        angle in 0.0f64..std::f64::consts::TAU,
        fraction in 0.11f64..3.0,
        max_step in 1.0f64..200.0,
    ) {
        let sample = deflection_to_sample(fraction * angle.cos(), fraction * angle.sin(), 1.0, 0.10, max_step);
        let sample = sample.expect("outside the dead zone");
        let n = fraction.min(1.0);
        prop_assert!((sample.magnitude() - max_step * n * n).abs() < 1e-6 * max_step);
        prop_assert!(sample.magnitude() <= max_step + 1e-9);
    }
}
