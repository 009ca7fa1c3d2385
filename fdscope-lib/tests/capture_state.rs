//! Capture state machine driven through a scripted transport

mod common;

use common::*;
use fdscope_lib::capture::CaptureState;
use fdscope_lib::events::{self, EventReceiver};
use fdscope_lib::protocol::Op;
use fdscope_lib::{CaptureConfig, CaptureController, CaptureEvent, Command};
use std::sync::Arc;
use std::time::Duration;

fn controller() -> (Arc<MockTransport>, CaptureController<MockTransport>, EventReceiver) {
    init_logging();
    let config = CaptureConfig {
        pool_size: 4,
        ..Default::default()
    };
    let transport = Arc::new(MockTransport::new());
    let (tx, rx) = events::channel(256);
    let controller = CaptureController::new(Arc::clone(&transport), &config, tx);
    (transport, controller, rx)
}

async fn capturing() -> (Arc<MockTransport>, CaptureController<MockTransport>, EventReceiver) {
    let (transport, controller, rx) = controller();
    controller.attach().await.unwrap();
    controller.start().await.unwrap();
    assert_eq!(controller.state(), CaptureState::Capturing);
    (transport, controller, rx)
}

fn state_changes(rx: &mut EventReceiver) -> Vec<CaptureState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CaptureEvent::CaptureStateChanged(state) = event {
            states.push(state);
        }
    }
    states
}

#[tokio::test(start_paused = true)]
async fn test_new_controller_is_suspended() {
    let (transport, controller, _rx) = controller();

    assert_eq!(controller.state(), CaptureState::Suspended);
    assert!(!controller.can_start());
    assert!(!controller.can_pause());
    assert!(!controller.can_stop());

    let err = controller.start().await.unwrap_err();
    assert!(matches!(
        err,
        ScopeError::CommandNotAllowed {
            command: Command::Start,
            state: CaptureState::Suspended
        }
    ));
    assert!(transport.control_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_attach_resets_and_fills_pool() {
    let (transport, controller, mut rx) = controller();

    controller.attach().await.unwrap();
    settle().await;

    assert_eq!(controller.state(), CaptureState::Stopped);
    assert_eq!(transport.requests(), vec![u8::from(Op::Reset)]);
    assert_eq!(controller.pump().outstanding(), 4);
    assert_eq!(state_changes(&mut rx), vec![CaptureState::Stopped]);
}

#[tokio::test(start_paused = true)]
async fn test_attach_with_failed_reset_leaves_pool_idle() {
    let (transport, controller, _rx) = controller();
    transport.reply_control(Op::Reset.into(), Err(TransferError::Stall));

    assert!(controller.attach().await.is_err());
    settle().await;

    assert_eq!(controller.state(), CaptureState::Stopped);
    assert!(!controller.pump().is_running());
    assert_eq!(transport.bulk_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pause_from_stopped_is_refused() {
    let (transport, controller, _rx) = controller();
    controller.attach().await.unwrap();

    assert!(matches!(
        controller.pause().await,
        Err(ScopeError::CommandNotAllowed {
            command: Command::Pause,
            state: CaptureState::Stopped
        })
    ));
    assert_eq!(controller.state(), CaptureState::Stopped);
    assert_eq!(transport.requests(), vec![u8::from(Op::Reset)]);
}

#[tokio::test(start_paused = true)]
async fn test_start_commits_capturing() {
    let (transport, controller, mut rx) = capturing().await;

    assert_eq!(transport.requests(), vec![u8::from(Op::Reset), u8::from(Op::CaptureStart)]);
    assert!(controller.pending().is_none());
    assert!(controller.can_pause());
    assert!(controller.can_stop());
    assert!(!controller.can_start());
    assert_eq!(
        state_changes(&mut rx),
        vec![CaptureState::Stopped, CaptureState::Capturing]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_stays_stopped() {
    let (transport, controller, _rx) = controller();
    controller.attach().await.unwrap();
    transport.reply_control(Op::CaptureStart.into(), Err(TransferError::Stall));

    assert!(matches!(
        controller.start().await,
        Err(ScopeError::ControlTransfer { op: Op::CaptureStart, .. })
    ));
    assert_eq!(controller.state(), CaptureState::Stopped);
    assert!(controller.pending().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pause_keeps_pool_running() {
    let (transport, controller, _rx) = capturing().await;

    controller.pause().await.unwrap();
    settle().await;

    assert_eq!(controller.state(), CaptureState::Paused);
    assert_eq!(transport.requests().last(), Some(&u8::from(Op::CaptureStop)));
    assert_eq!(controller.pump().outstanding(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_pause_stays_capturing() {
    let (transport, controller, _rx) = capturing().await;
    transport.reply_control(Op::CaptureStop.into(), Err(TransferError::Stall));

    assert!(controller.pause().await.is_err());
    assert_eq!(controller.state(), CaptureState::Capturing);
    assert!(controller.pending().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resume_from_paused() {
    let (_transport, controller, _rx) = capturing().await;
    controller.pause().await.unwrap();

    assert!(controller.can_start());
    controller.start().await.unwrap();
    assert_eq!(controller.state(), CaptureState::Capturing);
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_history_and_idles_pool() {
    let (transport, controller, _rx) = controller();
    transport.push_bulk(Ok(frame_bytes(0x1, IdType::Standard, &[1])));
    transport.push_bulk(Ok(frame_bytes(0x2, IdType::Standard, &[2])));
    controller.attach().await.unwrap();
    controller.start().await.unwrap();
    settle().await;
    assert_eq!(controller.messages().len(), 2);

    controller.stop().await.unwrap();

    assert_eq!(controller.state(), CaptureState::Stopped);
    assert!(controller.messages().is_empty());
    assert!(!controller.pump().is_running());
    // Stop sends captureStop, never captureStart
    assert_eq!(transport.requests().last(), Some(&u8::from(Op::CaptureStop)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_stop_keeps_history() {
    let (transport, controller, _rx) = controller();
    transport.push_bulk(Ok(frame_bytes(0x1, IdType::Standard, &[1])));
    controller.attach().await.unwrap();
    controller.start().await.unwrap();
    settle().await;

    transport.reply_control(Op::CaptureStop.into(), Err(TransferError::Disconnected));
    assert!(controller.stop().await.is_err());

    assert_eq!(controller.state(), CaptureState::Capturing);
    assert_eq!(controller.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_newer_command_supersedes_pending() {
    let (transport, controller, _rx) = capturing().await;
    transport.delay_control(Op::CaptureStop.into(), Duration::from_millis(50));

    let (paused, stopped) = tokio::join!(controller.pause(), controller.stop());

    // The pause resolved last but had already been replaced by the stop
    assert!(paused.is_ok());
    assert!(stopped.is_ok());
    assert_eq!(controller.state(), CaptureState::Stopped);
    assert!(controller.pending().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pending_transition_visible_while_in_flight() {
    let (transport, controller, _rx) = capturing().await;
    transport.delay_control(Op::CaptureStop.into(), Duration::from_millis(50));

    let pause = controller.pause();
    tokio::pin!(pause);
    tokio::select! {
        _ = &mut pause => panic!("pause resolved before its reply"),
        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    }

    let pending = controller.pending().unwrap();
    assert_eq!(pending.command, Command::Pause);
    assert_eq!(pending.target, CaptureState::Paused);
    assert_eq!(controller.state(), CaptureState::Capturing);

    pause.await.unwrap();
    assert_eq!(controller.state(), CaptureState::Paused);
}

#[tokio::test(start_paused = true)]
async fn test_detach_suspends_from_any_state() {
    let (transport, controller, mut rx) = capturing().await;
    transport.delay_control(Op::CaptureStop.into(), Duration::from_millis(50));

    let pause = controller.pause();
    tokio::pin!(pause);
    tokio::select! {
        _ = &mut pause => panic!("pause resolved before its reply"),
        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    }

    controller.detach();
    assert_eq!(controller.state(), CaptureState::Suspended);
    assert!(controller.pending().is_none());
    assert!(!controller.pump().is_running());

    // The dropped transition cannot commit afterwards
    pause.await.unwrap();
    assert_eq!(controller.state(), CaptureState::Suspended);
    assert_eq!(state_changes(&mut rx).last(), Some(&CaptureState::Suspended));
}

#[tokio::test(start_paused = true)]
async fn test_superseded_stop_keeps_history() {
    let (transport, controller, _rx) = capturing().await;
    controller.pause().await.unwrap();
    transport.delay_control(Op::CaptureStop.into(), Duration::from_millis(50));

    let stop = controller.stop();
    tokio::pin!(stop);
    tokio::select! {
        _ = &mut stop => panic!("stop resolved before its reply"),
        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    }

    // Resume before the captureStop reply lands; the refilled pool reads both frames
    transport.push_bulk(Ok(frame_bytes(0x1, IdType::Standard, &[1])));
    transport.push_bulk(Ok(frame_bytes(0x2, IdType::Standard, &[2])));
    controller.start().await.unwrap();
    settle().await;
    assert_eq!(controller.messages().len(), 2);

    stop.await.unwrap();
    assert_eq!(controller.state(), CaptureState::Capturing);
    assert_eq!(controller.messages().len(), 2);
}
