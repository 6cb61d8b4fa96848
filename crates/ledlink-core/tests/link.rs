//! End-to-end link tests against an in-memory device.

use std::time::Duration;

use ledlink_core::{
    memory_link, BackoffConfig, Command, ConnectionState, Error, Frame, LinkConfig, LinkEvent,
    LinkWorker, Responder, Rgb, StripSink, StripStatus,
};
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

struct NullSink;

impl StripSink for NullSink {
    fn apply(&mut self, _status: &StripStatus, _params: &[u8]) -> ledlink_core::Result<()> {
        Ok(())
    }

    fn blackout(&mut self) -> ledlink_core::Result<()> {
        Ok(())
    }
}

fn fast_config() -> LinkConfig {
    LinkConfig {
        endpoint: "memory".to_string(),
        response_timeout_ms: 500,
        failure_threshold: 1,
        status_interval_ms: 50,
        backoff: BackoffConfig {
            initial_ms: 10,
            max_ms: 50,
            multiplier: 2.0,
        },
        ..LinkConfig::default()
    }
}

/// Runs a device on `stream`, reporting every decoded command.
fn spawn_device(stream: DuplexStream, seen: mpsc::UnboundedSender<Command>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut session = ledlink_core::Session::new("device", stream);
        let mut responder = Responder::new(NullSink, StripStatus::default());
        loop {
            let frame = match session.receive(Duration::from_millis(20)).await {
                Ok(frame) => frame,
                Err(Error::Timeout(_)) => continue,
                Err(_) => return,
            };
            if let Ok(command) = frame.command() {
                let _ = seen.send(command);
            }
            let response = responder.handle(&frame);
            if session.send(&Frame::from(&response)).await.is_err() {
                return;
            }
        }
    })
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<LinkEvent>, mut pred: F) -> LinkEvent
where
    F: FnMut(&LinkEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for link event")
}

fn became(state: ConnectionState) -> impl FnMut(&LinkEvent) -> bool {
    move |event| matches!(event, LinkEvent::StateChanged { to, .. } if *to == state)
}

/// Next state-changing command the device saw, skipping status polls.
async fn next_change(seen: &mut mpsc::UnboundedReceiver<Command>) -> Command {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match seen.recv().await {
                Some(Command::QueryStatus) => continue,
                Some(command) => return command,
                None => panic!("device stopped"),
            }
        }
    })
    .await
    .expect("timed out waiting for device command")
}

#[tokio::test]
async fn test_reconnect_replays_last_color() {
    let (connector, plug) = memory_link();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let first_device = spawn_device(plug.plug(), seen_tx.clone());

    let (worker, handle) = LinkWorker::new(connector, fast_config());
    let mut events = handle.subscribe();
    let worker_task = tokio::spawn(worker.run());

    wait_for(&mut events, became(ConnectionState::Connected)).await;

    let red = Command::set_color(255, 0, 0).unwrap();
    handle.submit(red.clone()).await.unwrap();
    wait_for(&mut events, |e| matches!(e, LinkEvent::Ack { opcode: 0x01 })).await;
    assert_eq!(next_change(&mut seen_rx).await, red);

    handle.submit(Command::QueryStatus).await.unwrap();
    let status = wait_for(&mut events, |e| {
        matches!(e, LinkEvent::Status(s) if s.color == Rgb::new(255, 0, 0))
    })
    .await;
    if let LinkEvent::Status(status) = status {
        assert!(status.powered);
    }

    // Unplug mid-session
    first_device.abort();
    wait_for(&mut events, became(ConnectionState::Disconnected)).await;

    let _second_device = spawn_device(plug.plug(), seen_tx);
    wait_for(&mut events, became(ConnectionState::Connected)).await;
    assert_eq!(next_change(&mut seen_rx).await, red);

    handle.submit(Command::SetBrightness(10)).await.unwrap();
    assert_eq!(next_change(&mut seen_rx).await, Command::SetBrightness(10));

    handle.shutdown().await.unwrap();
    worker_task.await.unwrap();
}

#[tokio::test]
async fn test_intents_while_disconnected_replay_power_off_only() {
    let (connector, plug) = memory_link();
    let (worker, handle) = LinkWorker::new(connector, fast_config());
    let mut events = handle.subscribe();
    let worker_task = tokio::spawn(worker.run());

    handle
        .submit(Command::set_color(0, 0, 255).unwrap())
        .await
        .unwrap();
    handle.submit(Command::PowerOff).await.unwrap();

    let (state, intended) = handle.snapshot().await.unwrap();
    assert!(!state.is_open());
    assert!(intended.powered_off);

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let _device = spawn_device(plug.plug(), seen_tx);
    wait_for(&mut events, became(ConnectionState::Connected)).await;

    assert_eq!(next_change(&mut seen_rx).await, Command::PowerOff);
    wait_for(&mut events, |e| matches!(e, LinkEvent::Ack { opcode: 0x04 })).await;

    // Nothing else was replayed
    let (state, _) = handle.snapshot().await.unwrap();
    assert_eq!(state, ConnectionState::Connected);
    while let Ok(command) = seen_rx.try_recv() {
        assert_eq!(command, Command::QueryStatus);
    }

    handle.shutdown().await.unwrap();
    worker_task.await.unwrap();
}

#[tokio::test]
async fn test_handle_reports_stopped_worker() {
    let (connector, _plug) = memory_link();
    let (worker, handle) = LinkWorker::new(connector, fast_config());
    let worker_task = tokio::spawn(worker.run());

    handle.shutdown().await.unwrap();
    worker_task.await.unwrap();

    assert!(matches!(
        handle.submit(Command::PowerOff).await,
        Err(Error::WorkerGone)
    ));
}
