use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trickle::{Config, ProgressCallback, ProgressEvent, Receiver, Sender, TransferState};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Custom callback implementation using a struct
struct TestCallback {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl TestCallback {
    fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ProgressCallback for TestCallback {
    fn on_progress(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn states(events: &[ProgressEvent]) -> Vec<TransferState> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_sender_and_receiver_lifecycles() {
    let receiver_cb = TestCallback::new();
    let receiver_events = receiver_cb.events.clone();

    let receiver = Receiver::bind(
        Config::receiver(0)
            .with_bind_addr(LOCALHOST)
            .with_echo(false),
    )
    .unwrap()
    .with_callback(receiver_cb);
    let port = receiver.local_addr().unwrap().port();
    let handle = tokio::spawn(receiver.run());

    let sender_cb = TestCallback::new();
    let sender_events = sender_cb.events.clone();
    let sender = Sender::new(
        Config::sender("127.0.0.1".to_string(), port).with_delay(Duration::from_millis(5)),
    )
    .unwrap()
    .with_callback(sender_cb);

    sender.send_from(&[7u8; 100][..]).await.unwrap();
    let received = handle.await.unwrap().unwrap();
    assert_eq!(received.total_bytes, 100);

    let events = sender_events.lock().unwrap();
    assert_eq!(
        states(&events),
        vec![
            TransferState::Connecting,
            TransferState::Streaming,
            TransferState::Draining,
            TransferState::Closed
        ]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Connected { peer, .. } if peer.port() == port)));

    let totals: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::ChunkSent { total_bytes, .. } => Some(*total_bytes),
            _ => None,
        })
        .collect();
    assert_eq!(totals, vec![40, 80, 100]);

    match events.last() {
        Some(ProgressEvent::Completed {
            total_bytes, chunks, ..
        }) => {
            assert_eq!(*total_bytes, 100);
            assert_eq!(*chunks, 3);
        }
        other => panic!("expected Completed last, got {:?}", other),
    }

    let events = receiver_events.lock().unwrap();
    assert_eq!(
        states(&events),
        vec![
            TransferState::Listening,
            TransferState::Streaming,
            TransferState::Draining,
            TransferState::Closed
        ]
    );

    let received_totals: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::ChunkReceived { total_bytes, .. } => Some(*total_bytes),
            _ => None,
        })
        .collect();
    assert!(received_totals.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(received_totals.last(), Some(&100));
}

#[tokio::test]
async fn test_closure_callback_sees_chunk_indices() {
    let receiver = Receiver::bind(
        Config::receiver(0)
            .with_bind_addr(LOCALHOST)
            .with_echo(false),
    )
    .unwrap();
    let port = receiver.local_addr().unwrap().port();
    let handle = tokio::spawn(receiver.run());

    let indices = Arc::new(Mutex::new(Vec::new()));
    let indices_ref = indices.clone();

    let sender = Sender::new(
        Config::sender("127.0.0.1".to_string(), port)
            .with_chunk_size(16)
            .with_delay(Duration::ZERO),
    )
    .unwrap()
    .with_callback(move |event: ProgressEvent| {
        if let ProgressEvent::ChunkSent { index, .. } = event {
            indices_ref.lock().unwrap().push(index);
        }
    });

    sender.send_from(&[1u8; 64][..]).await.unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(*indices.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_error_event_on_failed_connect() {
    let port = {
        let spare = std::net::TcpListener::bind((LOCALHOST, 0)).unwrap();
        spare.local_addr().unwrap().port()
    };

    let callback = TestCallback::new();
    let events = callback.events.clone();

    let sender = Sender::new(Config::sender("127.0.0.1".to_string(), port))
        .unwrap()
        .with_callback(callback);
    assert!(sender.send_from(&b"unused"[..]).await.is_err());

    let events = events.lock().unwrap();
    assert_eq!(
        states(&events),
        vec![TransferState::Connecting, TransferState::Closed]
    );
    assert!(matches!(events.last(), Some(ProgressEvent::Error(_))));
}
