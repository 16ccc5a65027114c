// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the bridge session backend against a shell-script bridge.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use wa_gateway_core::session::{
    BridgeConfig, BridgeSessionFactory, OutboundMessage, SessionError, SessionEvent,
    SessionFactory, SessionOptions,
};

const FAKE_BRIDGE: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"id":\([0-9]*\),.*/\1/p')
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([A-Za-z]*\)".*/\1/p')
  case "$method" in
    initialize)
      printf '{"event":"loading_screen","percent":50,"message":"WhatsApp"}\n'
      printf '{"event":"qr","qr":"data:image/png;base64,QR1"}\n'
      printf '{"id":%s,"result":null}\n' "$id"
      if [ "$EXIT_AFTER_INIT" = "1" ]; then exit 0; fi
      ;;
    getState)
      printf '{"id":%s,"result":"OPENING"}\n' "$id"
      ;;
    sendMessage)
      printf '{"id":%s,"result":{"id":"true_5511@c.us_ABC","timestamp":1700000000}}\n' "$id"
      ;;
    destroy)
      printf '{"id":%s,"result":null}\n' "$id"
      exit 0
      ;;
    *)
      printf '{"id":%s,"error":{"message":"unknown method"}}\n' "$id"
      ;;
  esac
done
"#;

fn write_script(dir: &Path, exit_after_init: bool) -> PathBuf {
    let path = dir.join("bridge.sh");
    let header = if exit_after_init {
        "EXIT_AFTER_INIT=1\n"
    } else {
        "EXIT_AFTER_INIT=0\n"
    };
    std::fs::write(&path, format!("{}{}", header, FAKE_BRIDGE)).unwrap();
    path
}

fn factory(script: &Path) -> BridgeSessionFactory {
    BridgeSessionFactory::new(BridgeConfig {
        command: PathBuf::from("sh"),
        args: vec![script.display().to_string()],
        request_timeout: Duration::from_secs(5),
    })
}

#[tokio::test]
async fn test_bridge_session_full_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), false);
    let sessions_root = dir.path().join("sessions");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = factory(&script)
        .create(SessionOptions::new(11, "tok", &sessions_root), tx)
        .unwrap();

    session.initialize().await.unwrap();
    assert!(sessions_root.join("session_11").is_dir());

    assert_eq!(
        rx.recv().await,
        Some(SessionEvent::LoadingProgress {
            percent: 50,
            message: "WhatsApp".into()
        })
    );
    assert_eq!(
        rx.recv().await,
        Some(SessionEvent::QrIssued("data:image/png;base64,QR1".into()))
    );

    assert_eq!(session.connection_state().await.unwrap(), "OPENING");

    let sent = session
        .send_message(
            "5511@c.us",
            &OutboundMessage::Text {
                body: "hello".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(sent.id, "true_5511@c.us_ABC");
    assert_eq!(sent.timestamp, Some(1_700_000_000));

    session.destroy().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A requested shutdown is not reported as a disconnect.
    assert!(rx.try_recv().is_err());
    assert!(matches!(
        session.connection_state().await,
        Err(SessionError::Closed)
    ));
}

#[tokio::test]
async fn test_bridge_exit_reports_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), true);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = factory(&script)
        .create(SessionOptions::new(12, "tok", dir.path()), tx)
        .unwrap();

    session.initialize().await.unwrap();

    let mut last = None;
    while let Some(event) = rx.recv().await {
        if matches!(event, SessionEvent::Disconnected(_)) {
            last = Some(event);
            break;
        }
    }
    assert_eq!(
        last,
        Some(SessionEvent::Disconnected("bridge exited".into()))
    );

    assert!(matches!(
        session
            .send_message("1@c.us", &OutboundMessage::Text { body: "x".into() })
            .await,
        Err(SessionError::Closed)
    ));
}

#[tokio::test]
async fn test_bridge_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let factory = BridgeSessionFactory::new(BridgeConfig {
        command: dir.path().join("no-such-bridge"),
        args: Vec::new(),
        request_timeout: Duration::from_secs(1),
    });

    let (tx, _rx) = mpsc::unbounded_channel();
    let session = factory
        .create(SessionOptions::new(13, "tok", dir.path()), tx)
        .unwrap();

    assert!(matches!(
        session.initialize().await,
        Err(SessionError::StartFailed(_))
    ));
    assert_eq!(factory.backend(), "bridge");
}
