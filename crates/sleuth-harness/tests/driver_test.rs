//! The tokio driver against the fake backend.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use async_trait::async_trait;
use sleuth_client::{
    ClientConfig, Connector, Driver, DriverUpdate, Inbound, Socket, SystemEnv, TransportError,
};
use sleuth_core::{DropTarget, SessionEvent};
use sleuth_harness::{FakeServer, create_shared_server};
use tokio::sync::mpsc;

/// Socket that accepts every frame and never pushes anything.
struct QuietSocket;

#[async_trait]
impl Socket for QuietSocket {
    async fn send(&mut self, _text: String) -> Result<(), TransportError> {
        Ok(())
    }

    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        std::future::pending().await
    }

    async fn close(&mut self, _code: u16) -> Result<(), TransportError> {
        Ok(())
    }
}

struct QuietConnector;

#[async_trait]
impl Connector for QuietConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Socket>, TransportError> {
        Ok(Box::new(QuietSocket))
    }
}

async fn wait_for(
    updates: &mut mpsc::Receiver<DriverUpdate>,
    mut accept: impl FnMut(&DriverUpdate) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = updates.recv().await.unwrap();
            if accept(&update) {
                return;
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn driver_loads_and_discards_against_backend() {
    let server = create_shared_server(FakeServer::standard(1), 1);
    let config = ClientConfig::new("ws://sleuth.test/ws", 1, 1);
    let (handle, mut updates) =
        Driver::start(config, SystemEnv::new(), server.clone(), QuietConnector);

    wait_for(&mut updates, |update| {
        matches!(update, DriverUpdate::View(view) if view.has_loaded_once && !view.is_loading)
    })
    .await;

    handle
        .send(SessionEvent::DropCard { card_id: 14, target: DropTarget::DiscardPile })
        .unwrap();
    wait_for(&mut updates, |update| {
        matches!(update, DriverUpdate::View(view)
            if view.private.as_ref().is_some_and(|p| p.card(14).is_none()))
    })
    .await;

    // The answer travels through a spawned task; give it a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown().await.unwrap();

    let backend = server.lock().unwrap();
    assert_eq!(backend.count("discard"), 1);
    assert!(backend.private(1).unwrap().card(14).is_none());
}

#[tokio::test]
async fn refused_intent_is_reported_not_sent() {
    let mut backend = FakeServer::standard(1);
    backend.pass_turn(2);
    let server = create_shared_server(backend, 1);
    let config = ClientConfig::new("ws://sleuth.test/ws", 1, 1);
    let (handle, mut updates) =
        Driver::start(config, SystemEnv::new(), server.clone(), QuietConnector);

    wait_for(&mut updates, |update| {
        matches!(update, DriverUpdate::View(view) if view.has_loaded_once)
    })
    .await;

    handle
        .send(SessionEvent::DropCard { card_id: 14, target: DropTarget::DiscardPile })
        .unwrap();
    wait_for(&mut updates, |update| matches!(update, DriverUpdate::Rejected(_))).await;
    handle.shutdown().await.unwrap();

    assert_eq!(server.lock().unwrap().count("discard"), 0);
}
