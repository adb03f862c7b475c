//! Scripted gateway for tests: the far end of a [`Link::pair`].

use std::time::Duration;

use serde_json::{Value, json};

use frames::RequestFrame;

use crate::client::Client;
use crate::config::BotConfig;
use crate::session::{BOOT_SUBSCRIPTIONS, Session};
use crate::transport::{Link, Peer, TransportEvent};

pub(crate) fn test_config() -> BotConfig {
    let mut config = BotConfig::new("test-token-123");
    config.request_timeout = Duration::from_millis(500);
    config.event_queue = 16;
    config.max_concurrent_handlers = 4;
    config
}

pub(crate) struct Gateway {
    peer: Peer,
}

impl Gateway {
    pub(crate) async fn start(config: &BotConfig) -> (Client, Gateway) {
        let (link, peer) = Link::pair();
        let client = Client::start(link, config).await.expect("client starts on open link");
        (client, Gateway { peer })
    }

    /// Next frame the client wrote, decoded.
    pub(crate) async fn next_request(&mut self) -> RequestFrame {
        let text = tokio::time::timeout(Duration::from_secs(2), self.peer.sent.recv())
            .await
            .expect("client request timed out")
            .expect("client link closed");
        serde_json::from_str(&text).expect("request frame decodes")
    }

    /// Next frame the client wrote, asserting its method.
    pub(crate) async fn expect(&mut self, method: &str) -> RequestFrame {
        let frame = self.next_request().await;
        assert_eq!(frame.method, method, "unexpected request {frame:?}");
        frame
    }

    pub(crate) fn try_next_request(&mut self) -> Option<RequestFrame> {
        let text = self.peer.sent.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    pub(crate) fn push_text(&self, text: &str) {
        self.peer.push(text);
    }

    pub(crate) fn push(&self, frame: &Value) {
        self.peer.push_json(frame);
    }

    pub(crate) fn reply(&self, frame: &RequestFrame, result: Value) {
        let id = frame.id.expect("tracked request");
        self.push(&json!({ "id": id, "result": result }));
    }

    pub(crate) fn reply_error(&self, frame: &RequestFrame, code: &str, message: &str) {
        let id = frame.id.expect("tracked request");
        self.push(&json!({ "id": id, "error": { "code": code, "message": message } }));
    }

    pub(crate) fn event(&self, event: &str, data: Value) {
        self.push(&json!({ "event": event, "data": data }));
    }

    pub(crate) fn close(&self) {
        let _ = self.peer.events.send(TransportEvent::Close);
    }
}

/// `getBot` result for bot `b1` controlling character `bot1`.
pub(crate) fn bot_result() -> Value {
    json!({
        "rid": "core.bot.b1",
        "models": {
            "core.bot.b1": { "char": { "rid": "core.char.bot1" } },
            "core.char.bot1": { "id": "bot1", "name": "Bot", "surname": "Tender", "desc": "Pours drinks." }
        }
    })
}

/// Boot a session against a gateway that accepts every step.
pub(crate) async fn booted_session(config: &BotConfig) -> (Session, Gateway) {
    let (client, mut gateway) = Gateway::start(config).await;
    let session = Session::new(client, config.clone());
    let boot = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });

    let version = gateway.expect("version").await;
    gateway.reply(&version, json!({ "protocol": "1.2.1" }));
    let auth = gateway.expect("auth.auth.authenticateBot").await;
    gateway.reply(&auth, Value::Null);
    let bot = gateway.expect("call.core.getBot").await;
    gateway.reply(&bot, bot_result());
    for rid in BOOT_SUBSCRIPTIONS {
        let frame = gateway.expect(&format!("subscribe.{rid}")).await;
        gateway.reply(&frame, json!({}));
    }
    let control = gateway.expect("call.core.bot.b1.controlChar").await;
    gateway.reply(&control, Value::Null);
    let wakeup = gateway.expect("call.core.char.bot1.ctrl.wakeup").await;
    gateway.reply(&wakeup, Value::Null);

    boot.await.expect("boot task").expect("boot succeeds");
    (session, gateway)
}
