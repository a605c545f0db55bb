mod config;
mod logging;

use std::{error::Error, rc::Rc};

use config::HubchatSmokeConfig;
use hubchat_core::{Event, NotifierEvent, RoomEvent, SessionEvent};
use hubchat_sync::{
    PostMessage, SessionConnector, SessionOptions,
    testing::{MockChannel, MockTransport},
};
use serde_json::{Value, json};
use tokio::task::LocalSet;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init();

    let config = match HubchatSmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(err) = LocalSet::new().run_until(run(config)).await {
        error!(error = %err, "smoke run failed");
        std::process::exit(1);
    }
}

/// Connect, open a room, drop the socket, rejoin and check that only the
/// missed messages are replayed.
async fn run(config: HubchatSmokeConfig) -> Result<(), Box<dyn Error>> {
    let transport = MockTransport::new();
    let session = SessionConnector::new(
        transport.clone(),
        SessionOptions {
            credential: Some(config.credential.clone()),
            refresher: None,
            spawner: None,
            config: config.sync.clone(),
        },
    );
    for name in SessionEvent::NAMES {
        session.on(name, |event| info!(?event, "session event"))?;
    }

    session.connect()?;
    transport.open();
    script_channel(&transport, "user:self")?.join_reply_ok(json!({
        "user": {"id": "smoke-user", "name": "Smoke"}
    }));

    let room = session.room(&config.room_id)?;
    for name in RoomEvent::NAMES {
        room.on(name, |event| info!(?event, "room event"))?;
    }
    let notifier = session.notifier()?;
    for name in NotifierEvent::NAMES {
        notifier.on(name, |event| info!(?event, "notifier event"))?;
    }

    room.connect()?;
    notifier.connect()?;
    let room_topic = format!("room:{}", config.room_id);
    let room_channel = script_channel(&transport, &room_topic)?;
    let notifier_channel = script_channel(&transport, "notifier:smoke-user")?;
    room_channel.join_reply_ok(room_snapshot(&config.room_id, &[1, 2]));
    notifier_channel.join_reply_ok(json!({"items": []}));

    let reply = room.post_message(PostMessage::Text("hello from smoke".to_owned()))?;
    if let Some(sent) = room_channel.last_push() {
        sent.push.reply_ok(message(&config.room_id, 3));
    }
    let posted = reply.await?;
    info!(message_id = posted.id, "message posted");

    transport.close();
    transport.open();
    info!(resume = %room_channel.join_params(), "rejoining room");
    room_channel.join_reply_ok(room_snapshot(&config.room_id, &[2, 3, 4, 5]));
    notifier_channel.join_reply_ok(json!({"items": [{
        "room": room_record(&config.room_id),
        "message": message(&config.room_id, 5)
    }]}));

    let ids: Vec<u64> = room.messages().iter().map(|message| message.id).collect();
    if ids != [1, 2, 3, 4, 5] {
        warn!(?ids, "unexpected room window after rejoin");
        return Err(format!("unexpected room window {ids:?}").into());
    }
    info!(
        first_known_id = ?room.first_known_id(),
        last_known_id = ?room.last_known_id(),
        watermark = ?notifier.watermark(),
        "rejoin replay verified"
    );

    room.disconnect();
    notifier.disconnect();
    session.disconnect();
    Ok(())
}

fn script_channel(transport: &MockTransport, topic: &str) -> Result<Rc<MockChannel>, String> {
    transport
        .channel(topic)
        .ok_or_else(|| format!("channel '{topic}' was never opened"))
}

fn room_record(room_id: &str) -> Value {
    json!({"id": room_id, "owner": {"id": "smoke-user"}})
}

fn message(room_id: &str, id: u64) -> Value {
    json!({
        "id": id,
        "room_id": room_id,
        "user_id": "smoke-user",
        "body": format!("message {id}"),
        "timestamp_ms": 1_700_000_000_000_u64 + id
    })
}

fn room_snapshot(room_id: &str, ids: &[u64]) -> Value {
    json!({
        "room": room_record(room_id),
        "messages": ids.iter().map(|id| message(room_id, *id)).collect::<Vec<_>>(),
        "markers": []
    })
}
