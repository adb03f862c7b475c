use super::*;
use crate::testing::{Gateway, booted_session, test_config};

#[tokio::test]
async fn actions_need_an_identity() {
    let config = test_config();
    let (client, mut gateway) = Gateway::start(&config).await;
    let session = Session::new(client, config);

    assert!(matches!(session.say("hello"), Err(SessionError::NotBooted)));
    assert!(matches!(session.summon("c1"), Err(SessionError::NotBooted)));
    assert!(matches!(session.look_up_characters("Omi").await, Err(SessionError::NotBooted)));
    assert!(gateway.try_next_request().is_none());
}

#[tokio::test]
async fn say_sends_ctrl_call() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    let request = session.say("Hello there").unwrap();
    assert!(request.is_sent());

    let frame = gateway.expect("call.core.char.bot1.ctrl.say").await;
    assert_eq!(frame.params["msg"], "Hello there");
    assert_eq!(frame.id, request.id());
}

#[tokio::test]
async fn simple_messages_use_their_action_names() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    session.pose("waves").unwrap();
    session.ooc("brb").unwrap();
    session.describe("Tall and shiny.").unwrap();

    assert_eq!(gateway.expect("call.core.char.bot1.ctrl.pose").await.params["msg"], "waves");
    assert_eq!(gateway.expect("call.core.char.bot1.ctrl.ooc").await.params["msg"], "brb");
    assert_eq!(gateway.expect("call.core.char.bot1.ctrl.describe").await.params["msg"], "Tall and shiny.");
}

#[tokio::test]
async fn directed_messages_carry_target_and_style() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    session.whisper("c1", "psst", MessageStyle::default()).unwrap();
    let frame = gateway.expect("call.core.char.bot1.ctrl.whisper").await;
    assert_eq!(frame.params["charId"], "c1");
    assert_eq!(frame.params["msg"], "psst");
    assert_eq!(frame.params["pose"], false);
    assert_eq!(frame.params["ooc"], false);

    session.message("c2", "leans in", MessageStyle::pose()).unwrap();
    let frame = gateway.expect("call.core.char.bot1.ctrl.message").await;
    assert_eq!(frame.params["charId"], "c2");
    assert_eq!(frame.params["pose"], true);

    session.address("c3", "hello", MessageStyle::ooc()).unwrap();
    let frame = gateway.expect("call.core.char.bot1.ctrl.address").await;
    assert_eq!(frame.params["ooc"], true);
}

#[tokio::test]
async fn targeted_actions_send_char_id() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    session.summon("c1").unwrap();
    session.join("c1").unwrap();
    session.lead("c1").unwrap();
    session.follow("c1").unwrap();
    session.stop_lead("c1").unwrap();

    for action in ["summon", "join", "lead", "follow", "stopLead"] {
        let frame = gateway.expect(&format!("call.core.char.bot1.ctrl.{action}")).await;
        assert_eq!(frame.params["charId"], "c1");
    }
}

#[tokio::test]
async fn parameterless_actions() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    session.stop_follow().unwrap();
    session.sleep().unwrap();
    session.wakeup().unwrap();
    session.ping().unwrap();

    for action in ["stopFollow", "release", "wakeup", "ping"] {
        let frame = gateway.expect(&format!("call.core.char.bot1.ctrl.{action}")).await;
        assert!(frame.params.is_empty());
    }
}

#[tokio::test]
async fn use_exit_sends_exit_id() {
    let (session, mut gateway) = booted_session(&test_config()).await;
    session.use_exit("e1").unwrap();
    let frame = gateway.expect("call.core.char.bot1.ctrl.useExit").await;
    assert_eq!(frame.params["exitId"], "e1");
}

#[tokio::test]
async fn actions_on_closed_client_are_returned_unsent() {
    let (session, _gateway) = booted_session(&test_config()).await;
    session.client().close();

    let request = session.say("anyone?").unwrap();
    assert!(!request.is_sent());
}

#[tokio::test]
async fn look_up_characters_filters_by_surname() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    let lookup = tokio::spawn({
        let session = session.clone();
        async move { session.look_up_characters("Omi lillabi").await }
    });
    let frame = gateway.expect("call.core.bot.b1.lookupChars").await;
    assert_eq!(frame.params["name"], "Omi");
    assert_eq!(frame.params["extended"], true);
    gateway.reply(
        &frame,
        json!({ "payload": { "chars": [
            { "id": "c1", "name": "Omi", "surname": "Lillabi" },
            { "id": "c2", "name": "Omi", "surname": "Other" },
        ] } }),
    );

    let found = lookup.await.unwrap().unwrap();
    let ids: Vec<&str> = found.iter().map(CharacterView::id).collect();
    assert_eq!(ids, ["c1"]);
}

#[tokio::test]
async fn look_up_characters_without_surname_returns_all() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    let lookup = tokio::spawn({
        let session = session.clone();
        async move { session.look_up_characters("Omi").await }
    });
    let frame = gateway.expect("call.core.bot.b1.lookupChars").await;
    gateway.reply(&frame, json!({ "payload": { "chars": [{ "id": "c1" }, { "id": "c2" }, { "name": "no id" }] } }));

    assert_eq!(lookup.await.unwrap().unwrap().len(), 2);
}

#[tokio::test]
async fn look_up_characters_surfaces_errors() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    let lookup = tokio::spawn({
        let session = session.clone();
        async move { session.look_up_characters("Nobody").await }
    });
    let frame = gateway.expect("call.core.bot.b1.lookupChars").await;
    gateway.reply_error(&frame, "system.accessDenied", "Access denied");

    let err = lookup.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Request(crate::request::RequestError::Protocol(_))));
}

#[tokio::test]
async fn current_room_reads_owned_character() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    let room = tokio::spawn({
        let session = session.clone();
        async move { session.current_room().await }
    });
    let frame = gateway.expect("subscribe.core.char.bot1.owned").await;
    gateway.reply(
        &frame,
        json!({ "models": {
            "core.char.bot1.owned": { "id": "bot1", "inRoom": { "rid": "core.room.r1" } },
            "core.room.r1": { "id": "r1", "name": "Tavern" },
        } }),
    );

    let room = room.await.unwrap().unwrap().expect("bot is in a room");
    assert_eq!(room.id(), "r1");
}

#[tokio::test]
async fn shutdown_releases_and_closes() {
    let (session, mut gateway) = booted_session(&test_config()).await;

    let shutdown = tokio::spawn({
        let session = session.clone();
        async move { session.shutdown().await }
    });
    let frame = gateway.expect("call.core.char.bot1.ctrl.release").await;
    gateway.reply(&frame, Value::Null);
    shutdown.await.unwrap();

    assert!(!session.client().is_running());
}
