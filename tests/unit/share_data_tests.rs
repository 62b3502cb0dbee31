use agent_tether::share::data::{Data, FileDiff, MessageInfo, PartInfo, Role, SessionInfo};
use serde_json::{json, Map};

fn session(id: &str) -> SessionInfo {
    SessionInfo {
        id: id.into(),
        title: "demo".into(),
        extra: Map::new(),
    }
}

#[test]
fn wire_shape_is_type_and_data() {
    let value = serde_json::to_value(Data::Session(session("ses_1"))).expect("serialize");
    assert_eq!(
        value,
        json!({ "type": "session", "data": { "id": "ses_1", "title": "demo" } })
    );

    let diff = Data::SessionDiff(vec![FileDiff {
        file: "a.rs".into(),
        before: String::new(),
        after: "fn main() {}".into(),
        additions: 1,
        deletions: 0,
    }]);
    let value = serde_json::to_value(diff).expect("serialize");
    assert_eq!(value["type"], "session_diff");
    assert_eq!(value["data"][0]["file"], "a.rs");
}

#[test]
fn unknown_fields_pass_through() {
    let raw = json!({
        "type": "message",
        "data": {
            "id": "msg_1",
            "sessionID": "ses_1",
            "role": "user",
            "model": { "providerID": "anthropic", "modelID": "claude" },
            "time": { "created": 1 }
        }
    });

    let data: Data = serde_json::from_value(raw.clone()).expect("deserialize");
    let Data::Message(message) = &data else {
        panic!("expected message, got {data:?}");
    };
    assert_eq!(message.role, Role::User);
    assert_eq!(message.model.as_ref().map(|m| m.model_id.as_str()), Some("claude"));
    assert_eq!(message.extra["time"], json!({ "created": 1 }));

    assert_eq!(serde_json::to_value(&data).expect("serialize"), raw);
}

#[test]
fn keys_are_stable_and_kind_scoped() {
    let part = Data::Part(PartInfo {
        id: "x".into(),
        session_id: "ses_1".into(),
        message_id: "msg_1".into(),
        extra: Map::new(),
    });
    let message = Data::Message(MessageInfo {
        id: "x".into(),
        session_id: "ses_1".into(),
        role: Role::Assistant,
        model: None,
        extra: Map::new(),
    });

    assert_eq!(part.key().as_deref(), Some("part:x"));
    assert_eq!(message.key().as_deref(), Some("message:x"));
    assert_ne!(part.key(), message.key());
    assert_eq!(Data::Session(session("ses_1")).key().as_deref(), Some("session:ses_1"));
}

#[test]
fn id_less_kinds_have_no_key() {
    assert!(Data::SessionDiff(Vec::new()).key().is_none());
    assert!(Data::Model(Vec::new()).key().is_none());
    assert_eq!(Data::Model(Vec::new()).kind(), "model");
}
