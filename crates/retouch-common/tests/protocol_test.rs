//! Wire format tests for browser <-> bridge messages.

use retouch_common::protocol::{ResponseEnvelope, ResponseStatus, SelectionMessage, Stage};
use serde_json::json;

#[test]
fn test_selection_message_deserializes_browser_payload() {
    let raw = json!({
        "id": 1718000000123u64,
        "area": {"x": 12, "y": 40.5, "width": 300, "height": 120, "elementCount": 1},
        "elements": [{
            "tagName": "button",
            "id": "",
            "classes": "buy primary",
            "selector": "button.buy",
            "innerText": "Buy",
            "outerHTML": "<button class=\"buy primary\">Buy</button>"
        }],
        "instruction": "make the button purple"
    });

    let msg: SelectionMessage = serde_json::from_value(raw).unwrap();
    assert_eq!(msg.id, 1718000000123);
    assert_eq!(msg.area.element_count, 1);
    assert_eq!(msg.area.y, 40.5);
    assert_eq!(msg.elements[0].outer_html, "<button class=\"buy primary\">Buy</button>");
    assert_eq!(msg.elements[0].classes, "buy primary");
    assert!(msg.screenshot.is_none());
    assert!(msg.screenshot_bytes().is_none());
}

#[test]
fn test_selection_message_tolerates_missing_optional_fields() {
    let msg: SelectionMessage =
        serde_json::from_str(r#"{"id": 3, "instruction": "x", "elements": [{"selector": "p"}]}"#)
            .unwrap();
    assert_eq!(msg.elements[0].inner_text, "");
    assert_eq!(msg.area.element_count, 0);
}

#[test]
fn test_screenshot_data_url_is_decoded() {
    let mut msg = SelectionMessage::new("x", Default::default(), vec![]);
    msg.screenshot = Some("data:image/png;base64,aGVsbG8=".into());
    assert_eq!(msg.screenshot_bytes().unwrap().unwrap(), b"hello");

    msg.screenshot = Some("aGVsbG8=".into());
    assert_eq!(msg.screenshot_bytes().unwrap().unwrap(), b"hello");

    msg.screenshot = Some("***".into());
    assert!(msg.screenshot_bytes().unwrap().is_err());
}

#[test]
fn test_envelope_wire_shapes() {
    let pending = serde_json::to_value(ResponseEnvelope::pending(7)).unwrap();
    assert_eq!(pending, json!({"id": 7, "status": "pending"}));

    let complete = serde_json::to_value(ResponseEnvelope::complete(7, "done")).unwrap();
    assert_eq!(complete, json!({"id": 7, "status": "complete", "message": "done"}));

    let error = ResponseEnvelope::error(7, Stage::Agent, "AGENT_BUSY", "busy");
    let value = serde_json::to_value(&error).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["stage"], "agent");
    assert_eq!(value["code"], "AGENT_BUSY");

    let back: ResponseEnvelope = serde_json::from_value(value).unwrap();
    assert_eq!(back.stage(), Some(Stage::Agent));
    assert_eq!(back.code(), Some("AGENT_BUSY"));
    assert_eq!(back.message(), Some("busy"));
}

#[test]
fn test_terminal_statuses() {
    assert!(!ResponseStatus::Pending.is_terminal());
    assert!(ResponseStatus::Complete.is_terminal());
    assert!(ResponseStatus::Error.is_terminal());
}

#[test]
fn test_unknown_status_is_rejected() {
    let parsed = serde_json::from_str::<ResponseEnvelope>(r#"{"id": 1, "status": "done"}"#);
    assert!(parsed.is_err());
}
