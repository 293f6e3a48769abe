//! Inspection helpers for live-session replies.
//!
//! The bridge wraps payloads as `{"status": "success", "result": {...}}` while
//! older handlers answer flat objects, so field lookups try the top level
//! first and then the nested `result` object.

use serde_json::Value;

/// `status == "error"` or `success == false`, at either level.
pub fn is_error_reply(reply: &Value) -> bool {
    let flagged = |v: &Value| {
        v.get("status").and_then(Value::as_str) == Some("error")
            || v.get("success").and_then(Value::as_bool) == Some(false)
    };
    flagged(reply) || reply.get("result").is_some_and(flagged)
}

/// Field lookup across the top level and `result`.
pub fn reply_field<'a>(reply: &'a Value, key: &str) -> Option<&'a Value> {
    reply
        .get(key)
        .or_else(|| reply.get("result").and_then(|r| r.get(key)))
}

/// Non-empty string field across the top level and `result`.
pub fn reply_str<'a>(reply: &'a Value, key: &str) -> Option<&'a str> {
    reply_field(reply, key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Best human-readable error text carried by a reply.
pub fn error_message(reply: &Value) -> Option<String> {
    reply_str(reply, "error")
        .or_else(|| reply_str(reply, "message"))
        .map(str::to_string)
}

/// Shorten `text` to at most `max` chars, marking the cut with `...`.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_error_shapes() {
        assert!(is_error_reply(&json!({"status": "error", "error": "boom"})));
        assert!(is_error_reply(&json!({"success": false, "message": "no"})));
        assert!(is_error_reply(&json!({"status": "success", "result": {"success": false}})));
        assert!(!is_error_reply(&json!({"status": "success", "result": {"message": "pong"}})));
        assert!(!is_error_reply(&json!({"status": "ok"})));
    }

    #[test]
    fn fields_resolve_through_result() {
        let reply = json!({
            "status": "success",
            "result": {"engine_dir": "C:/UE_5.3/Engine/", "level_name": ""}
        });
        assert_eq!(reply_str(&reply, "engine_dir"), Some("C:/UE_5.3/Engine/"));
        assert_eq!(reply_str(&reply, "level_name"), None);

        let flat = json!({"project_file": "/p/Game.uproject"});
        assert_eq!(reply_str(&flat, "project_file"), Some("/p/Game.uproject"));
    }

    #[test]
    fn error_message_prefers_error_field() {
        let reply = json!({"status": "error", "error": "bad", "message": "other"});
        assert_eq!(error_message(&reply).as_deref(), Some("bad"));
        let reply = json!({"success": false, "message": "Failed to connect"});
        assert_eq!(error_message(&reply).as_deref(), Some("Failed to connect"));
    }

    #[test]
    fn preview_marks_truncation() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghij", 8), "abcde...");
    }
}
