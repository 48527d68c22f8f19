use crate::catalog::depend::ObjectAddress;
use crate::catalog::types::Oid;
use serde::{Deserialize, Serialize};

/// Notification fired once per executed subcommand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterEvent {
    pub relation: Oid,
    pub relation_name: String,
    pub command_tag: String,
    pub pass: String,
    /// Object the subcommand created or changed.
    pub address: Option<ObjectAddress>,
    /// MessagePack encoding of the executed subcommand.
    pub payload: Vec<u8>,
}

impl AlterEvent {
    /// JSON rendering for audit consumers; the payload is omitted.
    pub fn detail_json(&self) -> String {
        serde_json::json!({
            "relation": self.relation,
            "relation_name": self.relation_name,
            "command_tag": self.command_tag,
            "pass": self.pass,
            "address": self.address,
        })
        .to_string()
    }
}

pub trait EventHook: Send + Sync {
    fn on_event(&self, event: &AlterEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_renders_without_payload() {
        let event = AlterEvent {
            relation: 16384,
            relation_name: "t".into(),
            command_tag: "ADD COLUMN".into(),
            pass: "AddColumn".into(),
            address: Some(ObjectAddress::column(16384, 2)),
            payload: vec![1, 2, 3],
        };
        let json: serde_json::Value = serde_json::from_str(&event.detail_json()).expect("json");
        assert_eq!(json["command_tag"], "ADD COLUMN");
        assert_eq!(json["address"]["sub_id"], 2);
        assert!(json.get("payload").is_none());
    }
}
