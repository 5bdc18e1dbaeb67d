//! Audit entry and query types.

use chrono::{DateTime, Utc};

/// Security-sensitive vault operations recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Unlock,
    Lock,
    Read,
    Write,
    Delete,
    Rotate,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlock => "unlock",
            Self::Lock => "lock",
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Rotate => "rotate",
        }
    }
}

/// One immutable record of a sensitive operation (JSON lines format).
///
/// `hash` is SHA-256 over the entry's own fields plus `prev_hash`, the
/// hash of the previously appended entry. Storing `prev_hash` explicitly
/// lets verification distinguish a modified entry (content no longer
/// matches `hash`) from a deleted one (links skip an entry).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub target: String,
    pub actor: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub prev_hash: String,
    pub hash: String,
}

/// Read-side filter. All provided fields are combined with logical AND;
/// an empty `actions` list matches every action.
#[derive(Debug, Default, Clone)]
pub struct QueryOptions {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub target: Option<String>,
    pub actions: Vec<AuditAction>,
    pub success: Option<bool>,
}

impl QueryOptions {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.start_time.is_some_and(|t| entry.timestamp < t) {
            return false;
        }
        if self.end_time.is_some_and(|t| entry.timestamp > t) {
            return false;
        }
        if self.actor.as_ref().is_some_and(|a| *a != entry.actor) {
            return false;
        }
        if self.target.as_ref().is_some_and(|t| *t != entry.target) {
            return false;
        }
        if !self.actions.is_empty() && !self.actions.contains(&entry.action) {
            return false;
        }
        if self.success.is_some_and(|s| s != entry.success) {
            return false;
        }
        true
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(action: AuditAction, actor: &str, success: bool) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            action,
            target: "vault".into(),
            actor: actor.into(),
            success,
            error: (!success).then(|| "boom".into()),
            metadata: None,
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    #[test]
    fn action_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuditAction::Unlock).unwrap(),
            "\"unlock\""
        );
        let parsed: AuditAction = serde_json::from_str("\"rotate\"").unwrap();
        assert_eq!(parsed, AuditAction::Rotate);
    }

    #[test]
    fn entry_round_trips_through_json() {
        let entry = make_entry(AuditAction::Write, "alice", false);
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn empty_options_match_everything() {
        let options = QueryOptions::default();
        assert!(options.matches(&make_entry(AuditAction::Read, "alice", true)));
        assert!(options.matches(&make_entry(AuditAction::Lock, "bob", false)));
    }

    #[test]
    fn filters_compose_with_and() {
        let options = QueryOptions {
            actor: Some("alice".into()),
            success: Some(false),
            ..QueryOptions::default()
        };
        assert!(options.matches(&make_entry(AuditAction::Read, "alice", false)));
        assert!(!options.matches(&make_entry(AuditAction::Read, "alice", true)));
        assert!(!options.matches(&make_entry(AuditAction::Read, "bob", false)));
    }

    #[test]
    fn action_list_filters() {
        let options = QueryOptions {
            actions: vec![AuditAction::Unlock, AuditAction::Lock],
            ..QueryOptions::default()
        };
        assert!(options.matches(&make_entry(AuditAction::Unlock, "alice", true)));
        assert!(!options.matches(&make_entry(AuditAction::Read, "alice", true)));
    }

    #[test]
    fn time_range_filters() {
        let entry = make_entry(AuditAction::Read, "alice", true);

        let before = QueryOptions {
            end_time: Some(entry.timestamp - chrono::Duration::seconds(1)),
            ..QueryOptions::default()
        };
        assert!(!before.matches(&entry));

        let covering = QueryOptions {
            start_time: Some(entry.timestamp - chrono::Duration::seconds(1)),
            end_time: Some(entry.timestamp + chrono::Duration::seconds(1)),
            ..QueryOptions::default()
        };
        assert!(covering.matches(&entry));
    }
}
