use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

pub mod wire;

pub use wire::ProtocolError;

pub type TabId = i64;
pub type GroupId = i64;

/// Group id the agent uses for tabs that belong to no group.
pub const UNGROUPED: GroupId = -1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub title: String,
    #[serde(default, rename = "favIcon", skip_serializing_if = "Option::is_none")]
    pub fav_icon: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(
        default,
        rename = "groupId",
        deserialize_with = "deserialize_group_ref",
        serialize_with = "serialize_group_ref"
    )]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub title: String,
    #[serde(default)]
    pub color: GroupColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GroupColor {
    #[default]
    Grey,
    Blue,
    Red,
    Yellow,
    Green,
    Pink,
    Purple,
    Cyan,
    Orange,
}

impl GroupColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupColor::Grey => "grey",
            GroupColor::Blue => "blue",
            GroupColor::Red => "red",
            GroupColor::Yellow => "yellow",
            GroupColor::Green => "green",
            GroupColor::Pink => "pink",
            GroupColor::Purple => "purple",
            GroupColor::Cyan => "cyan",
            GroupColor::Orange => "orange",
        }
    }
}

impl fmt::Display for GroupColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupColor {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "grey" | "gray" => Ok(GroupColor::Grey),
            "blue" => Ok(GroupColor::Blue),
            "red" => Ok(GroupColor::Red),
            "yellow" => Ok(GroupColor::Yellow),
            "green" => Ok(GroupColor::Green),
            "pink" => Ok(GroupColor::Pink),
            "purple" => Ok(GroupColor::Purple),
            "cyan" => Ok(GroupColor::Cyan),
            "orange" => Ok(GroupColor::Orange),
            other => Err(format!("Unknown group color: {other}")),
        }
    }
}

impl Serialize for GroupColor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Unknown or missing colors fall back to grey instead of rejecting the snapshot.
impl<'de> Deserialize<'de> for GroupColor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value
            .and_then(|raw| raw.parse::<GroupColor>().ok())
            .unwrap_or_default())
    }
}

/// Full tab/group state pushed by the agent. There are no deltas: every push
/// replaces the previous snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Snapshot {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let mut tab_ids = HashSet::with_capacity(self.tabs.len());
        for tab in &self.tabs {
            if !tab_ids.insert(tab.id) {
                return Err(ProtocolError::DuplicateTabId(tab.id));
            }
        }
        let mut group_ids = HashSet::with_capacity(self.groups.len());
        for group in &self.groups {
            if !group_ids.insert(group.id) {
                return Err(ProtocolError::DuplicateGroupId(group.id));
            }
        }
        Ok(())
    }

    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.active)
    }

    /// The group a tab is rendered under. A reference to a group missing from
    /// this snapshot counts as ungrouped.
    pub fn effective_group(&self, tab: &Tab) -> Option<GroupId> {
        tab.group_id.filter(|id| self.group(*id).is_some())
    }

    /// First active tab inside `group`, if any.
    pub fn active_tab_in_group(&self, group: GroupId) -> Option<&Tab> {
        self.tabs
            .iter()
            .find(|tab| tab.active && self.effective_group(tab) == Some(group))
    }

    /// JSON with object keys sorted and groups ordered by id, so that two
    /// structurally equal snapshots always produce the same text.
    pub fn canonical_json(&self) -> String {
        let mut groups = self.groups.clone();
        groups.sort_by_key(|group| group.id);
        let normalized = Snapshot {
            tabs: self.tabs.clone(),
            groups,
        };
        let value = serde_json::to_value(&normalized).unwrap_or(Value::Null);
        let mut out = String::new();
        write_canonical(&value, &mut out);
        out
    }

    pub fn digest(&self) -> SnapshotDigest {
        let hash = Sha256::digest(self.canonical_json().as_bytes());
        SnapshotDigest(hash.into())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotDigest([u8; 32]);

impl SnapshotDigest {
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotDigest({})", self.short())
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn deserialize_lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

/// `-1` (or any negative id) and `null` both mean "no group".
fn deserialize_group_ref<'de, D>(deserializer: D) -> Result<Option<GroupId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.filter(|id| *id >= 0))
}

fn serialize_group_ref<S>(value: &Option<GroupId>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_i64(value.unwrap_or(UNGROUPED))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Snapshot {
        serde_json::from_str(raw).expect("parse snapshot")
    }

    #[test]
    fn lenient_fields_take_defaults() {
        let snapshot = parse(
            r#"{"tabs":[{"id":4,"active":true,"groupId":-1}],
                "groups":[{"id":9,"title":null,"color":"magenta"}]}"#,
        );
        let tab = &snapshot.tabs[0];
        assert_eq!(tab.title, "");
        assert_eq!(tab.fav_icon, None);
        assert_eq!(tab.group_id, None);
        assert!(!tab.pinned);
        assert_eq!(snapshot.groups[0].color, GroupColor::Grey);
        assert_eq!(snapshot.groups[0].title, "");
    }

    #[test]
    fn missing_group_reference_is_ungrouped() {
        let snapshot = parse(
            r#"{"tabs":[{"id":1,"title":"a","active":false,"groupId":5},
                        {"id":2,"title":"b","active":true,"groupId":7}],
                "groups":[{"id":7,"title":"work","color":"blue"}]}"#,
        );
        assert_eq!(snapshot.effective_group(&snapshot.tabs[0]), None);
        assert_eq!(snapshot.effective_group(&snapshot.tabs[1]), Some(7));
        assert_eq!(
            snapshot.active_tab_in_group(7).map(|tab| tab.id),
            Some(2)
        );
    }

    #[test]
    fn digest_ignores_key_order_and_group_order() {
        let first = parse(
            r#"{"tabs":[{"id":1,"title":"A","active":true,"groupId":3,"pinned":false}],
                "groups":[{"id":3,"title":"x","color":"red"},{"id":4,"title":"y","color":"cyan"}]}"#,
        );
        let second = parse(
            r#"{"groups":[{"color":"cyan","title":"y","id":4},{"title":"x","id":3,"color":"red"}],
                "tabs":[{"pinned":false,"groupId":3,"active":true,"title":"A","id":1}]}"#,
        );
        assert_eq!(first.canonical_json(), second.canonical_json());
        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn digest_changes_with_content_and_tab_order() {
        let base = parse(
            r#"{"tabs":[{"id":1,"title":"A","active":true},{"id":2,"title":"B","active":false}]}"#,
        );
        let toggled = parse(
            r#"{"tabs":[{"id":1,"title":"A","active":false},{"id":2,"title":"B","active":false}]}"#,
        );
        let reordered = parse(
            r#"{"tabs":[{"id":2,"title":"B","active":false},{"id":1,"title":"A","active":true}]}"#,
        );
        assert_ne!(base.digest(), toggled.digest());
        assert_ne!(base.digest(), reordered.digest());
    }

    #[test]
    fn canonical_form_writes_ungrouped_as_minus_one() {
        let snapshot = parse(r#"{"tabs":[{"id":1,"title":"A","active":true}]}"#);
        assert_eq!(
            snapshot.canonical_json(),
            r#"{"groups":[],"tabs":[{"active":true,"groupId":-1,"id":1,"pinned":false,"title":"A"}]}"#
        );
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let tabs = parse(r#"{"tabs":[{"id":1},{"id":1}]}"#);
        assert!(matches!(
            tabs.validate(),
            Err(ProtocolError::DuplicateTabId(1))
        ));
        let groups = parse(r#"{"tabs":[],"groups":[{"id":2},{"id":2}]}"#);
        assert!(matches!(
            groups.validate(),
            Err(ProtocolError::DuplicateGroupId(2))
        ));
    }

    #[test]
    fn group_color_parses_case_insensitively() {
        assert_eq!("Purple".parse::<GroupColor>(), Ok(GroupColor::Purple));
        assert_eq!("gray".parse::<GroupColor>(), Ok(GroupColor::Grey));
        assert!("teal".parse::<GroupColor>().is_err());
    }
}
