// CLASSIFICATION: COMMUNITY
// Filename: expect.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Literal expectations declared by a script and how they are checked.

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;

use crate::attr::{
    AclPerms, AclTag, Attribute, AttributeKind, FileType, IdentityKind, Permissions, Snapshot,
    TimestampKind,
};
use crate::parcel::{Compression, Disposition, Parcel};

/// Values substituted into string expectations at check time.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    /// Declared name of the loaded plugin, for `$plugin`.
    pub plugin: String,
    /// Workspace root, for `$root`.
    pub root: String,
}

impl Vars {
    pub fn expand(&self, text: &str) -> String {
        text.replace("$plugin", &self.plugin).replace("$root", &self.root)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceExpectation {
    pub major: Option<u64>,
    pub minor: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupExpectation {
    pub id: Option<u64>,
    pub disposition: Option<Disposition>,
}

fn one() -> usize {
    1
}

/// Shape a captured parcel must have. Absent fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParcelExpectation {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub compression: Option<Compression>,
    pub sequence: Option<SequenceExpectation>,
    pub group: Option<GroupExpectation>,
    pub payload_contains: Option<String>,
    /// Minimum number of matching parcels.
    #[serde(default = "one")]
    pub count: usize,
}

impl ParcelExpectation {
    pub fn matches(&self, parcel: &Parcel, vars: &Vars) -> bool {
        let text = |expected: &Option<String>, actual: &str| {
            expected.as_ref().map_or(true, |e| vars.expand(e) == actual)
        };
        if !text(&self.sender, parcel.sender())
            || !text(&self.recipient, parcel.recipient())
            || !text(&self.kind, parcel.kind())
        {
            return false;
        }
        if self.compression.is_some_and(|c| c != parcel.compression()) {
            return false;
        }
        if let Some(seq) = self.sequence {
            let actual = parcel.sequence();
            if seq.major.is_some_and(|m| m != actual.major) || seq.minor.is_some_and(|m| m != actual.minor) {
                return false;
            }
        }
        if let Some(group) = self.group {
            let Some(actual) = parcel.group() else {
                return false;
            };
            if group.id.is_some_and(|id| id != actual.id)
                || group.disposition.is_some_and(|d| d != actual.disposition)
            {
                return false;
            }
        }
        if let Some(needle) = &self.payload_contains {
            let needle = vars.expand(needle);
            match parcel.payload_text() {
                Some(text) if text.contains(&needle) => {}
                _ => return false,
            }
        }
        true
    }

    /// Human readable form with variables expanded.
    pub fn describe(&self, vars: &Vars) -> String {
        let mut parts = Vec::new();
        let mut push = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                parts.push(format!("{key}={}", vars.expand(v)));
            }
        };
        push("sender", &self.sender);
        push("recipient", &self.recipient);
        push("type", &self.kind);
        if let Some(c) = self.compression {
            parts.push(format!("compression={c:?}"));
        }
        if let Some(seq) = self.sequence {
            let field = |v: Option<u64>| v.map_or("*".to_string(), |v| v.to_string());
            parts.push(format!("seq={}.{}", field(seq.major), field(seq.minor)));
        }
        if let Some(group) = self.group {
            let id = group.id.map_or("*".to_string(), |v| v.to_string());
            let disp = group
                .disposition
                .map_or("*".to_string(), |d| format!("{d:?}").to_lowercase());
            parts.push(format!("group={id}:{disp}"));
        }
        if let Some(needle) = &self.payload_contains {
            parts.push(format!("payload~{:?}", vars.expand(needle)));
        }
        format!("{} parcel(s) with {}", self.count, parts.join(" "))
    }
}

/// Expected ACL entry. Qualifier fields are only compared when given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntryCheck {
    pub tag: AclTag,
    pub id: Option<u32>,
    pub name: Option<String>,
    pub perms: AclPerms,
}

impl fmt::Display for AclEntryCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let qualifier = match (&self.name, self.id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => id.to_string(),
            (None, None) => String::new(),
        };
        write!(f, "{:?}:{}:{}", self.tag, qualifier, self.perms.to_symbolic())
    }
}

/// One expected attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrCheck {
    FileType(FileType),
    Permissions(Permissions),
    Identity {
        kind: IdentityKind,
        id: Option<u32>,
        name: Option<String>,
    },
    Timestamp {
        kind: TimestampKind,
        millis: i64,
    },
    Acl(Vec<AclEntryCheck>),
}

impl AttrCheck {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttrCheck::FileType(_) => AttributeKind::FileType,
            AttrCheck::Permissions(_) => AttributeKind::Permissions,
            AttrCheck::Identity { kind, .. } => AttributeKind::Identity(*kind),
            AttrCheck::Timestamp { kind, .. } => AttributeKind::Timestamp(*kind),
            AttrCheck::Acl(_) => AttributeKind::Acl,
        }
    }

    pub fn check(&self, actual: &Attribute) -> bool {
        match (self, actual) {
            (AttrCheck::FileType(e), Attribute::FileType(a)) => e == a,
            (AttrCheck::Permissions(e), Attribute::Permissions(a)) => e == a,
            (AttrCheck::Identity { id, name, .. }, Attribute::Identity(a)) => {
                id.map_or(true, |id| id == a.id) && name.as_ref().map_or(true, |n| *n == a.name)
            }
            (AttrCheck::Timestamp { millis, .. }, Attribute::Timestamp(a)) => *millis == a.millis,
            (AttrCheck::Acl(expected), Attribute::Acl(actual)) => {
                expected.len() == actual.len()
                    && expected.iter().zip(actual).all(|(e, a)| {
                        let qualifier_ok = match &a.qualifier {
                            Some(q) => {
                                e.id.map_or(true, |id| id == q.id)
                                    && e.name.as_ref().map_or(true, |n| *n == q.name)
                            }
                            None => e.id.is_none() && e.name.is_none(),
                        };
                        e.tag == a.tag && e.perms == a.perms && qualifier_ok
                    })
            }
            _ => false,
        }
    }
}

impl fmt::Display for AttrCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrCheck::FileType(ft) => write!(f, "{ft}"),
            AttrCheck::Permissions(p) => write!(f, "{p}"),
            AttrCheck::Identity { id, name, .. } => write!(
                f,
                "{}({})",
                name.as_deref().unwrap_or("*"),
                id.map_or("*".to_string(), |i| i.to_string())
            ),
            AttrCheck::Timestamp { millis, .. } => write!(f, "{millis}ms"),
            AttrCheck::Acl(entries) => {
                let parts: Vec<String> = entries.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// The first attribute that did not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrMismatch {
    pub kind: AttributeKind,
    pub expected: String,
    pub actual: String,
}

/// All attribute expectations of one `file-state` step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeExpectations {
    checks: Vec<AttrCheck>,
}

impl AttributeExpectations {
    pub fn new(mut checks: Vec<AttrCheck>) -> Self {
        checks.sort_by_key(|c| c.kind());
        Self { checks }
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Kinds to capture; nothing else is requested.
    pub fn kinds(&self) -> BTreeSet<AttributeKind> {
        self.checks.iter().map(AttrCheck::kind).collect()
    }

    pub fn checks(&self) -> &[AttrCheck] {
        &self.checks
    }

    pub fn verify(&self, snapshot: &Snapshot) -> Result<(), AttrMismatch> {
        for check in &self.checks {
            let actual = snapshot.get(check.kind());
            if !actual.is_some_and(|a| check.check(a)) {
                return Err(AttrMismatch {
                    kind: check.kind(),
                    expected: check.to_string(),
                    actual: actual.map_or("<not captured>".to_string(), ToString::to_string),
                });
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .checks
            .iter()
            .map(|c| format!("{}={c}", c.kind()))
            .collect();
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{AclEntry, Identity};
    use crate::parcel::Sequence;
    use std::path::Path;

    fn vars() -> Vars {
        Vars {
            plugin: "fim".into(),
            root: "/tmp/ws".into(),
        }
    }

    fn expectation(yaml: &str) -> ParcelExpectation {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn sender_placeholder_and_payload() {
        let exp = expectation("sender: $plugin\ntype: file-state\npayload_contains: $root/a.txt\n");
        let hit = Parcel::new("fim", "host", "file-state", Sequence::new(1, 0)).with_payload(
            Compression::None,
            br#"{"path":"/tmp/ws/a.txt"}"#.to_vec(),
        );
        let wrong_sender = Parcel::new("other", "host", "file-state", Sequence::new(1, 0));
        assert!(exp.matches(&hit, &vars()));
        assert!(!exp.matches(&wrong_sender, &vars()));
        assert_eq!(exp.count, 1);
        assert!(exp.describe(&vars()).contains("sender=fim"));
    }

    #[test]
    fn group_expectation_requires_group() {
        let exp = expectation("group:\n  disposition: last\n");
        let ungrouped = Parcel::new("fim", "host", "x", Sequence::default());
        let last = ungrouped.clone().with_group(5, Disposition::Last);
        let part = ungrouped.clone().with_group(5, Disposition::Part);
        assert!(!exp.matches(&ungrouped, &vars()));
        assert!(exp.matches(&last, &vars()));
        assert!(!exp.matches(&part, &vars()));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(serde_yaml::from_str::<ParcelExpectation>("colour: red\n").is_err());
    }

    #[test]
    fn attribute_verify_reports_first_mismatch() {
        let snap = Snapshot::new(
            Path::new("/x"),
            vec![
                Attribute::FileType(FileType::Regular),
                Attribute::Permissions(Permissions::from_mode(0o600)),
                Attribute::Identity(Identity {
                    kind: IdentityKind::User,
                    id: 0,
                    name: "root".into(),
                }),
            ],
        );
        let ok = AttributeExpectations::new(vec![
            AttrCheck::FileType(FileType::Regular),
            AttrCheck::Identity {
                kind: IdentityKind::User,
                id: None,
                name: Some("root".into()),
            },
        ]);
        assert!(ok.verify(&snap).is_ok());

        let bad = AttributeExpectations::new(vec![
            AttrCheck::Permissions(Permissions::from_mode(0o644)),
            AttrCheck::FileType(FileType::Regular),
        ]);
        let mismatch = bad.verify(&snap).unwrap_err();
        assert_eq!(mismatch.kind, AttributeKind::Permissions);
        assert_eq!(mismatch.expected, "rw-r--r--");
        assert_eq!(mismatch.actual, "rw-------");
    }

    #[test]
    fn acl_compares_in_order() {
        let actual = Attribute::Acl(vec![
            AclEntry::new(AclTag::UserObj, AclPerms::READ | AclPerms::WRITE),
            AclEntry::named(AclTag::User, 1000, "alice", AclPerms::READ),
            AclEntry::new(AclTag::Other, AclPerms::empty()),
        ]);
        let check = |entries: Vec<AclEntryCheck>| AttrCheck::Acl(entries).check(&actual);
        let user_obj = AclEntryCheck {
            tag: AclTag::UserObj,
            id: None,
            name: None,
            perms: AclPerms::READ | AclPerms::WRITE,
        };
        let alice = AclEntryCheck {
            tag: AclTag::User,
            id: None,
            name: Some("alice".into()),
            perms: AclPerms::READ,
        };
        let other = AclEntryCheck {
            tag: AclTag::Other,
            id: None,
            name: None,
            perms: AclPerms::empty(),
        };
        assert!(check(vec![user_obj.clone(), alice.clone(), other.clone()]));
        assert!(!check(vec![alice, user_obj.clone(), other]));
        assert!(!check(vec![user_obj]));
    }
}
