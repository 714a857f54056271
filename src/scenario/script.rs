// CLASSIFICATION: COMMUNITY
// Filename: script.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Declarative scenario scripts.
//!
//! A script is a YAML mapping with a required `kind`. Harness-level keys
//! (`kind`, `name`, `description`, `timeout_ms`, `plugin`) are removed first and
//! the remaining body is parsed by the implementation registered for that kind.
//! Only `file` exists today.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use super::expect::{AclEntryCheck, AttrCheck, AttributeExpectations, ParcelExpectation};
use super::fixture::{is_contained, Fixture, FixtureAction};
use super::Phase;
use crate::attr::{
    AclPerms, AclTag, AttributeKind, FileType, IdentityKind, Permissions, TimestampKind,
};

pub const DEFAULT_CAPABILITY: &str = "file-monitor";

const HARNESS_KEYS: [&str; 5] = ["kind", "name", "description", "timeout_ms", "plugin"];

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot read script {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("script has no `kind`")]
    MissingKind,
    #[error("unsupported plugin kind `{0}`")]
    UnsupportedPluginKind(String),
    #[error("step `{step}`: {reason}")]
    Malformed { step: String, reason: String },
    #[error("invalid script: {0}")]
    Invalid(String),
}

fn malformed(step: &str, reason: impl ToString) -> ScriptError {
    ScriptError::Malformed {
        step: step.to_string(),
        reason: reason.to_string(),
    }
}

/// Test implementations a script may select with `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    File,
}

impl PluginKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "file" => Some(PluginKind::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorRequest {
    pub path: PathBuf,
    pub capability: String,
    pub attributes: Vec<AttributeKind>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParcelWait {
    pub expect: ParcelExpectation,
    /// Overrides the script and harness wait timeout for this step.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Fixture(Fixture),
    MonitorRequest(MonitorRequest),
    ExpectParcel(ParcelWait),
    Exists { path: PathBuf, exists: bool },
    FileState {
        path: PathBuf,
        expect: AttributeExpectations,
    },
}

impl Directive {
    pub fn phase(&self) -> Phase {
        match self {
            Directive::Fixture(_) | Directive::MonitorRequest(_) => Phase::Before,
            _ => Phase::After,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Directive::Fixture(_) => "before",
            Directive::MonitorRequest(_) => "monitor-request",
            Directive::ExpectParcel(_) => "after",
            Directive::Exists { .. } => "exists",
            Directive::FileState { .. } => "file-state",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    /// Position in the document, from zero.
    pub index: usize,
    pub directive: Directive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    pub description: Option<String>,
    pub kind: PluginKind,
    pub timeout: Option<Duration>,
    pub plugin: Option<PathBuf>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_file(path: &Path) -> Result<Self, ScriptError> {
        let text = fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut script = Self::parse(&text)?;
        if script.name.is_empty() {
            script.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        // relative plugin paths are relative to the script
        if let (Some(plugin), Some(dir)) = (script.plugin.as_mut(), path.parent()) {
            if plugin.is_relative() {
                *plugin = dir.join(&*plugin);
            }
        }
        Ok(script)
    }

    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut doc: Mapping = match serde_yaml::from_str(text)? {
            Value::Mapping(m) => m,
            _ => return Err(ScriptError::Invalid("top level must be a mapping".into())),
        };
        let kind = match doc.get("kind") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(ScriptError::Invalid("`kind` must be a string".into())),
            None => return Err(ScriptError::MissingKind),
        };
        let plugin_kind = PluginKind::from_name(&kind)
            .ok_or_else(|| ScriptError::UnsupportedPluginKind(kind.clone()))?;

        let name = take_string(&mut doc, "name")?.unwrap_or_default();
        let description = take_string(&mut doc, "description")?;
        let plugin = take_string(&mut doc, "plugin")?.map(PathBuf::from);
        let timeout = match doc.get("timeout_ms") {
            Some(v) => Some(Duration::from_millis(v.as_u64().ok_or_else(|| {
                ScriptError::Invalid("`timeout_ms` must be a non-negative integer".into())
            })?)),
            None => None,
        };
        for key in HARNESS_KEYS {
            doc.remove(key);
        }

        let steps = match plugin_kind {
            PluginKind::File => parse_file_body(doc)?,
        };
        debug!("parsed script `{name}` ({kind}) with {} steps", steps.len());
        Ok(Self {
            name,
            description,
            kind: plugin_kind,
            timeout,
            plugin,
            steps,
        })
    }

    /// Steps of one phase in document order.
    pub fn steps_in(&self, phase: Phase) -> impl Iterator<Item = &Step> {
        self.steps
            .iter()
            .filter(move |s| s.directive.phase() == phase)
    }
}

fn take_string(doc: &mut Mapping, key: &str) -> Result<Option<String>, ScriptError> {
    match doc.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ScriptError::Invalid(format!("`{key}` must be a string"))),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileBody {
    #[serde(default = "default_capability")]
    capability: String,
    #[serde(default)]
    steps: Vec<Value>,
}

fn default_capability() -> String {
    DEFAULT_CAPABILITY.to_string()
}

fn parse_file_body(doc: Mapping) -> Result<Vec<Step>, ScriptError> {
    let body: FileBody = serde_yaml::from_value(Value::Mapping(doc))
        .map_err(|e| ScriptError::Invalid(e.to_string()))?;
    if body.steps.is_empty() {
        return Err(ScriptError::Invalid("no steps".into()));
    }
    body.steps
        .into_iter()
        .enumerate()
        .map(|(index, raw)| parse_step(index, raw, &body.capability))
        .collect()
}

fn parse_step(index: usize, raw: Value, capability: &str) -> Result<Step, ScriptError> {
    let fallback = format!("#{}", index + 1);
    let Value::Mapping(mut map) = raw else {
        return Err(malformed(&fallback, "step must be a mapping"));
    };
    let name = match map.remove("name") {
        Some(Value::String(s)) => s,
        None => fallback,
        Some(_) => return Err(malformed(&fallback, "`name` must be a string")),
    };
    let kind = match map.remove("kind") {
        Some(Value::String(s)) => s,
        _ => return Err(malformed(&name, "missing `kind`")),
    };
    let directive = match kind.as_str() {
        "before" => Directive::Fixture(body::<BeforeStep>(&name, map)?.into_fixture(&name)?),
        "monitor-request" => {
            Directive::MonitorRequest(body::<MonitorStep>(&name, map)?.into_request(&name, capability)?)
        }
        "after" => {
            let step = body::<AfterStep>(&name, map)?;
            Directive::ExpectParcel(ParcelWait {
                expect: step.expect,
                timeout: step.timeout_ms.map(Duration::from_millis),
            })
        }
        "exists" => {
            let step = body::<ExistsStep>(&name, map)?;
            Directive::Exists {
                path: contained(&name, step.path)?,
                exists: step.exists,
            }
        }
        "file-state" => {
            let step = body::<FileStateStep>(&name, map)?;
            Directive::FileState {
                path: contained(&name, step.path)?,
                expect: step.expect.into_checks(&name)?,
            }
        }
        other => return Err(malformed(&name, format!("unknown step kind `{other}`"))),
    };
    Ok(Step {
        name,
        index,
        directive,
    })
}

fn body<T: DeserializeOwned>(step: &str, map: Mapping) -> Result<T, ScriptError> {
    serde_yaml::from_value(Value::Mapping(map)).map_err(|e| malformed(step, e))
}

fn contained(step: &str, path: PathBuf) -> Result<PathBuf, ScriptError> {
    if is_contained(&path) {
        Ok(path)
    } else {
        Err(malformed(
            step,
            format!("path {} escapes the working directory", path.display()),
        ))
    }
}

/// Mode written as `rw-r--r--` or an octal string such as `"0644"`.
///
/// YAML keeps `0644` a string, but `0o644` and `644` arrive as the integers
/// 420 and 644, so the written digits are lost. Numbers are refused.
#[derive(Deserialize)]
#[serde(untagged)]
enum ModeLiteral {
    Number(i64),
    Text(String),
}

impl ModeLiteral {
    fn parse(self, step: &str) -> Result<Permissions, ScriptError> {
        match self {
            ModeLiteral::Number(n) => Err(malformed(
                step,
                format!("mode {n} must be quoted, e.g. \"0644\", or symbolic"),
            )),
            ModeLiteral::Text(s) => s.parse().map_err(|e| malformed(step, e)),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
enum FixtureVerb {
    Create,
    Mkdir,
    Symlink,
    Chmod,
    Write,
    Append,
    Remove,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BeforeStep {
    path: PathBuf,
    action: FixtureVerb,
    content: Option<String>,
    mode: Option<ModeLiteral>,
    target: Option<PathBuf>,
}

impl BeforeStep {
    fn into_fixture(self, step: &str) -> Result<Fixture, ScriptError> {
        let path = contained(step, self.path)?;
        let mode = self.mode.map(|m| m.parse(step)).transpose()?;
        let content = || {
            self.content
                .clone()
                .ok_or_else(|| malformed(step, "`content` is required"))
        };
        let action = match self.action {
            FixtureVerb::Create => FixtureAction::Create {
                content: self.content.clone().unwrap_or_default(),
                mode,
            },
            FixtureVerb::Mkdir => FixtureAction::Mkdir { mode },
            FixtureVerb::Symlink => {
                let target = self
                    .target
                    .clone()
                    .ok_or_else(|| malformed(step, "`target` is required"))?;
                FixtureAction::Symlink {
                    target: contained(step, target)?,
                }
            }
            FixtureVerb::Chmod => FixtureAction::Chmod {
                mode: mode.ok_or_else(|| malformed(step, "`mode` is required"))?,
            },
            FixtureVerb::Write => FixtureAction::Write { content: content()? },
            FixtureVerb::Append => FixtureAction::Append { content: content()? },
            FixtureVerb::Remove => FixtureAction::Remove,
        };
        Ok(Fixture { path, action })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MonitorStep {
    path: PathBuf,
    capability: Option<String>,
    #[serde(default)]
    attributes: Vec<AttributeKind>,
    #[serde(default)]
    config: serde_json::Map<String, serde_json::Value>,
}

impl MonitorStep {
    fn into_request(self, step: &str, capability: &str) -> Result<MonitorRequest, ScriptError> {
        Ok(MonitorRequest {
            path: contained(step, self.path)?,
            capability: self.capability.unwrap_or_else(|| capability.to_string()),
            attributes: if self.attributes.is_empty() {
                AttributeKind::ALL.to_vec()
            } else {
                self.attributes
            },
            config: self.config,
        })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AfterStep {
    expect: ParcelExpectation,
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExistsStep {
    path: PathBuf,
    exists: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileStateStep {
    path: PathBuf,
    expect: StateExpect,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PermissionLiteral {
    Flags(Vec<String>),
    Mode(ModeLiteral),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityLiteral {
    Id(u32),
    Name(String),
    Both { id: Option<u32>, name: Option<String> },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct StateExpect {
    file_type: Option<FileType>,
    permissions: Option<PermissionLiteral>,
    owner: Option<IdentityLiteral>,
    group: Option<IdentityLiteral>,
    atime: Option<i64>,
    mtime: Option<i64>,
    ctime: Option<i64>,
    acl: Option<Vec<String>>,
}

impl StateExpect {
    fn into_checks(self, step: &str) -> Result<AttributeExpectations, ScriptError> {
        let mut checks = Vec::new();
        if let Some(ft) = self.file_type {
            checks.push(AttrCheck::FileType(ft));
        }
        if let Some(perms) = self.permissions {
            let perms = match perms {
                PermissionLiteral::Mode(m) => m.parse(step)?,
                PermissionLiteral::Flags(names) => names.iter().try_fold(
                    Permissions::empty(),
                    |acc, n| {
                        Permissions::from_flag_name(n)
                            .map(|p| acc | p)
                            .map_err(|e| malformed(step, e))
                    },
                )?,
            };
            checks.push(AttrCheck::Permissions(perms));
        }
        for (kind, literal) in [
            (IdentityKind::User, self.owner),
            (IdentityKind::Group, self.group),
        ] {
            let Some(literal) = literal else { continue };
            let (id, name) = match literal {
                IdentityLiteral::Id(id) => (Some(id), None),
                IdentityLiteral::Name(name) => (None, Some(name)),
                IdentityLiteral::Both { id, name } => (id, name),
            };
            checks.push(AttrCheck::Identity { kind, id, name });
        }
        for (kind, millis) in [
            (TimestampKind::Access, self.atime),
            (TimestampKind::Modify, self.mtime),
            (TimestampKind::MetadataChange, self.ctime),
        ] {
            if let Some(millis) = millis {
                checks.push(AttrCheck::Timestamp { kind, millis });
            }
        }
        if let Some(entries) = self.acl {
            let entries = entries
                .iter()
                .map(|e| parse_acl_entry(e).ok_or_else(|| malformed(step, format!("bad ACL entry `{e}`"))))
                .collect::<Result<Vec<_>, _>>()?;
            checks.push(AttrCheck::Acl(entries));
        }
        if checks.is_empty() {
            return Err(malformed(step, "`expect` names no attributes"));
        }
        Ok(AttributeExpectations::new(checks))
    }
}

/// getfacl notation: `user::rw-`, `user:alice:r--`, `group:100:r-x`, `mask::r--`.
fn parse_acl_entry(text: &str) -> Option<AclEntryCheck> {
    let mut parts = text.trim().splitn(3, ':');
    let tag = parts.next()?;
    let qualifier = parts.next()?;
    let perms = AclPerms::from_symbolic(parts.next()?)?;
    let tag = match (tag, qualifier.is_empty()) {
        ("user", true) => AclTag::UserObj,
        ("user", false) => AclTag::User,
        ("group", true) => AclTag::GroupObj,
        ("group", false) => AclTag::Group,
        ("mask", true) => AclTag::Mask,
        ("other", true) => AclTag::Other,
        _ => return None,
    };
    let (id, name) = match qualifier.parse::<u32>() {
        _ if qualifier.is_empty() => (None, None),
        Ok(id) => (Some(id), None),
        Err(_) => (None, Some(qualifier.to_string())),
    };
    Some(AclEntryCheck {
        tag,
        id,
        name,
        perms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
kind: file
name: basic
timeout_ms: 1500
steps:
  - name: seed
    kind: before
    path: a.txt
    action: create
    content: hello
    mode: rw-r--r--
  - name: watch
    kind: monitor-request
    path: a.txt
    attributes: [permissions, owner]
    config:
      interval_ms: 20
  - name: perms
    kind: file-state
    path: a.txt
    expect:
      permissions: [owner-read, owner-write, group-read, other-read]
      owner: root
  - name: reported
    kind: after
    expect:
      sender: $plugin
      type: file-state
  - name: ghost
    kind: exists
    path: nothing-here
    exists: false
"#;

    #[test]
    fn parses_file_script() {
        let script = Script::parse(BASIC).unwrap();
        assert_eq!(script.name, "basic");
        assert_eq!(script.kind, PluginKind::File);
        assert_eq!(script.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(script.steps.len(), 5);

        let before: Vec<&str> = script.steps_in(Phase::Before).map(|s| s.name.as_str()).collect();
        let after: Vec<&str> = script.steps_in(Phase::After).map(|s| s.name.as_str()).collect();
        assert_eq!(before, vec!["seed", "watch"]);
        assert_eq!(after, vec!["perms", "reported", "ghost"]);

        match &script.steps[1].directive {
            Directive::MonitorRequest(req) => {
                assert_eq!(req.capability, DEFAULT_CAPABILITY);
                assert_eq!(req.attributes.len(), 2);
                assert!(req.config.contains_key("interval_ms"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &script.steps[2].directive {
            Directive::FileState { expect, .. } => {
                assert_eq!(
                    expect.checks()[0],
                    AttrCheck::Permissions(Permissions::from_mode(0o644))
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let err = Script::parse("kind: registry\nsteps: []\n").unwrap_err();
        assert!(matches!(err, ScriptError::UnsupportedPluginKind(k) if k == "registry"));
        assert!(matches!(
            Script::parse("name: x\n").unwrap_err(),
            ScriptError::MissingKind
        ));
    }

    #[test]
    fn quoted_mode_is_octal() {
        let text = "kind: file\nsteps:\n  - kind: before\n    path: d\n    action: mkdir\n    mode: \"0750\"\n";
        let script = Script::parse(text).unwrap();
        assert_eq!(
            script.steps[0].directive,
            Directive::Fixture(Fixture {
                path: PathBuf::from("d"),
                action: FixtureAction::Mkdir {
                    mode: Some(Permissions::from_mode(0o750))
                },
            })
        );
        assert_eq!(script.steps[0].name, "#1");
    }

    #[test]
    fn bare_numeric_mode_is_malformed() {
        for literal in ["0o644", "644"] {
            let text = format!(
                "kind: file\nsteps:\n  - name: seed\n    kind: before\n    path: a\n    action: create\n    mode: {literal}\n"
            );
            match Script::parse(&text).unwrap_err() {
                ScriptError::Malformed { step, reason } => {
                    assert_eq!(step, "seed");
                    assert!(reason.contains("quoted"), "{literal}: {reason}");
                }
                other => panic!("{literal}: unexpected {other}"),
            }
        }
        let leading_zero = "kind: file\nsteps:\n  - kind: before\n    path: a\n    action: chmod\n    mode: 0644\n";
        assert!(matches!(
            &Script::parse(leading_zero).unwrap().steps[0].directive,
            Directive::Fixture(Fixture { action: FixtureAction::Chmod { mode }, .. })
                if *mode == Permissions::from_mode(0o644)
        ));
        let expect = "kind: file\nsteps:\n  - name: perms\n    kind: file-state\n    path: a\n    expect:\n      permissions: 0o644\n";
        assert!(matches!(
            Script::parse(expect).unwrap_err(),
            ScriptError::Malformed { step, .. } if step == "perms"
        ));
    }

    #[test]
    fn escaping_symlink_target_is_malformed() {
        for target in ["/etc", "../up"] {
            let text = format!(
                "kind: file\nsteps:\n  - name: link\n    kind: before\n    path: l\n    action: symlink\n    target: {target}\n"
            );
            assert!(
                matches!(Script::parse(&text).unwrap_err(), ScriptError::Malformed { ref step, .. } if step == "link"),
                "{target}"
            );
        }
    }

    #[test]
    fn escaping_path_names_the_step() {
        let text = "kind: file\nsteps:\n  - name: sneaky\n    kind: exists\n    path: ../etc\n    exists: true\n";
        match Script::parse(text).unwrap_err() {
            ScriptError::Malformed { step, .. } => assert_eq!(step, "sneaky"),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn unknown_step_field_is_malformed() {
        let text = "kind: file\nsteps:\n  - name: typo\n    kind: exists\n    path: a\n    exist: true\n";
        assert!(matches!(
            Script::parse(text).unwrap_err(),
            ScriptError::Malformed { step, .. } if step == "typo"
        ));
    }

    #[test]
    fn acl_notation() {
        let alice = parse_acl_entry("user:alice:r--").unwrap();
        assert_eq!(alice.tag, AclTag::User);
        assert_eq!(alice.name.as_deref(), Some("alice"));
        let gid = parse_acl_entry("group:100:r-x").unwrap();
        assert_eq!((gid.tag, gid.id), (AclTag::Group, Some(100)));
        assert_eq!(parse_acl_entry("other::---").unwrap().tag, AclTag::Other);
        assert!(parse_acl_entry("mask:bob:r--").is_none());
        assert!(parse_acl_entry("user::rwz").is_none());
    }
}
