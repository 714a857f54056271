// CLASSIFICATION: COMMUNITY
// Filename: driver.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Runs one script against one plugin and produces a [`Report`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::json;

use super::expect::{ParcelExpectation, Vars};
use super::fixture::Workspace;
use super::script::{Directive, MonitorRequest, Script, Step};
use super::{ExpectationFailure, FailureKind, Phase, Report, Verdict};
use crate::attr::{capture, CaptureError};
use crate::bridge::{ChannelStats, ModuleBridge, Plugin};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::parcel::{Parcel, StreamValidator, StreamViolation};

/// Where the plugin under test comes from.
pub enum PluginSource {
    Library(PathBuf),
    Instance(Box<dyn Plugin>),
    /// The module named by the script's `plugin` key.
    Script,
}

/// Why a run stopped early.
enum Halt {
    Failed(ExpectationFailure),
    Errored {
        step: Option<String>,
        error: HarnessError,
    },
}

impl Halt {
    fn at(step: &Step, error: impl Into<HarnessError>) -> Self {
        Halt::Errored {
            step: Some(step.name.clone()),
            error: error.into(),
        }
    }

    fn setup(error: impl Into<HarnessError>) -> Self {
        Halt::Errored {
            step: None,
            error: error.into(),
        }
    }
}

pub struct ScenarioDriver {
    config: HarnessConfig,
}

impl ScenarioDriver {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Parse and run a script file. `plugin` overrides the script's `plugin` key.
    pub fn run_file(&self, path: &Path, plugin: Option<&Path>) -> Report {
        let fallback = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match Script::from_file(path) {
            Ok(script) => {
                let source = plugin.map_or(PluginSource::Script, |p| PluginSource::Library(p.into()));
                self.run(script, source)
            }
            Err(e) => parse_failure(fallback, e.into()),
        }
    }

    pub fn run_text(&self, text: &str, source: PluginSource) -> Report {
        match Script::parse(text) {
            Ok(script) => self.run(script, source),
            Err(e) => parse_failure(String::new(), e.into()),
        }
    }

    pub fn run(&self, script: Script, source: PluginSource) -> Report {
        info!("scenario `{}`: {} steps", script.name, script.steps.len());
        let mut run = Run {
            script: &script,
            config: &self.config,
            phase: Phase::Parse,
            observed: Vec::new(),
            captures: 0,
            vars: Vars::default(),
        };
        let mut workspace = None;
        let mut bridge = None;
        let outcome = run.execute(source, &mut workspace, &mut bridge);
        let plugin = bridge
            .as_ref()
            .and_then(|b| b.descriptor().ok())
            .map(|d| d.name.clone());
        let stats = bridge.as_ref().map(ModuleBridge::stats).unwrap_or_default();
        let unloaded = match bridge.as_mut() {
            Some(b) => b.unload(),
            None => Ok(()),
        };
        // the plugin may still be watching fixture paths until it is stopped
        drop(workspace);
        let phase = run.phase;
        if outcome.is_err() {
            run.enter(Phase::Failed);
        }
        let mut teardown = None;
        let verdict = match (outcome, unloaded) {
            (Ok(()), Ok(())) => Verdict::Passed,
            (Ok(()), Err(e)) => errored(None, e.into()),
            (Err(halt), unloaded) => {
                if let Err(e) = unloaded {
                    error!("scenario `{}`: unload failed: {e}", script.name);
                    teardown = Some(e.to_string());
                }
                match halt {
                    Halt::Failed(failure) => Verdict::Failed(failure),
                    Halt::Errored { step, error } => errored(step, error),
                }
            }
        };
        match &verdict {
            Verdict::Passed => info!("scenario `{}` passed", script.name),
            Verdict::Failed(f) => warn!("scenario `{}` failed: {f}", script.name),
            Verdict::Errored { error, .. } => error!("scenario `{}` errored: {error}", script.name),
        }
        Report {
            scenario: script.name.clone(),
            plugin,
            verdict,
            phase,
            parcels_observed: run.observed.len(),
            captures: run.captures,
            stats,
            teardown,
        }
    }
}

fn errored(step: Option<String>, error: HarnessError) -> Verdict {
    Verdict::Errored {
        step,
        category: error.category(),
        error: error.to_string(),
    }
}

fn parse_failure(scenario: String, error: HarnessError) -> Report {
    error!("script rejected: {error}");
    let step = match &error {
        HarnessError::Script(super::ScriptError::Malformed { step, .. }) => Some(step.clone()),
        _ => None,
    };
    Report {
        scenario,
        plugin: None,
        verdict: errored(step, error),
        phase: Phase::Parse,
        parcels_observed: 0,
        captures: 0,
        stats: ChannelStats::default(),
        teardown: None,
    }
}

/// Mutable state of one run.
struct Run<'a> {
    script: &'a Script,
    config: &'a HarnessConfig,
    phase: Phase,
    observed: Vec<Parcel>,
    captures: usize,
    vars: Vars,
}

impl Run<'_> {
    fn enter(&mut self, phase: Phase) {
        debug!("{} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn execute(
        &mut self,
        source: PluginSource,
        workspace: &mut Option<Workspace>,
        slot: &mut Option<ModuleBridge>,
    ) -> Result<(), Halt> {
        let script = self.script;
        let workspace = &*workspace.insert(Workspace::create().map_err(Halt::setup)?);
        let settings = &self.config.settings;
        let capacity = self.config.capture_capacity;
        let bridge = match source {
            PluginSource::Library(path) => ModuleBridge::load(&path, settings, capacity),
            PluginSource::Instance(plugin) => ModuleBridge::attach(plugin, settings, capacity),
            PluginSource::Script => match &script.plugin {
                Some(path) => ModuleBridge::load(path, settings, capacity),
                None => return Err(Halt::setup(HarnessError::NoPlugin)),
            },
        }
        .map_err(Halt::setup)?;
        let bridge = slot.insert(bridge);
        self.vars = Vars {
            plugin: bridge.descriptor().map_err(Halt::setup)?.name.clone(),
            root: workspace.root().display().to_string(),
        };

        self.enter(Phase::Before);
        for step in script.steps_in(Phase::Before) {
            info!("[before] {} ({})", step.name, step.directive.kind_name());
            match &step.directive {
                Directive::Fixture(fixture) => {
                    workspace.apply(fixture).map_err(|e| Halt::at(step, e))?
                }
                Directive::MonitorRequest(req) => {
                    let request = monitor_request(workspace, req);
                    bridge
                        .deliver(&req.capability, &request)
                        .map_err(|e| Halt::at(step, e))?;
                }
                _ => {}
            }
        }

        self.enter(Phase::Trigger);
        self.collect(bridge).map_err(Halt::setup)?;

        self.enter(Phase::After);
        for step in script.steps_in(Phase::After) {
            info!("[after] {} ({})", step.name, step.directive.kind_name());
            match &step.directive {
                Directive::ExpectParcel(wait) => {
                    let timeout = wait
                        .timeout
                        .or(script.timeout)
                        .unwrap_or_else(|| self.config.wait_timeout());
                    self.wait_for(bridge, step, &wait.expect, timeout)?;
                }
                Directive::Exists { path, exists } => {
                    let full = workspace.resolve(path);
                    let present = match fs::symlink_metadata(&full) {
                        Ok(_) => true,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
                        Err(source) => {
                            return Err(Halt::at(step, CaptureError::Io { path: full, source }))
                        }
                    };
                    if present != *exists {
                        return Err(Halt::Failed(ExpectationFailure {
                            step: step.name.clone(),
                            kind: FailureKind::Existence,
                            expected: presence(*exists, path),
                            actual: presence(present, path),
                        }));
                    }
                }
                Directive::FileState { path, expect } => {
                    let full = workspace.resolve(path);
                    self.captures += 1;
                    let snapshot = match capture(&full, &expect.kinds()) {
                        Ok(snapshot) => snapshot,
                        Err(e) if e.is_not_found() => {
                            return Err(Halt::Failed(ExpectationFailure {
                                step: step.name.clone(),
                                kind: FailureKind::NotFound,
                                expected: expect.describe(),
                                actual: format!("{} does not exist", path.display()),
                            }))
                        }
                        Err(e) => return Err(Halt::at(step, e)),
                    };
                    if let Err(m) = expect.verify(&snapshot) {
                        return Err(Halt::Failed(ExpectationFailure {
                            step: step.name.clone(),
                            kind: FailureKind::Mismatch,
                            expected: format!("{}={}", m.kind, m.expected),
                            actual: format!("{}={}", m.kind, m.actual),
                        }));
                    }
                }
                _ => {}
            }
        }

        self.collect(bridge).map_err(Halt::setup)?;
        self.check_stream(bridge.stats())?;
        self.enter(Phase::Done);
        Ok(())
    }

    fn record(&mut self, parcel: Parcel) {
        debug!("observed {parcel}");
        self.observed.push(parcel);
    }

    fn collect(&mut self, bridge: &mut ModuleBridge) -> Result<(), HarnessError> {
        for parcel in bridge.drain()? {
            self.record(parcel);
        }
        Ok(())
    }

    /// Poll the channel until `expect.count` observed parcels match or the
    /// deadline passes.
    fn wait_for(
        &mut self,
        bridge: &mut ModuleBridge,
        step: &Step,
        expect: &ParcelExpectation,
        timeout: Duration,
    ) -> Result<(), Halt> {
        let deadline = Instant::now() + timeout;
        let poll = self.config.poll_interval();
        loop {
            self.collect(bridge).map_err(|e| Halt::at(step, e))?;
            let hits = self
                .observed
                .iter()
                .filter(|p| expect.matches(p, &self.vars))
                .count();
            if hits >= expect.count {
                debug!("{}: {hits} matching parcel(s)", step.name);
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Halt::Failed(ExpectationFailure {
                    step: step.name.clone(),
                    kind: FailureKind::ExpectationTimeout,
                    expected: expect.describe(&self.vars),
                    actual: format!(
                        "{hits} matching of {} observed after {}ms",
                        self.observed.len(),
                        timeout.as_millis()
                    ),
                }));
            }
            if let Some(parcel) = bridge
                .wait_next(poll.min(deadline - now))
                .map_err(|e| Halt::at(step, e))?
            {
                self.record(parcel);
            }
        }
    }

    fn check_stream(&self, stats: ChannelStats) -> Result<(), Halt> {
        if stats.dropped > 0 {
            return Err(Halt::Failed(ExpectationFailure {
                step: "capture".into(),
                kind: FailureKind::CaptureOverflow,
                expected: format!("at most {} buffered parcels", self.config.capture_capacity),
                actual: format!("{} dropped", stats.dropped),
            }));
        }
        if stats.malformed > 0 {
            return Err(Halt::Failed(ExpectationFailure {
                step: "capture".into(),
                kind: FailureKind::MalformedParcel,
                expected: "well-formed parcels".into(),
                actual: format!("{} rejected at the boundary", stats.malformed),
            }));
        }
        if let Some(violation) = StreamValidator::validate(&self.observed).into_iter().next() {
            let expected = match &violation {
                StreamViolation::SequenceRegression { previous, .. } => {
                    format!("sequence after {previous}")
                }
                StreamViolation::GroupAfterLast { group_id, .. } => {
                    format!("no parcel in group {group_id} after its last")
                }
            };
            return Err(Halt::Failed(ExpectationFailure {
                step: "stream".into(),
                kind: FailureKind::OrderingViolation,
                expected,
                actual: violation.to_string(),
            }));
        }
        Ok(())
    }
}

fn presence(exists: bool, path: &Path) -> String {
    if exists {
        format!("{} exists", path.display())
    } else {
        format!("{} absent", path.display())
    }
}

/// JSON body handed to the capability handler.
fn monitor_request(workspace: &Workspace, req: &MonitorRequest) -> serde_json::Value {
    let attributes: Vec<&str> = req.attributes.iter().map(|k| k.as_str()).collect();
    json!({
        "path": workspace.resolve(&req.path).display().to_string(),
        "attributes": attributes,
        "config": req.config,
    })
}
