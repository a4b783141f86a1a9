//! Operation script: an ordered list of independent fallible steps run against one session.
//!
//! A failing step is logged and recorded, and the runner moves on to the next one. The session
//! is always closed at the end, whatever happened before.

use crate::connection::{DirectoryConnector, Ldap3Connector};
use crate::entry::{AttributeSet, Modification};
use crate::search::SearchRequest;
use crate::session::DirectorySession;
use futures::future::BoxFuture;
use futures::FutureExt;
use ldaps_core::{Result, ScriptConfig, ScriptFixture};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Step names of the reference script.
pub mod steps {
    /// Prefix of bind attempts; the candidate number is appended (`bind#1`).
    pub const BIND: &str = "bind";
    /// Entry creation.
    pub const ADD_ENTRY: &str = "add_entry";
    /// Search under a base that does not exist.
    pub const SEARCH_MISSING_BASE: &str = "search_missing_base";
    /// Search under the valid base, drained to the end.
    pub const SEARCH: &str = "search";
    /// `AddValue` modification.
    pub const MODIFY_ADD_VALUE: &str = "modify_add_value";
    /// `ReplaceValue` modification.
    pub const MODIFY_REPLACE_VALUE: &str = "modify_replace_value";
    /// `RemoveValue` modification.
    pub const MODIFY_REMOVE_VALUE: &str = "modify_remove_value";
    /// Rename into a parent that does not exist.
    pub const RENAME_TO_MISSING_PARENT: &str = "rename_to_missing_parent";
    /// Rename within the existing parent.
    pub const RENAME: &str = "rename";
    /// Deletion of the original entry name.
    pub const DELETE_ENTRY: &str = "delete_entry";
    /// Deletion of the renamed entry.
    pub const DELETE_RENAMED_ENTRY: &str = "delete_renamed_entry";
    /// Session close.
    pub const CLOSE: &str = "close";
}

/// Future returned by a script step.
pub type StepFuture<'a> = BoxFuture<'a, Result<()>>;

type StepFn = Box<dyn for<'a> FnOnce(&'a mut DirectorySession) -> StepFuture<'a> + Send>;

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Step name.
    pub step: String,
    /// Step result.
    pub result: Result<()>,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

impl StepOutcome {
    /// Returns true if the step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Ordered list of named steps.
#[derive(Default)]
pub struct OperationScript {
    steps: Vec<(String, StepFn)>,
}

impl OperationScript {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    #[must_use]
    pub fn step<F>(mut self, name: impl Into<String>, step: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut DirectorySession) -> StepFuture<'a> + Send + 'static,
    {
        self.steps.push((name.into(), Box::new(step)));
        self
    }

    /// Step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the script has no step.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order against `session`. A failing step never stops the run.
    pub async fn run(self, session: &mut DirectorySession) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(self.steps.len());
        for (name, step) in self.steps {
            let started = Instant::now();
            let result = step(&mut *session).await;
            outcomes.push(record(name, result, started.elapsed()));
        }
        outcomes
    }
}

impl fmt::Debug for OperationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationScript")
            .field("steps", &self.step_names())
            .finish()
    }
}

fn record(step: String, result: Result<()>, elapsed: Duration) -> StepOutcome {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(()) => info!(step = %step, elapsed_ms, "step succeeded"),
        Err(err) if err.should_log() => error!(
            step = %step,
            elapsed_ms,
            code = err.error_code(),
            error = %err,
            "step failed without a server result, continuing"
        ),
        Err(err) => warn!(
            step = %step,
            elapsed_ms,
            code = err.error_code(),
            result_code = ?err.result_code(),
            error = %err,
            "step failed, continuing"
        ),
    }
    StepOutcome {
        step,
        result,
        elapsed,
    }
}

/// Outcome of one script run.
#[derive(Debug, Clone)]
pub struct ScriptReport {
    run_id: Uuid,
    outcomes: Vec<StepOutcome>,
}

impl ScriptReport {
    /// Identifier of the run, also recorded on the log span.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Every recorded step, in execution order.
    #[must_use]
    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    /// Outcome of the first step named `step`.
    #[must_use]
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|outcome| outcome.step == step)
    }

    /// Step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .map(|outcome| outcome.step.as_str())
            .collect()
    }

    /// Failed steps.
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> + '_ {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// Returns true if one of the bind attempts succeeded.
    #[must_use]
    pub fn bound(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.step.starts_with(steps::BIND) && outcome.is_success())
    }

    /// Returns true if the run reached the final close.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.outcomes
            .last()
            .is_some_and(|outcome| outcome.step == steps::CLOSE)
    }
}

/// Builds the reference script that follows a successful bind: add, two searches, three
/// modifications, two renames and two deletions.
#[must_use]
pub fn reference_script(fixture: &ScriptFixture) -> OperationScript {
    let entry = fixture.entry_dn.clone();
    let attributes = fixture
        .entry_attributes
        .iter()
        .flat_map(|(name, values)| values.iter().map(move |value| (name.clone(), value.clone())))
        .collect::<AttributeSet>();
    let attribute = fixture.modify_attribute.clone();

    let mut script = OperationScript::new();

    script = {
        let dn = entry.clone();
        script.step(steps::ADD_ENTRY, move |session| {
            async move { session.add_entry(&dn, &attributes).await }.boxed()
        })
    };

    for (name, base, filter) in [
        (
            steps::SEARCH_MISSING_BASE,
            fixture.missing_search_base.clone(),
            fixture.missing_search_filter.clone(),
        ),
        (
            steps::SEARCH,
            fixture.search_base.clone(),
            fixture.search_filter.clone(),
        ),
    ] {
        let attributes = fixture.search_attributes.clone();
        script = script.step(name, move |session| {
            drain_search(session, base, filter, attributes).boxed()
        });
    }

    for (name, modification) in [
        (
            steps::MODIFY_ADD_VALUE,
            Modification::add_value(attribute.clone(), fixture.added_value.clone()),
        ),
        (
            steps::MODIFY_REPLACE_VALUE,
            Modification::replace_value(attribute.clone(), fixture.replacement_value.clone()),
        ),
        (
            steps::MODIFY_REMOVE_VALUE,
            Modification::remove_value(attribute.clone(), fixture.replacement_value.clone()),
        ),
    ] {
        let dn = entry.clone();
        script = script.step(name, move |session| {
            async move { session.modify_entry(&dn, &[modification]).await }.boxed()
        });
    }

    for (name, target) in [
        (
            steps::RENAME_TO_MISSING_PARENT,
            fixture.unreachable_rename_dn.clone(),
        ),
        (steps::RENAME, fixture.rename_dn.clone()),
    ] {
        let dn = entry.clone();
        script = script.step(name, move |session| {
            async move { session.rename_entry(&dn, &target).await }.boxed()
        });
    }

    for (name, dn) in [
        (steps::DELETE_ENTRY, entry),
        (steps::DELETE_RENAMED_ENTRY, fixture.rename_dn.clone()),
    ] {
        script = script.step(name, move |session| {
            async move { session.delete_entry(&dn).await }.boxed()
        });
    }

    script
}

async fn drain_search(
    session: &mut DirectorySession,
    base: String,
    filter: String,
    attributes: Vec<String>,
) -> Result<()> {
    let request = SearchRequest::new(&base, &filter)?.with_attributes(attributes);
    let entries = session
        .search_for_each(&request, |_| ControlFlow::Continue(()))
        .await?;
    info!(base = %request.base(), entries, "search drained");
    Ok(())
}

/// Runs the reference script with `connector`.
///
/// Bind candidates are tried in order until one succeeds; each attempt is recorded as
/// `bind#N`. The remaining steps run whether or not a bind succeeded (without a bound
/// session they fail with `InvalidState` and issue no network I/O). The session is closed
/// last and the close is recorded.
pub async fn run_script(
    connector: Arc<dyn DirectoryConnector>,
    config: &ScriptConfig,
) -> ScriptReport {
    let run_id = Uuid::new_v4();
    let span = info_span!("directory_script", %run_id);

    async move {
        let mut session = DirectorySession::new(connector);
        let mut outcomes = Vec::new();

        let candidates = config.bind_candidates();
        for (index, params) in candidates.iter().enumerate() {
            let started = Instant::now();
            let result = session.bind(params).await;
            let bound = result.is_ok();
            outcomes.push(record(
                format!("{}#{}", steps::BIND, index + 1),
                result,
                started.elapsed(),
            ));
            if bound {
                break;
            }
            if index + 1 < candidates.len() {
                info!(candidate = index + 2, "falling back to next bind candidate");
            }
        }

        outcomes.extend(reference_script(config.fixture()).run(&mut session).await);

        let started = Instant::now();
        session.close().await;
        outcomes.push(record(steps::CLOSE.to_string(), Ok(()), started.elapsed()));

        let report = ScriptReport { run_id, outcomes };
        info!(
            steps = report.outcomes().len(),
            failed = report.failures().count(),
            bound = report.bound(),
            "directory script finished"
        );
        report
    }
    .instrument(span)
    .await
}

/// Runs the reference script against a real directory server.
///
/// Never fails: every problem is logged and absorbed, and the caller only observes the return.
pub async fn run_directory_test_script(config: &ScriptConfig) {
    let connector = match Ldap3Connector::new() {
        Ok(connector) => connector,
        Err(err) => {
            error!(error = %err, "failed to build directory connector, script skipped");
            return;
        }
    };
    let report = run_script(Arc::new(connector), config).await;
    if !report.bound() {
        error!(run_id = %report.run_id(), "no bind candidate succeeded");
    }
}
