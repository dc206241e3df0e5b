//! Test registry and lifecycle
//!
//! Cases are plain async functions registered by name. The runner executes
//! the selected cases one at a time, each inside its own capture session, and
//! counts failed checks per case.

use crate::capture::PacketCapture;
use crate::context::FlowContext;
use crate::{Error, Result};
use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use std::fmt;
use tracing::{error, info};

/// Failure counter for the case currently running
#[derive(Debug, Clone, Default)]
pub struct Checks {
    failures: usize,
    stop_on_failure: bool,
}

impl Checks {
    /// Create a counter; with `stop_on_failure` the first failure aborts the run
    pub fn new(stop_on_failure: bool) -> Self {
        Self {
            failures: 0,
            stop_on_failure,
        }
    }

    /// Record a failed check.
    ///
    /// Returns `Ok(false)` so callers can `return checks.fail(..)` from a
    /// boolean check, or [`Error::StopOnFailure`] in fast-fail mode.
    pub fn fail(&mut self, message: impl fmt::Display) -> Result<bool> {
        self.failures += 1;
        error!("FAIL: {}", message);
        if self.stop_on_failure {
            return Err(Error::StopOnFailure);
        }
        Ok(false)
    }

    /// Failures recorded since the last reset
    pub fn count(&self) -> usize {
        self.failures
    }

    /// Start counting from zero
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// A registered test case
pub type TestFn = for<'a> fn(&'a mut FlowContext) -> LocalBoxFuture<'a, Result<()>>;

/// Test cases by name, in registration order
#[derive(Default)]
pub struct TestRegistry {
    cases: IndexMap<String, TestFn>,
}

impl TestRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a case under `name`
    pub fn register(&mut self, name: impl Into<String>, case: TestFn) -> Result<()> {
        let name = name.into();
        if self.cases.contains_key(&name) {
            return Err(Error::DuplicateTest(name));
        }
        self.cases.insert(name, case);
        Ok(())
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cases.keys().map(String::as_str)
    }

    /// Look up a case
    pub fn get(&self, name: &str) -> Option<TestFn> {
        self.cases.get(name).copied()
    }

    /// Number of registered cases
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Resolve `filters` to cases, keeping the caller's order.
    ///
    /// No filter selects every case. Any unknown name fails the whole
    /// selection, listing all of the unknown names.
    pub fn select<'a>(&'a self, filters: &'a [String]) -> Result<Vec<(&'a str, TestFn)>> {
        if filters.is_empty() {
            return Ok(self
                .cases
                .iter()
                .map(|(name, case)| (name.as_str(), *case))
                .collect());
        }

        let unknown: Vec<String> = filters
            .iter()
            .filter(|name| !self.cases.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(Error::UnknownTests(unknown));
        }

        Ok(filters
            .iter()
            .filter_map(|name| self.cases.get(name).map(|case| (name.as_str(), *case)))
            .collect())
    }
}

/// Outcome of one case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseResult {
    /// Case name
    pub name: String,
    /// Failed checks
    pub failures: usize,
}

impl CaseResult {
    /// Whether no check failed
    pub fn passed(&self) -> bool {
        self.failures == 0
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Cases that ran, in execution order
    pub cases: Vec<CaseResult>,
    /// Whether the run was cut short by stop-on-failure
    pub aborted: bool,
}

impl RunSummary {
    /// Failed checks over all cases
    pub fn total_failures(&self) -> usize {
        self.cases.iter().map(|c| c.failures).sum()
    }

    /// Whether every case passed
    pub fn success(&self) -> bool {
        self.total_failures() == 0 && !self.aborted
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for case in &self.cases {
            let verdict = if case.passed() { "OK" } else { "FAILED" };
            writeln!(f, "  {:<40} {:>6} ({} failures)", case.name, verdict, case.failures)?;
        }
        if self.aborted {
            writeln!(f, "  run aborted on first failure")?;
        }
        write!(
            f,
            "{} cases, {} failed checks",
            self.cases.len(),
            self.total_failures()
        )
    }
}

/// Runs registered cases against a live context
pub struct TestRunner {
    registry: TestRegistry,
}

impl TestRunner {
    /// Create a runner over `registry`
    pub fn new(registry: TestRegistry) -> Self {
        Self { registry }
    }

    /// The cases this runner knows
    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Run the cases named in `filters` (all when empty).
    ///
    /// Each case gets a fresh failure count and a capture labelled
    /// `test_<name>`, which is stopped on every way out of the case. A failure
    /// under stop-on-failure ends the run with `aborted` set; any other error
    /// from a case is an environment problem and is returned.
    pub async fn run(
        &self,
        ctx: &mut FlowContext,
        capture: &mut PacketCapture,
        filters: &[String],
    ) -> Result<RunSummary> {
        let selected = self.registry.select(filters)?;
        let mut summary = RunSummary::default();

        for (name, case) in selected {
            ctx.start_case(name);
            capture.start(&format!("test_{}", name)).await?;

            let outcome = case(ctx).await;
            capture.stop().await;

            let failures = ctx.checks().count();
            summary.cases.push(CaseResult {
                name: name.to_string(),
                failures,
            });

            match outcome {
                Ok(()) => {}
                Err(Error::StopOnFailure) => {
                    error!("{} failed, stopping", name);
                    summary.aborted = true;
                    return Ok(summary);
                }
                Err(e) => return Err(e),
            }

            if failures != 0 {
                error!("{} failed", name);
            } else {
                info!("{} OK", name);
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capi::tests::ScriptedChannel;
    use crate::config::Settings;
    use crate::exec::ProcessRunner;
    use crate::topology::AlEntity;
    use async_trait::async_trait;
    use command_executor::Command;
    use futures::FutureExt;
    use std::sync::Arc;

    struct NoProcesses;

    #[async_trait]
    impl ProcessRunner for NoProcesses {
        async fn run(&self, _device: &str, _command: Command) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn context(stop_on_failure: bool) -> FlowContext {
        let entity = |name: &str, mac: &str, controller: bool| {
            Arc::new(AlEntity::new(
                name,
                mac.parse().unwrap(),
                controller,
                ScriptedChannel::boxed([]),
            ))
        };
        FlowContext::new(
            entity("gateway", "02:42:c0:a8:64:02", true),
            vec![entity("repeater1", "02:42:c0:a8:64:03", false)],
            Arc::new(NoProcesses),
            Settings::default(),
            Checks::new(stop_on_failure),
        )
    }

    fn passing(_ctx: &mut FlowContext) -> LocalBoxFuture<'_, Result<()>> {
        async { Ok(()) }.boxed_local()
    }

    fn failing_twice(ctx: &mut FlowContext) -> LocalBoxFuture<'_, Result<()>> {
        async move {
            ctx.fail("first")?;
            ctx.fail("second")?;
            Ok(())
        }
        .boxed_local()
    }

    fn environment_broken(_ctx: &mut FlowContext) -> LocalBoxFuture<'_, Result<()>> {
        async { Err(Error::environment("container gone")) }.boxed_local()
    }

    fn registry() -> TestRegistry {
        let mut registry = TestRegistry::new();
        registry.register("first", passing).unwrap();
        registry.register("second", failing_twice).unwrap();
        registry.register("third", passing).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        assert!(matches!(
            registry.register("first", passing),
            Err(Error::DuplicateTest(name)) if name == "first"
        ));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_select_all_in_registration_order() {
        let registry = registry();
        let names: Vec<&str> = registry.select(&[]).unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn test_select_keeps_caller_order() {
        let registry = registry();
        let filters = vec!["third".to_string(), "first".to_string()];
        let names: Vec<&str> = registry
            .select(&filters)
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, ["third", "first"]);
    }

    #[test]
    fn test_select_reports_every_unknown_name() {
        let registry = registry();
        let filters = vec!["first".to_string(), "bogus".to_string(), "nope".to_string()];
        match registry.select(&filters) {
            Err(Error::UnknownTests(unknown)) => assert_eq!(unknown, ["bogus", "nope"]),
            other => panic!("unexpected selection: {:?}", other.map(|v| v.len())),
        }
    }

    #[smol_potat::test]
    async fn test_failures_are_counted_per_case() {
        let runner = TestRunner::new(registry());
        let mut ctx = context(false);
        let mut capture = PacketCapture::disabled();

        let summary = runner.run(&mut ctx, &mut capture, &[]).await.unwrap();

        assert_eq!(summary.cases.len(), 3);
        assert!(summary.cases[0].passed());
        assert_eq!(summary.cases[1].failures, 2);
        assert!(summary.cases[2].passed());
        assert_eq!(summary.total_failures(), 2);
        assert!(!summary.aborted);
        assert!(!summary.success());
    }

    #[smol_potat::test]
    async fn test_stop_on_failure_skips_remaining_cases() {
        let runner = TestRunner::new(registry());
        let mut ctx = context(true);
        let mut capture = PacketCapture::disabled();

        let summary = runner.run(&mut ctx, &mut capture, &[]).await.unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.cases.len(), 2);
        assert_eq!(summary.cases[1].failures, 1);
        assert!(!capture.is_running());
    }

    #[smol_potat::test]
    async fn test_environment_error_ends_run() {
        let mut registry = registry();
        registry.register("broken", environment_broken).unwrap();
        let runner = TestRunner::new(registry);
        let mut ctx = context(false);
        let mut capture = PacketCapture::disabled();

        let filters = vec!["broken".to_string(), "first".to_string()];
        let result = runner.run(&mut ctx, &mut capture, &filters).await;
        assert!(matches!(result, Err(Error::Environment(_))));
    }

    #[smol_potat::test]
    async fn test_running_label_follows_case() {
        fn record(ctx: &mut FlowContext) -> LocalBoxFuture<'_, Result<()>> {
            async move {
                if ctx.running() != "labelled" {
                    ctx.fail(format!("running is {}", ctx.running()))?;
                }
                Ok(())
            }
            .boxed_local()
        }

        let mut registry = TestRegistry::new();
        registry.register("labelled", record).unwrap();
        let runner = TestRunner::new(registry);
        let mut ctx = context(false);

        let summary = runner
            .run(&mut ctx, &mut PacketCapture::disabled(), &[])
            .await
            .unwrap();
        assert!(summary.success());
    }
}
