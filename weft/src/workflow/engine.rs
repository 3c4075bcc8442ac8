//! Workflow: a dependency-ordered task graph executed with inter-step
//! parallelism.
//!
//! Construction validates the graph (unique names, known dependencies, no
//! cycles). Execution keeps a per-step status machine, launches every
//! runnable step concurrently, and re-evaluates runnability on each
//! completion event. A failed step cascades skip through its dependents; a
//! false `when` gate skips only the step itself. The engine never fail-fasts
//! across independent branches: the first error is recorded and returned
//! after everything that can still run has settled.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, TryStreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use super::context::{display_value, WorkflowContext};
use super::step::{RetryPolicy, Step, StepInput, StepShape};
use crate::ctx::RunContext;
use crate::error::AgentError;
use crate::task::{AgentResult, AgentTask};
use crate::traits::Agent;

/// Construction-time validation failures.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowBuildError {
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),
    #[error("step {step} depends on unknown step {dep}")]
    UnknownDependency { step: String, dep: String },
    #[error("dependency cycle involving step {0}")]
    Cycle(String),
}

/// Execution status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// Upstream failure cascaded here; the step never ran.
    SkippedFailure,
    /// The `when` gate returned false; dependents still run.
    SkippedCondition,
    /// The step's agent suspended; treated like failure for dependents.
    Suspended,
}

impl StepStatus {
    /// Counts as satisfied from a dependent's point of view.
    fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Success | Self::SkippedCondition)
    }

    /// Poisons dependents (cascade-skip).
    fn poisons_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::SkippedFailure | Self::Suspended)
    }
}

type ErrorCallback = Arc<dyn Fn(&str, &AgentError) + Send + Sync>;
type FinishCallback = Arc<dyn Fn(&AgentResult) + Send + Sync>;

/// A validated, executable task graph. Implements [`Agent`], so workflows
/// compose with networks and spawns like any other agent.
pub struct Workflow {
    name: String,
    description: String,
    steps: Vec<Step>,
    on_error: Option<ErrorCallback>,
    on_finish: Option<FinishCallback>,
}

impl Workflow {
    /// Validates and builds the graph.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<Step>,
    ) -> Result<Self, WorkflowBuildError> {
        let mut names = HashSet::new();
        for step in &steps {
            if !names.insert(step.name.clone()) {
                return Err(WorkflowBuildError::DuplicateStep(step.name.clone()));
            }
        }
        for step in &steps {
            for dep in &step.after {
                if !names.contains(dep) {
                    return Err(WorkflowBuildError::UnknownDependency {
                        step: step.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }
        check_acyclic(&steps)?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            steps,
            on_error: None,
            on_finish: None,
        })
    }

    /// Callback fired once per failed step, before the engine returns.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &AgentError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Callback fired once with the aggregate result, before the engine
    /// returns (on success and on failure).
    pub fn on_finish<F>(mut self, f: F) -> Self
    where
        F: Fn(&AgentResult) + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(f));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Runs the graph against an existing context. Returns the first step
    /// error (wrapped) after all independent branches settle.
    pub async fn run(
        &self,
        ctx: &RunContext,
        wf: &WorkflowContext,
    ) -> Result<HashMap<String, StepStatus>, AgentError> {
        let mut status: HashMap<String, StepStatus> = self
            .steps
            .iter()
            .map(|s| (s.name.clone(), StepStatus::Pending))
            .collect();
        let (done_tx, mut done_rx) =
            mpsc::channel::<(String, Result<(), AgentError>)>(self.steps.len().max(1));
        let mut running = 0usize;
        let mut first_error: Option<AgentError> = None;

        loop {
            if !ctx.is_cancelled() {
                running += self.launch_runnable(ctx, wf, &mut status, &done_tx);
            }
            if running == 0 {
                break;
            }
            // Completion events re-evaluate runnability; in-flight steps see
            // the cancelled ctx themselves, so this recv is not raced.
            let Some((name, result)) = done_rx.recv().await else {
                break;
            };
            running -= 1;
            match result {
                Ok(()) => {
                    status.insert(name, StepStatus::Success);
                }
                Err(e) => {
                    let wrapped = match e {
                        e @ AgentError::Suspended(_) => {
                            status.insert(name.clone(), StepStatus::Suspended);
                            e
                        }
                        AgentError::Cancelled => {
                            status.insert(name.clone(), StepStatus::Failed);
                            AgentError::Cancelled
                        }
                        e => {
                            status.insert(name.clone(), StepStatus::Failed);
                            AgentError::WorkflowStep {
                                step: name.clone(),
                                source: Box::new(e),
                            }
                        }
                    };
                    if let Some(cb) = &self.on_error {
                        cb(&name, &wrapped);
                    }
                    if first_error.is_none() {
                        first_error = Some(wrapped);
                    }
                }
            }
        }

        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(status),
        }
    }

    /// Launches every currently runnable step; resolves skips to a fixpoint
    /// first so cascades settle without extra round-trips.
    fn launch_runnable(
        &self,
        ctx: &RunContext,
        wf: &WorkflowContext,
        status: &mut HashMap<String, StepStatus>,
        done_tx: &mpsc::Sender<(String, Result<(), AgentError>)>,
    ) -> usize {
        let mut launched = 0;
        let mut changed = true;
        while changed {
            changed = false;
            for step in &self.steps {
                if status[&step.name] != StepStatus::Pending {
                    continue;
                }
                let poisoned = step
                    .after
                    .iter()
                    .any(|d| status[d].poisons_dependents());
                if poisoned {
                    status.insert(step.name.clone(), StepStatus::SkippedFailure);
                    changed = true;
                    continue;
                }
                let ready = step
                    .after
                    .iter()
                    .all(|d| status[d].satisfies_dependents());
                if !ready {
                    continue;
                }
                if let Some(when) = &step.when {
                    if !when(wf) {
                        status.insert(step.name.clone(), StepStatus::SkippedCondition);
                        changed = true;
                        continue;
                    }
                }
                status.insert(step.name.clone(), StepStatus::Running);
                changed = true;
                launched += 1;
                let step = step.clone();
                let ctx = ctx.clone();
                let wf = wf.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let name = step.name.clone();
                    // A panicking step must still report completion or the
                    // engine would wait on it forever.
                    let result = match AssertUnwindSafe(run_step(&ctx, &wf, step))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(payload) => Err(AgentError::ExecutionFailed(panic_message(payload))),
                    };
                    let _ = done_tx.send((name, result)).await;
                });
            }
        }
        launched
    }

    /// The workflow output: the last declared step's default key, else the
    /// most recently written value.
    fn output_value(&self, wf: &WorkflowContext) -> String {
        if let Some(last) = self.steps.last() {
            for key in [format!("{}.output", last.name), format!("{}.result", last.name)] {
                if let Some(v) = wf.get(&key) {
                    return display_value(&v);
                }
            }
        }
        wf.last_written()
            .map(|(_, v)| display_value(&v))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Agent for Workflow {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, ctx: &RunContext, task: AgentTask) -> Result<AgentResult, AgentError> {
        let wf = WorkflowContext::with_input(&task.input);
        let run = self.run(ctx, &wf).await;
        let result = AgentResult {
            output: self.output_value(&wf),
            usage: wf.usage(),
            ..Default::default()
        };
        if let Some(cb) = &self.on_finish {
            cb(&result);
        }
        run.map(|_| result)
    }
}

/// Retry wrapper around one step's shaped execution. Cancellation and
/// suspension are never retried.
async fn run_step(ctx: &RunContext, wf: &WorkflowContext, step: Step) -> Result<(), AgentError> {
    let policy = step.retry;
    let mut attempt = 0usize;
    loop {
        match run_shape(ctx, wf, &step).await {
            Ok(()) => return Ok(()),
            Err(e @ (AgentError::Cancelled | AgentError::Suspended(_))) => return Err(e),
            Err(e) => {
                let attempts = policy.as_ref().map(|p| p.attempts).unwrap_or(0);
                if attempt >= attempts {
                    return Err(e);
                }
                let RetryPolicy { base_delay, .. } = policy.expect("attempts > 0 implies policy");
                let delay = base_delay * 2u32.saturating_pow(attempt as u32);
                tracing::debug!(step = %step.name, attempt, ?delay, "step failed; retrying");
                tokio::select! {
                    _ = ctx.cancelled() => return Err(AgentError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

async fn run_shape(ctx: &RunContext, wf: &WorkflowContext, step: &Step) -> Result<(), AgentError> {
    ctx.ensure_active()?;
    match &step.shape {
        StepShape::Plain => (step.func)(ctx.clone(), wf.clone(), StepInput::default()).await,
        StepShape::ForEach { key, concurrency } => {
            let items = match wf.get(key) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let func = Arc::clone(&step.func);
            futures::stream::iter(items.into_iter().enumerate().map(Ok))
                .try_for_each_concurrent(*concurrency, move |(index, element)| {
                    let func = Arc::clone(&func);
                    let ctx = ctx.clone();
                    let wf = wf.clone();
                    async move {
                        func(
                            ctx,
                            wf,
                            StepInput {
                                element: Some(element),
                                index: Some(index),
                            },
                        )
                        .await
                    }
                })
                .await
        }
        StepShape::DoUntil {
            predicate,
            max_iter,
        } => {
            for index in 0..*max_iter {
                ctx.ensure_active()?;
                (step.func)(
                    ctx.clone(),
                    wf.clone(),
                    StepInput {
                        element: None,
                        index: Some(index),
                    },
                )
                .await?;
                if predicate(wf) {
                    return Ok(());
                }
            }
            Err(AgentError::MaxIterations(*max_iter))
        }
        StepShape::DoWhile {
            predicate,
            max_iter,
        } => {
            for index in 0..*max_iter {
                ctx.ensure_active()?;
                (step.func)(
                    ctx.clone(),
                    wf.clone(),
                    StepInput {
                        element: None,
                        index: Some(index),
                    },
                )
                .await?;
                if !predicate(wf) {
                    return Ok(());
                }
            }
            Err(AgentError::MaxIterations(*max_iter))
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let text = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("step panicked: {text}")
}

/// Kahn's algorithm over the dependency edges.
fn check_acyclic(steps: &[Step]) -> Result<(), WorkflowBuildError> {
    let mut indegree: HashMap<&str, usize> =
        steps.iter().map(|s| (s.name.as_str(), s.after.len())).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for dep in &step.after {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.name.as_str());
        }
    }
    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut visited = 0;
    while let Some(name) = queue.pop() {
        visited += 1;
        for dependent in dependents.get(name).into_iter().flatten() {
            let d = indegree.get_mut(dependent).expect("known step");
            *d -= 1;
            if *d == 0 {
                queue.push(dependent);
            }
        }
    }
    if visited != steps.len() {
        let stuck = indegree
            .iter()
            .find(|(_, d)| **d > 0)
            .map(|(n, _)| n.to_string())
            .unwrap_or_default();
        return Err(WorkflowBuildError::Cycle(stuck));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn set_step(name: &'static str) -> Step {
        Step::new(name, move |_ctx, wf, _input| async move {
            wf.set(format!("{name}.output"), name);
            Ok(())
        })
    }

    fn failing_step(name: &'static str) -> Step {
        Step::new(name, move |_ctx, _wf, _input| async move {
            Err(AgentError::ExecutionFailed("nope".into()))
        })
    }

    /// **Scenario**: Diamond DAG — b and c run after a, d after both; every
    /// step executes once and the output is the last declared step's.
    #[tokio::test]
    async fn diamond_dag_executes_in_order() {
        let ctx = RunContext::new();
        let wf = Workflow::new(
            "diamond",
            "",
            vec![
                set_step("a"),
                set_step("b").after(&["a"]),
                set_step("c").after(&["a"]),
                set_step("d").after(&["b", "c"]),
            ],
        )
        .unwrap();
        let result = wf.execute(&ctx, AgentTask::new("go")).await.unwrap();
        assert_eq!(result.output, "d");
    }

    /// **Scenario**: Validation rejects duplicates, unknown deps, cycles.
    #[test]
    fn construction_validation() {
        let dup = Workflow::new("w", "", vec![set_step("a"), set_step("a")]);
        assert!(matches!(dup, Err(WorkflowBuildError::DuplicateStep(_))));

        let unknown = Workflow::new("w", "", vec![set_step("a").after(&["ghost"])]);
        assert!(matches!(
            unknown,
            Err(WorkflowBuildError::UnknownDependency { .. })
        ));

        let cycle = Workflow::new(
            "w",
            "",
            vec![set_step("a").after(&["b"]), set_step("b").after(&["a"])],
        );
        assert!(matches!(cycle, Err(WorkflowBuildError::Cycle(_))));
    }

    /// **Scenario**: A false When gate skips the step but not its dependents.
    #[tokio::test]
    async fn condition_skip_does_not_cascade() {
        let ctx = RunContext::new();
        let executed = Arc::new(AtomicUsize::new(0));
        let b_ran = Arc::new(AtomicUsize::new(0));
        let b_counter = Arc::clone(&b_ran);
        let b = Step::new("b", move |_ctx, _wf, _input| {
            let counter = Arc::clone(&b_counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .after(&["a"])
        .when(|_| false);
        let c_counter = Arc::clone(&executed);
        let c = Step::new("c", move |_ctx, wf, _input| {
            let counter = Arc::clone(&c_counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                wf.set("c.output", "c ran");
                Ok(())
            }
        })
        .after(&["b"]);

        let wf = Workflow::new("gated", "", vec![set_step("a"), b, c]).unwrap();
        let result = wf.execute(&ctx, AgentTask::new("")).await.unwrap();
        assert_eq!(result.output, "c ran");
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(b_ran.load(Ordering::SeqCst), 0);
    }

    /// **Scenario**: A failed step cascades skip through its dependents, the
    /// sibling branch still completes, and the first error is returned.
    #[tokio::test]
    async fn failure_cascades_but_siblings_run() {
        let ctx = RunContext::new();
        let downstream_ran = Arc::new(AtomicUsize::new(0));
        let sibling_ran = Arc::new(AtomicUsize::new(0));

        let down_counter = Arc::clone(&downstream_ran);
        let downstream = Step::new("downstream", move |_ctx, _wf, _input| {
            let counter = Arc::clone(&down_counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .after(&["broken"]);

        let sib_counter = Arc::clone(&sibling_ran);
        let sibling = Step::new("sibling", move |_ctx, _wf, _input| {
            let counter = Arc::clone(&sib_counter);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let wf = Workflow::new(
            "branchy",
            "",
            vec![failing_step("broken"), downstream, sibling],
        )
        .unwrap();
        let err = wf.execute(&ctx, AgentTask::new("")).await.unwrap_err();
        assert!(err.to_string().contains("workflow step broken failed"));
        assert_eq!(downstream_ran.load(Ordering::SeqCst), 0);
        assert_eq!(sibling_ran.load(Ordering::SeqCst), 1);
    }

    /// **Scenario**: Retries back off exponentially and eventually succeed.
    #[tokio::test]
    async fn retry_recovers_flaky_step() {
        let ctx = RunContext::new();
        let tries = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&tries);
        let flaky = Step::new("flaky", move |_ctx, wf, _input| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AgentError::ExecutionFailed("not yet".into()))
                } else {
                    wf.set("flaky.output", "third time lucky");
                    Ok(())
                }
            }
        })
        .retry(3, Duration::from_millis(1));

        let wf = Workflow::new("retry", "", vec![flaky]).unwrap();
        let result = wf.execute(&ctx, AgentTask::new("")).await.unwrap();
        assert_eq!(result.output, "third time lucky");
        assert_eq!(tries.load(Ordering::SeqCst), 3);
    }

    /// **Scenario**: ForEach over an empty collection is zero invocations and
    /// success; over a populated one, once per element.
    #[tokio::test]
    async fn for_each_shapes() {
        let ctx = RunContext::new();
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let each = Step::new("each", move |_ctx, wf, input| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let element = input.element.unwrap();
                wf.set(format!("seen.{}", input.index.unwrap()), element);
                Ok(())
            }
        })
        .for_each_concurrent("items", 2);

        let seed = Step::new("seed", |_ctx, wf, _input| async move {
            wf.set("items", serde_json::json!(["x", "y", "z"]));
            Ok(())
        });
        let wf = Workflow::new("fe", "", vec![seed, each.after(&["seed"])]).unwrap();
        wf.execute(&ctx, AgentTask::new("")).await.unwrap();
        assert_eq!(invocations.load(Ordering::SeqCst), 3);

        // Empty collection: zero invocations, still success.
        let none = Step::new("none", |_ctx, _wf, _input| async move {
            panic!("must not run")
        })
        .for_each("absent");
        let wf = Workflow::new("fe2", "", vec![none]).unwrap();
        wf.execute(&ctx, AgentTask::new("")).await.unwrap();
    }

    /// **Scenario**: DoUntil with an always-false predicate runs exactly
    /// max_iter times and errors; DoWhile stops when its predicate flips.
    #[tokio::test]
    async fn loop_shapes_respect_bounds() {
        let ctx = RunContext::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let stubborn = Step::new("stubborn", move |_ctx, _wf, _input| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .do_until(|_| false)
        .loop_bound(4);
        let wf = Workflow::new("du", "", vec![stubborn]).unwrap();
        let err = wf.execute(&ctx, AgentTask::new("")).await.unwrap_err();
        assert!(err.to_string().contains("max iterations"));
        assert_eq!(runs.load(Ordering::SeqCst), 4);

        let count = Step::new("count", |_ctx, wf, input| async move {
            wf.set("n", input.index.unwrap() as i64 + 1);
            Ok(())
        })
        .do_while(|wf| wf.get("n").and_then(|v| v.as_i64()).unwrap_or(0) < 3);
        let wf = Workflow::new("dw", "", vec![count]).unwrap();
        let result = wf.execute(&ctx, AgentTask::new("")).await.unwrap();
        assert_eq!(result.output, "3");
    }

    /// **Scenario**: A suspending step surfaces its suspension as the
    /// workflow error, dependents cascade-skip, and siblings still run.
    #[tokio::test]
    async fn step_suspension_surfaces_and_cascades() {
        use crate::suspend::Suspension;

        let ctx = RunContext::new();
        let paused = Step::new("paused", |_ctx, _wf, _input| async move {
            let resume: crate::suspend::ResumeFn = Box::new(|_input: String| {
                Box::pin(async move { Ok(crate::task::AgentResult::default()) })
            });
            Err(AgentError::Suspended(Box::new(Suspension::new(
                "gate",
                serde_json::json!({"confirm": "continue?"}),
                resume,
            ))))
        });
        let blocked = Step::new("blocked", |_ctx, _wf, _input| async move {
            panic!("must not run")
        })
        .after(&["paused"]);
        let sibling = set_step("sibling");

        let wf = Workflow::new("pausing", "", vec![paused, blocked, sibling]).unwrap();
        let wf_ctx = WorkflowContext::new();
        let err = wf.run(&ctx, &wf_ctx).await.unwrap_err();
        let suspension = err.as_suspension().expect("suspension preserved");
        assert_eq!(suspension.step(), "gate");
        assert_eq!(wf_ctx.get("sibling.output").unwrap(), "sibling");
    }

    /// **Scenario**: Zero steps is immediate success with empty output.
    #[tokio::test]
    async fn empty_workflow_succeeds() {
        let ctx = RunContext::new();
        let wf = Workflow::new("empty", "", vec![]).unwrap();
        let result = wf.execute(&ctx, AgentTask::new("x")).await.unwrap();
        assert_eq!(result.output, "");
    }

    /// **Scenario**: Cancellation stops new launches; in-flight steps wind
    /// down and the engine returns the ctx error.
    #[tokio::test]
    async fn cancellation_drains_in_flight() {
        let ctx = RunContext::new();
        let slow = Step::new("slow", |ctx, _wf, _input| async move {
            tokio::select! {
                _ = ctx.cancelled() => Err(AgentError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
            }
        });
        let after = Step::new("after", |_ctx, _wf, _input| async move {
            panic!("must not launch")
        })
        .after(&["slow"]);
        let wf = Arc::new(Workflow::new("cancelled", "", vec![slow, after]).unwrap());

        let run_ctx = ctx.clone();
        let wf_clone = Arc::clone(&wf);
        let run = tokio::spawn(async move {
            wf_clone.execute(&run_ctx, AgentTask::new("")).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    /// **Scenario**: OnError fires per failed step and OnFinish once.
    #[tokio::test]
    async fn callbacks_fire_before_return() {
        let ctx = RunContext::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let finishes = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        let f = Arc::clone(&finishes);
        let wf = Workflow::new("cb", "", vec![failing_step("bad"), set_step("good")])
            .unwrap()
            .on_error(move |step, _err| {
                assert_eq!(step, "bad");
                e.fetch_add(1, Ordering::SeqCst);
            })
            .on_finish(move |_result| {
                f.fetch_add(1, Ordering::SeqCst);
            });
        let _ = wf.execute(&ctx, AgentTask::new("")).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(finishes.load(Ordering::SeqCst), 1);
    }
}
