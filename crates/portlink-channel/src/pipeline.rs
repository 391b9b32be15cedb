//! Ordered, inspectable, skippable pipeline of context transforms.
//!
//! Each stage is an explicit `{ name, lifecycle, run }` struct. The context
//! carries a minimum-lifecycle gate: stages tagged below the gate are
//! skipped. A stage that raises the gate to [`Lifecycle::Aborted`] halts the
//! remaining stages; the pipeline records the halting stage's name so the
//! context can later be resumed from the stage immediately after it.

use crate::error::{ChannelError, Result};

/// Ordered lifecycle values for pipeline stages.
///
/// `Aborted` is the terminal sentinel: every real stage sits below it, so a
/// context gated at `Aborted` skips everything until resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Initial,
    Prepare,
    Transform,
    DataOperation,
    Send,
    Aborted,
}

/// Pipeline contexts expose their gate and halt bookkeeping.
pub trait GatedContext {
    fn min_lifecycle(&self) -> Lifecycle;
    fn set_min_lifecycle(&mut self, gate: Lifecycle);
    fn halted_at(&self) -> Option<&'static str>;
    fn set_halted_at(&mut self, stage: Option<&'static str>);
}

/// A single named transform in a pipeline.
pub struct Stage<C> {
    name: &'static str,
    lifecycle: Lifecycle,
    run: Box<dyn Fn(C) -> Result<C> + Send + Sync>,
}

impl<C> Stage<C> {
    pub fn new(
        name: &'static str,
        lifecycle: Lifecycle,
        run: impl Fn(C) -> Result<C> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            lifecycle,
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }
}

impl<C> std::fmt::Debug for Stage<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

/// An ordered list of stages folded over a context.
pub struct Pipeline<C> {
    stages: Vec<Stage<C>>,
}

impl<C: GatedContext> Pipeline<C> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage at the end.
    pub fn push(&mut self, stage: Stage<C>) {
        self.stages.push(stage);
    }

    /// Insert a stage immediately before the named stage.
    ///
    /// Returns `false` (and appends at the end) when the name is unknown.
    pub fn insert_before(&mut self, name: &str, stage: Stage<C>) -> bool {
        match self.stages.iter().position(|s| s.name == name) {
            Some(pos) => {
                self.stages.insert(pos, stage);
                true
            }
            None => {
                self.stages.push(stage);
                false
            }
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    /// Fold the context through every stage from the start.
    pub fn run(&self, ctx: C) -> Result<C> {
        self.run_from(0, ctx)
    }

    /// Re-enter the pipeline after the stage that halted this context.
    ///
    /// Stages completed before the halt are never re-run: no double send, no
    /// duplicate sequence-id allocation.
    pub fn resume(&self, mut ctx: C) -> Result<C> {
        let Some(halted) = ctx.halted_at() else {
            return self.run(ctx);
        };
        let Some(pos) = self.stages.iter().position(|s| s.name == halted) else {
            return Err(ChannelError::Malformed(format!(
                "cannot resume: unknown stage '{halted}'"
            )));
        };

        ctx.set_halted_at(None);
        ctx.set_min_lifecycle(Lifecycle::Initial);
        self.run_from(pos + 1, ctx)
    }

    fn run_from(&self, start: usize, mut ctx: C) -> Result<C> {
        for stage in &self.stages[start..] {
            if stage.lifecycle < ctx.min_lifecycle() {
                continue;
            }
            ctx = (stage.run)(ctx)?;
            if ctx.min_lifecycle() == Lifecycle::Aborted && ctx.halted_at().is_none() {
                ctx.set_halted_at(Some(stage.name));
            }
        }
        Ok(ctx)
    }
}

impl<C: GatedContext> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct TestCtx {
        trace: Vec<&'static str>,
        gate: Option<Lifecycle>,
        min: Option<Lifecycle>,
        halted: Option<&'static str>,
    }

    impl GatedContext for TestCtx {
        fn min_lifecycle(&self) -> Lifecycle {
            self.min.unwrap_or(Lifecycle::Initial)
        }

        fn set_min_lifecycle(&mut self, gate: Lifecycle) {
            self.min = Some(gate);
        }

        fn halted_at(&self) -> Option<&'static str> {
            self.halted
        }

        fn set_halted_at(&mut self, stage: Option<&'static str>) {
            self.halted = stage;
        }
    }

    fn tracing_stage(name: &'static str, lifecycle: Lifecycle) -> Stage<TestCtx> {
        Stage::new(name, lifecycle, move |mut ctx: TestCtx| {
            ctx.trace.push(name);
            if ctx.gate == Some(lifecycle) {
                ctx.gate = None;
                ctx.set_min_lifecycle(Lifecycle::Aborted);
            }
            Ok(ctx)
        })
    }

    fn pipeline() -> Pipeline<TestCtx> {
        let mut p = Pipeline::new();
        p.push(tracing_stage("prepare", Lifecycle::Prepare));
        p.push(tracing_stage("transform", Lifecycle::Transform));
        p.push(tracing_stage("serialize", Lifecycle::DataOperation));
        p.push(tracing_stage("send", Lifecycle::Send));
        p
    }

    #[test]
    fn runs_all_stages_in_order() {
        let out = pipeline().run(TestCtx::default()).unwrap();
        assert_eq!(out.trace, vec!["prepare", "transform", "serialize", "send"]);
        assert!(out.halted_at().is_none());
    }

    #[test]
    fn aborted_gate_halts_downstream_stages() {
        let ctx = TestCtx {
            gate: Some(Lifecycle::Transform),
            ..TestCtx::default()
        };

        let out = pipeline().run(ctx).unwrap();
        assert_eq!(out.trace, vec!["prepare", "transform"]);
        assert_eq!(out.halted_at(), Some("transform"));
    }

    #[test]
    fn resume_skips_completed_stages() {
        let ctx = TestCtx {
            gate: Some(Lifecycle::Transform),
            ..TestCtx::default()
        };

        let p = pipeline();
        let halted = p.run(ctx).unwrap();
        let resumed = p.resume(halted).unwrap();

        // prepare and transform must not run twice
        assert_eq!(
            resumed.trace,
            vec!["prepare", "transform", "serialize", "send"]
        );
        assert!(resumed.halted_at().is_none());
    }

    #[test]
    fn resume_without_halt_runs_from_start() {
        let out = pipeline().resume(TestCtx::default()).unwrap();
        assert_eq!(out.trace.len(), 4);
    }

    #[test]
    fn resume_with_unknown_stage_fails() {
        let ctx = TestCtx {
            halted: Some("ghost"),
            ..TestCtx::default()
        };
        assert!(matches!(
            pipeline().resume(ctx),
            Err(ChannelError::Malformed(_))
        ));
    }

    #[test]
    fn min_lifecycle_skips_lower_stages() {
        let ctx = TestCtx {
            min: Some(Lifecycle::DataOperation),
            ..TestCtx::default()
        };

        let out = pipeline().run(ctx).unwrap();
        assert_eq!(out.trace, vec!["serialize", "send"]);
    }

    #[test]
    fn insert_before_places_stage_ahead_of_target() {
        let mut p = pipeline();
        assert!(p.insert_before("send", tracing_stage("audit", Lifecycle::DataOperation)));
        assert_eq!(
            p.stage_names(),
            vec!["prepare", "transform", "serialize", "audit", "send"]
        );

        assert!(!p.insert_before("ghost", tracing_stage("tail", Lifecycle::Send)));
        assert_eq!(p.stage_names().last(), Some(&"tail"));
    }

    #[test]
    fn lifecycle_ordering_is_total() {
        assert!(Lifecycle::Initial < Lifecycle::Prepare);
        assert!(Lifecycle::Prepare < Lifecycle::Transform);
        assert!(Lifecycle::Transform < Lifecycle::DataOperation);
        assert!(Lifecycle::DataOperation < Lifecycle::Send);
        assert!(Lifecycle::Send < Lifecycle::Aborted);
    }
}
