//! # Tracer
//!
//! The facade that instrumented code talks to. A region is traced by calling
//! [`Tracer::begin`] at its start and [`Tracer::end`] at its end, on the same
//! thread; the tracer works out which routine the region belongs to from the
//! calling thread's stack.
//!
//! ```
//! use calltrace::Tracer;
//!
//! fn work(tracer: &Tracer) {
//!     tracer.begin();
//!     // ...
//!     tracer.end();
//! }
//!
//! let tracer = Tracer::default();
//! work(&tracer);
//! tracer.render_to_console();
//! ```
//!
//! `begin` and `end` never fail visibly: anything that goes wrong is logged
//! and the call is dropped from the trace, so instrumentation cannot break
//! the program being measured. [`Tracer::try_begin`] and [`Tracer::try_end`]
//! report the same failures as values.
//!
//! All tree lookups and mutations, and every clock read, happen under one
//! lock. Time spent waiting for that lock is part of the measured durations.
//! Stack capture happens before the lock is taken.

use std::{
    fmt,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

use indextree::NodeId;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    call_tree::{CallTree, MethodInfo},
    clock::{Clock, MonotonicClock},
    config::TracerConfig,
    document::{ExportFormat, TraceDocument},
    error::{ExportError, TraceError},
    frame::{BacktraceFrames, CallSite, FrameResolver, FrameSource, StackFrame},
};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
static GLOBAL: OnceLock<Tracer> = OnceLock::new();

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Id of the calling thread as it appears in traces. Assigned on first use,
/// starting at 1, and stable for the thread's lifetime.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// The process-wide tracer used by `#[traced]`. Created with the default
/// configuration on first use unless [`install`] ran earlier.
pub fn global() -> &'static Tracer {
    GLOBAL.get_or_init(Tracer::default)
}

/// Make `tracer` the process-wide tracer. Fails, handing the tracer back, if
/// one is already in place.
pub fn install(tracer: Tracer) -> Result<&'static Tracer, Tracer> {
    GLOBAL.set(tracer)?;
    Ok(global())
}

/// Records a tree of timed calls per thread.
pub struct Tracer {
    tree: Mutex<CallTree>,
    clock: Box<dyn Clock>,
    frames: Box<dyn FrameSource>,
    resolver: FrameResolver,
    config: TracerConfig,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(TracerConfig::default())
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Tracer {
    /// Create a tracer reading the native stack and the monotonic clock.
    pub fn new(config: TracerConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Start building a tracer with custom collaborators.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    /// The configuration this tracer was built with.
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Begin a call attributed to the nearest caller outside the tracer.
    ///
    /// If no caller can be identified, nothing is recorded and a warning is
    /// logged. A later [`end`](Self::end) on this thread then closes whatever
    /// call was already open.
    #[inline(never)]
    pub fn begin(&self) {
        if let Err(err) = self.try_begin() {
            warn!(thread_id = current_thread_id(), "begin ignored: {err}");
        }
    }

    /// Like [`begin`](Self::begin), but reports failure to the caller.
    #[inline(never)]
    pub fn try_begin(&self) -> Result<NodeId, TraceError> {
        let frames = self.frames.capture();
        let caller = self
            .resolver
            .resolve_caller(&frames)
            .ok_or(TraceError::UnresolvedCaller)?;
        Ok(self.open(MethodInfo::from(caller)))
    }

    /// Begin a call with an explicit identity instead of inspecting the stack.
    pub fn begin_at(&self, site: CallSite) -> NodeId {
        self.open(MethodInfo::from(&StackFrame::from(site)))
    }

    fn open(&self, info: MethodInfo) -> NodeId {
        let thread_id = current_thread_id();
        let mut tree = self.tree.lock();
        debug!(thread_id, name = %info.name, module = %info.module, "begin call");
        tree.begin_call(thread_id, info, self.clock.as_ref())
    }

    /// End the call currently open on this thread.
    ///
    /// An `end` with no open call is logged and otherwise ignored.
    pub fn end(&self) {
        if let Err(err) = self.try_end() {
            warn!(thread_id = current_thread_id(), "end ignored: {err}");
        }
    }

    /// Like [`end`](Self::end), but reports failure to the caller. Returns
    /// the closed call's elapsed milliseconds.
    pub fn try_end(&self) -> Result<u64, TraceError> {
        let thread_id = current_thread_id();
        let mut tree = self.tree.lock();
        let id = tree.end_call(thread_id, self.clock.as_ref())?;
        let elapsed_ms = tree.get(id).map(|node| node.elapsed_ms()).unwrap_or(0);
        debug!(thread_id, elapsed_ms, "end call");
        Ok(elapsed_ms)
    }

    /// Begin a call that ends when the returned guard is dropped.
    ///
    /// If the begin fails, dropping the guard does nothing, so it never
    /// closes a call it did not open.
    #[inline(never)]
    pub fn scope(&self) -> CallScope<'_> {
        let active = match self.try_begin() {
            Ok(_) => true,
            Err(err) => {
                warn!(thread_id = current_thread_id(), "scope ignored: {err}");
                false
            }
        };
        CallScope {
            tracer: self,
            active,
        }
    }

    /// Begin a call with an explicit identity that ends when the guard drops.
    pub fn scope_at(&self, site: CallSite) -> CallScope<'_> {
        self.begin_at(site);
        CallScope {
            tracer: self,
            active: true,
        }
    }

    /// Run `f` with read access to the call tree.
    ///
    /// The tracer's lock is held while `f` runs and is not reentrant: `f`
    /// must not call back into this tracer (`begin`, `end`, `document`,
    /// exports, or another `with_tree`), or it deadlocks. Take a
    /// [`document`](Self::document) snapshot instead when that is needed.
    pub fn with_tree<R>(&self, f: impl FnOnce(&CallTree) -> R) -> R {
        f(&self.tree.lock())
    }

    /// Snapshot of everything recorded so far.
    pub fn document(&self) -> TraceDocument {
        self.tree.lock().to_document()
    }

    /// Write the console form of the trace to `out`.
    pub fn render_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.document().render_console(out)
    }

    /// Print the console form of the trace to stdout.
    ///
    /// Call this once tracing has finished; calls still open show a time of
    /// zero.
    pub fn render_to_console(&self) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(err) = self.render_to(&mut out) {
            error!("failed to print trace: {err}");
        }
    }

    /// Write the trace to `path`, or to the configured output path, in the
    /// configured format.
    pub fn export_document(&self, path: Option<&Path>) -> Result<PathBuf, ExportError> {
        let path = path.unwrap_or(&self.config.output_path);
        self.export_as(path, self.config.export_format)
    }

    /// Write the trace to `path` in `format`.
    pub fn export_as(&self, path: &Path, format: ExportFormat) -> Result<PathBuf, ExportError> {
        match self.document().save(path, format) {
            Ok(written) => {
                info!("trace written to {}", written.display());
                Ok(written)
            }
            Err(err) => {
                error!("{err}");
                Err(err)
            }
        }
    }
}

/// Builder for [`Tracer`].
#[derive(Default)]
pub struct TracerBuilder {
    config: TracerConfig,
    clock: Option<Box<dyn Clock>>,
    frames: Option<Box<dyn FrameSource>>,
}

impl TracerBuilder {
    /// Use `config` instead of the default configuration.
    pub fn config(mut self, config: TracerConfig) -> Self {
        self.config = config;
        self
    }

    /// Read time from `clock` instead of [`MonotonicClock`].
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Capture stacks with `frames` instead of [`BacktraceFrames`].
    pub fn frames(mut self, frames: impl FrameSource + 'static) -> Self {
        self.frames = Some(Box::new(frames));
        self
    }

    /// Finish building.
    pub fn build(self) -> Tracer {
        let TracerBuilder {
            config,
            clock,
            frames,
        } = self;
        info!(locator = ?config.locator, "tracer started");
        Tracer {
            tree: Mutex::new(CallTree::new(config.locator)),
            clock: clock.unwrap_or_else(|| Box::new(MonotonicClock::new())),
            frames: frames.unwrap_or_else(|| Box::new(BacktraceFrames::new())),
            resolver: config.resolver(),
            config,
        }
    }
}

/// Guard returned by [`Tracer::scope`]; ends its call on drop.
#[must_use = "the call ends as soon as the scope is dropped"]
pub struct CallScope<'a> {
    tracer: &'a Tracer,
    active: bool,
}

impl CallScope<'_> {
    /// Whether this scope opened a call.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// End the call now. Usually you rely on `Drop` instead.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.active {
            self.active = false;
            self.tracer.end();
        }
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;
    use crate::clock::ManualClock;

    fn scripted(name: &'static str) -> impl FrameSource {
        move || {
            vec![
                StackFrame::from_symbol("calltrace::tracer::Tracer::begin"),
                StackFrame::new("app", name).with_param_count(0),
            ]
        }
    }

    #[test]
    fn thread_ids_differ_between_threads() {
        let here = current_thread_id();
        assert_eq!(here, current_thread_id());
        let there = thread::spawn(current_thread_id)
            .join()
            .expect("thread joins");
        assert_ne!(here, there);
        assert!(here >= 1 && there >= 1);
    }

    #[test]
    fn unresolved_begin_records_nothing() {
        let tracer = Tracer::builder()
            .frames(|| vec![StackFrame::from_symbol("calltrace::tracer::Tracer::begin")])
            .build();
        assert_eq!(tracer.try_begin(), Err(TraceError::UnresolvedCaller));
        tracer.begin();
        assert!(tracer.document().threads.is_empty());
    }

    #[test]
    fn scope_ends_its_call_on_drop() {
        let clock = ManualClock::new();
        let tracer = Tracer::builder()
            .clock(clock.clone())
            .frames(scripted("guarded"))
            .build();
        {
            let scope = tracer.scope();
            assert!(scope.is_active());
            clock.advance(Duration::from_millis(12));
        }
        let doc = tracer.document();
        let method = &doc.threads[0].methods[0];
        assert_eq!(method.name, "guarded");
        assert_eq!(method.time_ms, 12);
        assert_eq!(tracer.try_end(), Err(TraceError::UnmatchedEnd {
            thread_id: current_thread_id()
        }));
    }

    #[test]
    fn failed_scope_does_not_close_outer_call() {
        let clock = ManualClock::new();
        let tracer = Tracer::builder()
            .clock(clock.clone())
            .frames(Vec::<StackFrame>::new)
            .build();
        tracer.begin_at(CallSite {
            name: "outer",
            module: "app",
            param_count: 2,
        });
        {
            let scope = tracer.scope();
            assert!(!scope.is_active());
        }
        let doc = tracer.document();
        assert_eq!(doc.threads[0].methods[0].params_count, Some(2));
        assert!(tracer.with_tree(|tree| tree.open_call(current_thread_id()).is_some()));
        clock.advance(Duration::from_millis(1));
        assert_eq!(tracer.try_end(), Ok(1));
    }

    #[test]
    fn tree_lock_is_released_after_with_tree() {
        let clock = ManualClock::new();
        let tracer = Tracer::builder()
            .clock(clock.clone())
            .frames(scripted("inspected"))
            .build();
        tracer.begin();

        let open = tracer.with_tree(|tree| tree.open_call(current_thread_id()));
        assert!(open.is_some());

        clock.advance(Duration::from_millis(3));
        tracer.end();
        assert_eq!(tracer.document().threads[0].methods[0].time_ms, 3);
        assert!(tracer.with_tree(|tree| tree.open_call(current_thread_id()).is_none()));
    }
}
