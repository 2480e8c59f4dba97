//! # Caller identification
//!
//! Tracing calls carry no explicit context, so the tracer finds out which
//! routine is being measured by looking at the calling thread's stack. This
//! module splits that job in two:
//!
//! - a [`FrameSource`] produces the ordered list of frames for the current
//!   thread, innermost first. [`BacktraceFrames`] walks the native stack.
//! - a [`FrameResolver`] picks the nearest frame that does not belong to the
//!   engine itself.
//!
//! Routines instrumented with `#[traced]` skip both steps and hand over a
//! [`CallSite`] directly.

/// A single resolved stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Full demangled symbol, e.g. `app::jobs::Worker::run`.
    pub symbol: String,
    /// Routine name, e.g. `run`.
    pub name: String,
    /// Path of the owning module or type, e.g. `app::jobs::Worker`.
    pub module: String,
    /// Number of declared parameters, when the source knows it.
    pub param_count: Option<usize>,
}

impl StackFrame {
    /// Build a frame from a demangled symbol path.
    pub fn from_symbol(symbol: impl Into<String>) -> Self {
        let symbol = strip_symbol_hash(&symbol.into()).to_owned();
        let (module, name) = split_symbol(&symbol);
        Self {
            name: name.to_owned(),
            module: module.to_owned(),
            symbol,
            param_count: None,
        }
    }

    /// Build a frame from a module path and routine name.
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        let module = module.into();
        let name = name.into();
        let symbol = if module.is_empty() {
            name.clone()
        } else {
            format!("{module}::{name}")
        };
        Self {
            symbol,
            name,
            module,
            param_count: None,
        }
    }

    /// Attach a known parameter count.
    pub fn with_param_count(mut self, param_count: usize) -> Self {
        self.param_count = Some(param_count);
        self
    }

    /// The crate that owns this frame, i.e. the first segment of the module
    /// path. Empty for symbols without a path (C functions, runtime stubs).
    pub fn crate_name(&self) -> &str {
        crate_of(&self.module)
    }
}

/// Explicit identity for a traced routine, as emitted by `#[traced]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// Routine name.
    pub name: &'static str,
    /// Owning module path, usually `module_path!()`.
    pub module: &'static str,
    /// Number of declared parameters, excluding a `self` receiver.
    pub param_count: usize,
}

impl From<CallSite> for StackFrame {
    fn from(site: CallSite) -> Self {
        StackFrame::new(site.module, site.name).with_param_count(site.param_count)
    }
}

/// Produces the stack of the calling thread.
pub trait FrameSource: Send + Sync {
    /// Capture the current thread's frames, innermost first.
    fn capture(&self) -> Vec<StackFrame>;
}

impl<F> FrameSource for F
where
    F: Fn() -> Vec<StackFrame> + Send + Sync,
{
    fn capture(&self) -> Vec<StackFrame> {
        self()
    }
}

/// Frame source backed by the native unwinder.
///
/// Parameter counts are not present in native symbols, so every frame is
/// reported with an unknown count.
#[derive(Debug, Clone, Copy)]
pub struct BacktraceFrames {
    max_depth: usize,
}

impl BacktraceFrames {
    /// Default number of frames to walk before giving up.
    pub const DEFAULT_MAX_DEPTH: usize = 128;

    /// Create a source walking at most [`Self::DEFAULT_MAX_DEPTH`] frames.
    pub fn new() -> Self {
        Self {
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }

    /// Limit how many native frames are walked per capture.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Default for BacktraceFrames {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for BacktraceFrames {
    // Kept out of line so the capture itself always shows up as an engine frame.
    #[inline(never)]
    fn capture(&self) -> Vec<StackFrame> {
        let mut frames = Vec::new();
        let mut walked = 0usize;
        backtrace::trace(|frame| {
            backtrace::resolve_frame(frame, |symbol| {
                if let Some(name) = symbol.name() {
                    frames.push(StackFrame::from_symbol(format!("{name:#}")));
                }
            });
            walked += 1;
            walked < self.max_depth
        });
        frames
    }
}

/// Picks the nearest caller frame outside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameResolver {
    excluded_crates: Vec<String>,
}

impl FrameResolver {
    /// Crates skipped by default: the tracer and the stack walker.
    pub const DEFAULT_EXCLUDED: [&'static str; 2] = ["calltrace", "backtrace"];

    /// Create a resolver skipping exactly the given crates.
    pub fn new<I, S>(excluded_crates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_crates: excluded_crates.into_iter().map(Into::into).collect(),
        }
    }

    /// Crates this resolver skips.
    pub fn excluded_crates(&self) -> &[String] {
        &self.excluded_crates
    }

    /// Return the innermost frame that belongs neither to an excluded crate
    /// nor to a pathless symbol. `None` if no such frame exists.
    pub fn resolve_caller<'a>(&self, frames: &'a [StackFrame]) -> Option<&'a StackFrame> {
        frames.iter().find(|frame| self.qualifies(frame))
    }

    fn qualifies(&self, frame: &StackFrame) -> bool {
        let crate_name = frame.crate_name();
        !crate_name.is_empty() && !self.excluded_crates.iter().any(|c| c == crate_name)
    }
}

impl Default for FrameResolver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_EXCLUDED)
    }
}

/// Split `a::b::C::f` into (`a::b::C`, `f`), ignoring `::` nested inside
/// generic brackets. Closure and const markers stay attached to the routine
/// they belong to: `a::main::{{closure}}` becomes (`a`, `main::{{closure}}`).
fn split_symbol(symbol: &str) -> (&str, &str) {
    let mut split_at = None;
    let mut depth = 0usize;
    let bytes = symbol.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                split_at = Some(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }

    let Some(mut at) = split_at else {
        return ("", symbol);
    };
    // Pull `{{closure}}`-style segments onto the routine name.
    while symbol[at + 2..].starts_with("{{") {
        match segment_start(symbol, at) {
            Some(prev) => at = prev,
            None => break,
        }
    }
    (&symbol[..at], &symbol[at + 2..])
}

/// Position of the depth-0 `::` preceding the one at `before`, if any.
fn segment_start(symbol: &str, before: usize) -> Option<usize> {
    let head = &symbol[..before];
    let mut depth = 0usize;
    let bytes = head.as_bytes();
    let mut i = bytes.len();
    while i > 1 {
        i -= 1;
        match bytes[i] {
            b'>' => depth += 1,
            b'<' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes[i - 1] == b':' => return Some(i - 1),
            _ => {}
        }
    }
    None
}

fn crate_of(path: &str) -> &str {
    let path = path.trim_start_matches(['<', '&', '*']);
    let path = path.strip_prefix("mut ").unwrap_or(path);
    let end = path
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(path.len());
    &path[..end]
}

/// Drop a trailing legacy mangling hash (`::h0123456789abcdef`).
fn strip_symbol_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::h") {
        Some((head, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
            head
        }
        _ => symbol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_paths() {
        let frame = StackFrame::from_symbol("app::jobs::Worker::run");
        assert_eq!(frame.module, "app::jobs::Worker");
        assert_eq!(frame.name, "run");
        assert_eq!(frame.crate_name(), "app");
        assert_eq!(frame.param_count, None);
    }

    #[test]
    fn keeps_generic_paths_together() {
        let frame = StackFrame::from_symbol(
            "<calltrace::frame::BacktraceFrames as calltrace::frame::FrameSource>::capture",
        );
        assert_eq!(
            frame.module,
            "<calltrace::frame::BacktraceFrames as calltrace::frame::FrameSource>"
        );
        assert_eq!(frame.name, "capture");
        assert_eq!(frame.crate_name(), "calltrace");
    }

    #[test]
    fn closures_stay_with_their_routine() {
        let frame = StackFrame::from_symbol("demo::main::{{closure}}::{{closure}}");
        assert_eq!(frame.module, "demo");
        assert_eq!(frame.name, "main::{{closure}}::{{closure}}");
    }

    #[test]
    fn strips_legacy_hash() {
        let frame = StackFrame::from_symbol("demo::work::h0123456789abcdef");
        assert_eq!(frame.symbol, "demo::work");
        assert_eq!(frame.name, "work");
    }

    #[test]
    fn pathless_symbols_have_no_crate() {
        let frame = StackFrame::from_symbol("__libc_start_main");
        assert_eq!(frame.module, "");
        assert_eq!(frame.crate_name(), "");
    }

    #[test]
    fn resolver_skips_engine_and_pathless_frames() {
        let frames = vec![
            StackFrame::from_symbol("backtrace::backtrace::trace"),
            StackFrame::from_symbol("calltrace::tracer::Tracer::begin"),
            StackFrame::from_symbol("_start_thread"),
            StackFrame::new("app::jobs", "run").with_param_count(2),
            StackFrame::new("app", "main"),
        ];
        let resolver = FrameResolver::default();
        let caller = resolver.resolve_caller(&frames).map(|f| f.name.as_str());
        assert_eq!(caller, Some("run"));
    }

    #[test]
    fn resolver_reports_missing_caller() {
        let frames = vec![StackFrame::from_symbol("calltrace::tracer::Tracer::begin")];
        assert!(FrameResolver::default().resolve_caller(&frames).is_none());
        assert!(FrameResolver::default().resolve_caller(&[]).is_none());
    }

    #[test]
    fn call_site_converts_into_frame() {
        let frame = StackFrame::from(CallSite {
            name: "load",
            module: "app::store",
            param_count: 3,
        });
        assert_eq!(frame.symbol, "app::store::load");
        assert_eq!(frame.param_count, Some(3));
    }

    #[test]
    fn closures_are_frame_sources() {
        let source = || vec![StackFrame::new("app", "main")];
        assert_eq!(source.capture().len(), 1);
    }
}
