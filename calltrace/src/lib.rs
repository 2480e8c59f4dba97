//! calltrace records which routines run, how they nest, and how long they
//! take, per thread, from inside the program being measured.
//!
//! # Bracketing calls
//!
//! Put [`Tracer::begin`] at the start of a routine and [`Tracer::end`] at
//! every exit. The tracer identifies the routine from the calling thread's
//! stack, so the calls carry no arguments.
//!
//! ```
//! use calltrace::Tracer;
//!
//! fn load(tracer: &Tracer) {
//!     tracer.begin();
//!     parse(tracer);
//!     tracer.end();
//! }
//!
//! fn parse(tracer: &Tracer) {
//!     tracer.begin();
//!     tracer.end();
//! }
//!
//! let tracer = Tracer::default();
//! load(&tracer);
//! assert_eq!(tracer.document().method_count(), 2);
//! ```
//!
//! Calls begun from inside an open call become its children. Each thread
//! gets its own subtree, and every call must be ended on the thread that
//! began it.
//!
//! # Scopes and `#[traced]`
//!
//! [`Tracer::scope`] returns a guard that ends the call when dropped, which
//! covers early returns and `?`. The `#[traced]` attribute goes one step
//! further: it wraps a function's body in a scope on the [`global`] tracer
//! and names the call at compile time, so no stack walk is needed and the
//! parameter count is known.
//!
//! ```
//! use calltrace::traced;
//!
//! #[traced]
//! fn checksum(data: &[u8], seed: u32) -> u32 {
//!     data.iter().fold(seed, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u32))
//! }
//!
//! checksum(b"abc", 7);
//! let doc = calltrace::global().document();
//! let method = &doc.threads[0].methods[0];
//! assert_eq!(method.name, "checksum");
//! assert_eq!(method.params_count, Some(2));
//! ```
//!
//! # Output
//!
//! A finished trace can be printed with [`Tracer::render_to_console`] or
//! written with [`Tracer::export_document`], by default to `ResultXML.xml`.
//! See [`document`] for both formats.
//!
//! # Timing
//!
//! Durations are whole milliseconds, truncated. A thread's time is the sum
//! of its top-level calls. Calls that are never ended keep a time of zero.
#![deny(missing_docs, clippy::unwrap_used)]

pub mod call_tree;
pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod frame;
pub mod logging;
mod tracer;

pub use calltrace_macros::traced;
pub use indextree::NodeId;

pub use crate::{
    call_tree::{CallTree, LocatorStrategy, MethodInfo, NodeKind, TraceNode},
    clock::{Clock, ManualClock, MonotonicClock, Stopwatch},
    config::TracerConfig,
    document::{
        DEFAULT_EXPORT_FILE, ExportFormat, MethodRecord, ThreadRecord, TraceDocument,
        UNKNOWN_PARAMS,
    },
    error::{DocumentError, ExportError, TraceError},
    frame::{BacktraceFrames, CallSite, FrameResolver, FrameSource, StackFrame},
    logging::init_tracing,
    tracer::{CallScope, Tracer, TracerBuilder, current_thread_id, global, install},
};
