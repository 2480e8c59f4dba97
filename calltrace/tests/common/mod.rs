#![allow(dead_code)]

use std::cell::Cell;

use calltrace::{ManualClock, StackFrame, Tracer, TracerConfig};

thread_local! {
    static CALLER: Cell<&'static str> = const { Cell::new("") };
}

pub const MODULE: &str = "app::jobs";

/// Frames as a native walk would report them: engine frames first, then the
/// routine named by the last [`call`] on this thread.
pub fn scripted_frames() -> Vec<StackFrame> {
    let caller = CALLER.with(Cell::get);
    vec![
        StackFrame::from_symbol("backtrace::backtrace::libunwind::trace"),
        StackFrame::from_symbol(
            "<calltrace::frame::BacktraceFrames as calltrace::frame::FrameSource>::capture",
        ),
        StackFrame::from_symbol("calltrace::tracer::Tracer::try_begin"),
        StackFrame::from_symbol("calltrace::tracer::Tracer::begin"),
        StackFrame::new(MODULE, caller),
        StackFrame::from_symbol("std::rt::lang_start_internal"),
    ]
}

pub fn tracer(clock: &ManualClock) -> Tracer {
    tracer_with(clock, TracerConfig::default())
}

pub fn tracer_with(clock: &ManualClock, config: TracerConfig) -> Tracer {
    Tracer::builder()
        .config(config)
        .clock(clock.clone())
        .frames(scripted_frames)
        .build()
}

/// Trace `body` as a call of `name` on the current thread.
pub fn call<R>(tracer: &Tracer, name: &'static str, body: impl FnOnce() -> R) -> R {
    CALLER.with(|caller| caller.set(name));
    tracer.begin();
    let out = body();
    tracer.end();
    out
}
