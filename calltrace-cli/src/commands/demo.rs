//! The demo workload: one traced region on the main thread that calls a
//! nested routine, the same routine on worker threads, and the routine again
//! after a pause.

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use calltrace::{ExportFormat, LocatorStrategy, Tracer, TracerConfig, traced};

use crate::output;

/// How long the main thread waits for workers, in workload delays.
const PAUSE_FACTOR: u32 = 10;

pub struct Options {
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub format: Option<ExportFormat>,
    pub locator: Option<LocatorStrategy>,
    pub delay: Duration,
    pub threads: usize,
}

/// Read tracer settings from a TOML file, or use the defaults.
pub fn load_config(path: Option<&Path>) -> Result<TracerConfig> {
    let Some(path) = path else {
        return Ok(TracerConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid tracer config at {}", path.display()))
}

/// Apply command line overrides on top of the loaded configuration.
fn apply_overrides(mut config: TracerConfig, options: &Options) -> TracerConfig {
    if let Some(output) = &options.output {
        if options.format.is_none() {
            config.export_format = ExportFormat::from_path(output);
        }
        config.output_path = output.clone();
    }
    if let Some(format) = options.format {
        config.export_format = format;
    }
    if let Some(locator) = options.locator {
        config.locator = locator;
    }
    config
}

pub fn execute(options: Options) -> Result<()> {
    let config = apply_overrides(load_config(options.config.as_deref())?, &options);
    let tracer = calltrace::install(Tracer::new(config))
        .map_err(|_| anyhow!("a global tracer is already installed"))?;

    if options.threads == 0 {
        output::warn("no worker threads, only the main thread will be traced");
    }
    output::status(
        "Tracing",
        format!(
            "{} worker thread(s), {} ms per call",
            options.threads,
            options.delay.as_millis()
        ),
    );
    let started = Instant::now();
    run(tracer, options.delay, options.threads)?;
    output::status("Finished", output::format_duration(started.elapsed()));

    tracer.render_to_console();
    let written = tracer.export_document(None)?;
    output::status("Exported", written.display().to_string());
    Ok(())
}

#[inline(never)]
fn run(tracer: &'static Tracer, delay: Duration, threads: usize) -> Result<()> {
    tracer.begin();
    some_func(tracer, delay);

    let workers: Vec<_> = (0..threads)
        .map(|_| thread::spawn(move || some_func(tracer, delay)))
        .collect();
    thread::sleep(delay * PAUSE_FACTOR);

    some_func(tracer, delay);
    tracer.end();

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow!("workload thread panicked"))?;
    }
    Ok(())
}

#[inline(never)]
fn some_func(tracer: &Tracer, delay: Duration) {
    tracer.begin();
    thread::sleep(delay);
    any_func(delay);
    tracer.end();
}

#[traced]
fn any_func(delay: Duration) {
    thread::sleep(delay);
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn options() -> Options {
        Options {
            config: None,
            output: None,
            format: None,
            locator: None,
            delay: Duration::ZERO,
            threads: 1,
        }
    }

    #[test]
    fn config_file_is_overridden_by_flags() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create config file");
        writeln!(file, "locator = \"tree-scan\"\noutput_path = \"from-config.xml\"")
            .expect("write config");

        let loaded = load_config(Some(file.path())).expect("valid config");
        assert_eq!(loaded.locator, LocatorStrategy::TreeScan);

        let config = apply_overrides(
            loaded,
            &Options {
                output: Some(PathBuf::from("out/trace.json")),
                ..options()
            },
        );
        assert_eq!(config.output_path, PathBuf::from("out/trace.json"));
        assert_eq!(config.export_format, ExportFormat::Json);
        assert_eq!(config.locator, LocatorStrategy::TreeScan);
    }

    #[test]
    fn explicit_format_wins_over_extension() {
        let config = apply_overrides(
            TracerConfig::default(),
            &Options {
                output: Some(PathBuf::from("trace.json")),
                format: Some(ExportFormat::Xml),
                locator: Some(LocatorStrategy::CallStack),
                ..options()
            },
        );
        assert_eq!(config.export_format, ExportFormat::Xml);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/calltrace.toml")))
            .expect_err("file does not exist");
        assert!(err.to_string().contains("failed to read config"));
    }
}
