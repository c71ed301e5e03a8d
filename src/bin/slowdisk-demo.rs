//! slowdisk demo
//!
//! Builds a dispatch table in a read-only page, loads the interceptor into
//! it, and pushes read/write calls through a pipe via the table.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: [500, 1000] iterations per call
//! cargo run --bin slowdisk-demo
//!
//! # Insmod-style parameters, JSON report
//! cargo run --bin slowdisk-demo -- --param minWait=10000 --param maxWait=0x8000 --json
//!
//! # Plant a wrong anchor to see the load rejected
//! cargo run --bin slowdisk-demo -- --no-anchor; echo "exit: $?"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use libc::{c_char, c_long, c_uint, c_void, size_t};
use parking_lot::Mutex;
use serde::Serialize;
use slowdisk::prelude::*;
use slowdisk_core::{MODULE_INFO, ModuleInfo, PARAMETERS};
use slowdisk_table::handler_addr;

/// Inject CPU-cycle delays into read and write dispatched through a table.
#[derive(Parser, Debug)]
#[command(name = "slowdisk-demo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Minimum busy-loop iterations per call (overrides --param and --config)
    #[arg(long)]
    min_wait: Option<u64>,

    /// Maximum busy-loop iterations per call (overrides --param and --config)
    #[arg(long)]
    max_wait: Option<u64>,

    /// Startup parameter as name=value (minWait, maxWait)
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// TOML file with min_wait / max_wait
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of write+read pairs to dispatch
    #[arg(short = 'n', long, default_value_t = 8)]
    calls: usize,

    /// Seed for reproducible delays
    #[arg(long)]
    seed: Option<u64>,

    /// Plant a wrong anchor so the table cannot be located
    #[arg(long)]
    no_anchor: bool,

    /// Emit the report as JSON
    #[arg(long)]
    json: bool,

    /// List the startup parameters and exit
    #[arg(long)]
    list_params: bool,
}

unsafe extern "C" fn demo_read(fd: c_uint, buf: *const c_char, count: size_t) -> c_long {
    // SAFETY: callers pass a writable buffer of `count` bytes.
    unsafe { libc::read(fd as i32, buf.cast_mut().cast::<c_void>(), count) as c_long }
}

unsafe extern "C" fn demo_write(fd: c_uint, buf: *const c_char, count: size_t) -> c_long {
    // SAFETY: callers pass a readable buffer of `count` bytes.
    unsafe { libc::write(fd as i32, buf.cast::<c_void>(), count) as c_long }
}

unsafe extern "C" fn demo_close(fd: c_uint, _buf: *const c_char, _count: size_t) -> c_long {
    // SAFETY: closing a descriptor number has no memory-safety preconditions.
    c_long::from(unsafe { libc::close(fd as i32) })
}

/// Wraps an entropy source and keeps every value drawn.
struct Recorder {
    inner: Arc<dyn EntropySource>,
    drawn: Mutex<Vec<u64>>,
}

impl EntropySource for Recorder {
    fn next_u64(&self) -> u64 {
        let value = self.inner.next_u64();
        self.drawn.lock().push(value);
        value
    }
}

#[derive(Debug, Serialize)]
struct CallRecord {
    op: &'static str,
    result: i64,
    iterations: u64,
    elapsed_ns: u128,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    module: ModuleInfo,
    load: LoadReport,
    calls: Vec<CallRecord>,
    restored_clean: Option<bool>,
}

fn layout() -> Result<TableLayout> {
    #[cfg(target_os = "linux")]
    {
        Ok(TableLayout::native())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(TableLayout::new(0, 1, 3)?)
    }
}

fn load_config(cli: &Cli) -> Result<DelayConfig> {
    let mut config = match &cli.config {
        Some(path) => DelayConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DelayConfig::default(),
    };
    if !cli.params.is_empty() {
        let given = DelayConfig::from_params(&cli.params)?;
        for param in &cli.params {
            match param.split_once('=').map(|(name, _)| name) {
                Some("minWait" | "min_wait") => config.min_wait = given.min_wait,
                Some("maxWait" | "max_wait") => config.max_wait = given.max_wait,
                _ => {}
            }
        }
    }
    if let Some(min) = cli.min_wait {
        config.min_wait = min;
    }
    if let Some(max) = cli.max_wait {
        config.max_wait = max;
    }
    Ok(config)
}

fn list_params() {
    println!("{} {} ({})", MODULE_INFO.name, MODULE_INFO.version, MODULE_INFO.license);
    println!("{}\n", MODULE_INFO.description);
    for param in PARAMETERS {
        println!("  {:<8} {:<6} {}", param.name, param.default, param.description);
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli)?;
    let layout = layout()?;

    let anchor_value = handler_addr(demo_close);
    let mut entries = vec![0usize; layout.slot_count()];
    entries[layout.read()] = handler_addr(demo_read);
    entries[layout.write()] = handler_addr(demo_write);
    entries[layout.anchor()] = if cli.no_anchor {
        anchor_value ^ 0x10
    } else {
        anchor_value
    };
    let page = PageTable::new(16, &entries).context("mapping dispatch table")?;

    let base: Arc<dyn EntropySource> = match cli.seed {
        Some(seed) => Arc::new(SeededEntropy::new(seed)),
        None => Arc::new(OsEntropy),
    };
    let recorder = Arc::new(Recorder {
        inner: base,
        drawn: Mutex::new(Vec::new()),
    });

    let scan = AnchorScan::with_layout(page.region(), &layout, anchor_value);
    // SAFETY: `page` holds every slot of `layout`, its read and write entries
    // are RwHandlers, PageProtect can make it writable, and it outlives the
    // controller.
    let mut controller = unsafe {
        Controller::builder(scan, PageProtect::new())
            .config(config)
            .layout(layout)
            .entropy(recorder.clone())
            .build()
    }?;

    let report = match controller.load() {
        Ok(report) => report,
        Err(e) => {
            eprintln!("load rejected: {e}");
            let status = u8::try_from(e.status_code().unsigned_abs()).unwrap_or(1);
            return Ok(ExitCode::from(status));
        }
    };
    if !cli.json {
        println!("loaded: {report}");
    }

    let mut fds = [0i32; 2];
    // SAFETY: `fds` has room for both descriptors.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        bail!("pipe: {}", std::io::Error::last_os_error());
    }
    let [rfd, wfd] = fds;

    let mut calls = Vec::with_capacity(cli.calls * 2);
    let payload = b"slowdisk";
    let mut buf = [0u8; 64];
    for i in 0..cli.calls {
        for (op, slot) in [("write", layout.write()), ("read", layout.read())] {
            // SAFETY: slots hold RwHandlers for the controller's whole life.
            let Some(handler) = (unsafe { page.handler(slot) }) else {
                bail!("slot {slot} is empty");
            };
            let start = Instant::now();
            // SAFETY: both buffers are valid for the lengths passed.
            let result = unsafe {
                match op {
                    "write" => handler(wfd as c_uint, payload.as_ptr().cast(), payload.len()),
                    _ => handler(rfd as c_uint, buf.as_mut_ptr().cast(), buf.len()),
                }
            };
            let elapsed = start.elapsed();
            let raw = recorder.drawn.lock().get(calls.len()).copied().unwrap_or_default();
            let record = CallRecord {
                op,
                result: i64::from(result),
                iterations: report.range.sample(raw),
                elapsed_ns: elapsed.as_nanos(),
            };
            if !cli.json {
                println!(
                    "  #{i:<3} {:<5} -> {:>3}  {:>7} iterations  {:?}",
                    record.op,
                    record.result,
                    record.iterations,
                    Duration::from_nanos(u64::try_from(record.elapsed_ns).unwrap_or(u64::MAX))
                );
            }
            calls.push(record);
        }
    }

    // SAFETY: closing the descriptors we opened.
    unsafe {
        libc::close(rfd);
        libc::close(wfd);
    }

    let outcome = controller.unload();
    let restored_clean = outcome.as_ref().map(RestoreOutcome::is_clean);

    if cli.json {
        let out = DemoReport {
            module: MODULE_INFO,
            load: report,
            calls,
            restored_clean,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        match restored_clean {
            Some(true) => println!("unloaded: original handlers restored"),
            Some(false) => println!("unloaded: some slots were re-patched by another agent"),
            None => println!("unload did not complete, see log"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.list_params {
        list_params();
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
