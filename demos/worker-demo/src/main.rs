use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use tcd_core::{
    EventLoop, InstanceGuard, LogFaults, RunnerConfig, Subscribe, TaskRunner, WorkContext,
    WorkResult, default_lock_path, install_panic_hook,
};
use tcd_exec::{ProcConfig, submit_command};
use tcd_model::{Progress, TaskQuery};
use tcd_observe::{Journal, LoggerConfig, LoggerFormat, logger_init};
use tcd_prometheus::PrometheusMetrics;

const STEPS: u64 = 10;

fn count(ctx: WorkContext) -> WorkResult<u64> {
    for step in 1..=STEPS {
        ctx.check_cancelled()?;
        thread::sleep(Duration::from_millis(300));
        ctx.report(Progress::of(step, STEPS).with_message(format!("step {step}")));
    }
    Ok(STEPS)
}

// Usage: worker-demo [program [args...]]
//
// Env: TCD_LOG_LEVEL (default "info"), TCD_LOG_FORMAT (text|json|journald).
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1) Logger
    let format: LoggerFormat = std::env::var("TCD_LOG_FORMAT")
        .unwrap_or_default()
        .parse()?;
    let level = std::env::var("TCD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    logger_init(
        &LoggerConfig::default()
            .with_format(format)
            .with_level(level)
            .with_threads(true),
    )?;
    info!("logger initialized");

    // 2) Panic hook + single instance
    let _hook = install_panic_hook(Arc::new(LogFaults));
    let guard = InstanceGuard::acquire(default_lock_path("tcd-worker-demo"))?;
    info!(lock = %guard.path().display(), "instance lock acquired");

    // 3) Runner
    let metrics = PrometheusMetrics::new()?;
    let event_loop = EventLoop::new();
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Journal)];
    let runner = TaskRunner::builder(RunnerConfig::default())
        .with_dispatcher(event_loop.dispatcher())
        .with_subscribers(subscribers)
        .with_metrics(Arc::new(metrics.clone()))
        .build()?;
    info!(max_concurrent = runner.config().max_concurrent, "runner ready");

    // 4) Counting task
    let counter = runner.submit_named("count", count);
    counter
        .on_progress(|p| info!(percent = p.percent_done(), note = p.message(), "count progress"))
        .on_finished(|outcome| {
            let status = outcome.status();
            match outcome.reason() {
                None => info!(%status, value = ?outcome.ok(), "count finished"),
                Some(reason) => warn!(%status, %reason, "count did not complete"),
            }
        });

    // 5) Optional command from argv
    let mut argv = std::env::args().skip(1);
    if let Some(program) = argv.next() {
        let cfg = ProcConfig::new(program).args(argv);
        let cmd = submit_command(&runner, cfg);
        cmd.on_progress(|p| info!(line = p.message().unwrap_or(""), "command output"))
            .on_finished(|outcome| {
                let status = outcome.status();
                let reason = outcome.reason().unwrap_or_default();
                match outcome.ok() {
                    Some(out) => {
                        info!(%status, code = ?out.code, lines = out.lines.len(), "command finished")
                    }
                    None => warn!(%status, %reason, "command did not complete"),
                }
            });
    }

    // 6) Ctrl+C cancels everything
    let state = runner.state();
    runner.handle().spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let cancelled = state.cancel_all();
            info!(cancelled, "interrupt received; cancelling tasks");
        }
    });

    // 7) Interactive loop
    info!("press Ctrl+C to cancel");
    let query = TaskQuery::new();
    while !event_loop.run_until(Duration::from_secs(5), || runner.tasks(&query).total == 0) {
        info!(live = runner.tasks(&query).total, active = runner.active(), "still working");
    }

    // 8) Metrics + shutdown
    println!("{}", metrics.encode_text()?);
    runner.shutdown();
    drop(guard);
    info!("bye");
    Ok(())
}
