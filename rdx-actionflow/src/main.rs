use actionflow::config::FlowConfig;
use actionflow::plan::PlanBuilder;
use actionflow::prelude::*;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration: an optional TOML file plus ACTIONFLOW__* overrides.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = FlowConfig::load(config_path.as_deref())?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .with_target(config.log.with_target)
        .init();

    info!("{} v{} demo starting.", actionflow::LIBRARY_NAME, actionflow::VERSION);

    // 3. Exercise the combinators on graphs built in code.
    run_join_demo().await?;
    run_loop_demo().await?;
    run_race_demo().await?;
    run_event_demo().await?;

    // 4. Run every plan from the configuration file, if one was given.
    let counters = Counters::new(config.counters.clone());
    let builder = PlanBuilder::new(counters.clone(), EventBindings::new()).with_timer(config.timer());
    for (name, plan) in &config.plans {
        info!("Running plan '{}'...", name);
        run(builder.build(plan)?)?.await;
        info!("Plan '{}' completed. Counters: {:?}", name, counters.snapshot());
    }

    Ok(())
}

fn incrementer(counter: &Arc<AtomicI64>, by: i64) -> Action {
    let counter = counter.clone();
    instantly(move || {
        counter.fetch_add(by, Ordering::SeqCst);
    })
}

/// Joins a chain that sums to 8 with a delayed +2, converging on 10.
async fn run_join_demo() -> Result<()> {
    let counter = Arc::new(AtomicI64::new(0));
    let chain = sequence([
        incrementer(&counter, 2),
        incrementer(&counter, 6),
        incrementer(&counter, -4),
        delay(incrementer(&counter, 4), Duration::from_millis(100)),
    ])?;
    let join = together_with(
        [
            chain,
            noop(),
            noop(),
            delay(incrementer(&counter, 2), Duration::from_millis(500)),
        ],
        |settlements| {
            for settlement in settlements {
                info!(
                    "[JOIN] member #{} finished {} at {}",
                    settlement.index, settlement.rank, settlement.settled_at
                );
            }
        },
    )?;
    run(join)?.await;
    info!("[JOIN] Counter converged on {}.", counter.load(Ordering::SeqCst));
    Ok(())
}

/// Counts up with a deferred loop body until the counter is a multiple of 3.
async fn run_loop_demo() -> Result<()> {
    let counter = Arc::new(AtomicI64::new(1));
    let predicate = {
        let counter = counter.clone();
        move || counter.load(Ordering::SeqCst) % 3 != 0
    };
    let body = delay(incrementer(&counter, 1), Duration::from_millis(50));
    run(repeat_while(predicate, body))?.await;
    info!("[LOOP] Counter stopped at {}.", counter.load(Ordering::SeqCst));
    Ok(())
}

/// Races two delayed actions; the slower one still finishes afterwards.
async fn run_race_demo() -> Result<()> {
    let race = any([
        delay(instantly(|| info!("[RACE] I got here second")), Duration::from_millis(200)),
        delay(instantly(|| info!("[RACE] I got here first")), Duration::from_millis(100)),
    ])?;
    run(race)?.await;
    info!("[RACE] Race settled.");
    tokio::time::sleep(Duration::from_millis(150)).await;
    Ok(())
}

/// Waits for a click that a background task triggers later.
async fn run_event_demo() -> Result<()> {
    let bindings = EventBindings::new();
    let flow = sequence([
        bindings.click_handler("#start", |event| info!("[EVENT] {} on {}", event.name, event.selector)),
        bindings.remove_handler("#start", "click"),
    ])?;
    let completion = run(flow)?;

    let trigger = bindings.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.trigger("#start", "click", None);
    });
    completion.await;
    info!("[EVENT] Flow finished with {} binding(s) left.", bindings.len());
    Ok(())
}
