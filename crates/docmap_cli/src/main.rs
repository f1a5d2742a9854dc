//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise one insert/update/refresh cycle against a document store.
//! - Print the planned bulk operations as JSON for quick inspection.
//!
//! Usage: `docmap [DB_PATH]`. Without a path the store lives in memory.
//! Set `DOCMAP_LOG_DIR` to an absolute directory to enable file logging.

use docmap_core::{
    core_version, default_log_level, init_logging, Collection, CollectionOptions, HookRegistry,
    MapperResult, RuntimePlugin, SaveReport, SqliteDocumentStore, Value,
};
use futures::executor::block_on;
use log::{error, info};
use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    println!("docmap_core version={}", core_version());

    if let Ok(log_dir) = std::env::var("DOCMAP_LOG_DIR") {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let store = match std::env::args().nth(1) {
        Some(path) => SqliteDocumentStore::open(path),
        None => SqliteDocumentStore::open_in_memory(),
    };
    let store = match store {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!("event=cli_run module=cli status=error stage=open error={err}");
            eprintln!("failed to open store: {err}");
            return ExitCode::FAILURE;
        }
    };

    info!("event=cli_run module=cli status=start");
    match block_on(run(store)) {
        Ok(()) => {
            info!("event=cli_run module=cli status=ok");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(
                "event=cli_run module=cli status=error error_code={} error={err}",
                err.code()
            );
            eprintln!("error_code={} error={err}", err.code());
            ExitCode::FAILURE
        }
    }
}

async fn run(store: Arc<SqliteDocumentStore>) -> MapperResult<()> {
    let runtime = RuntimePlugin::new();
    let mut hooks = HookRegistry::new();
    hooks.use_plugin(&runtime);

    let mut people = Collection::new(CollectionOptions::named("people"), store, hooks.freeze());
    people.push_value(Value::from(json!({
        "name": "Ada",
        "address": {"city": "London", "zip": "N1"},
    })))?;
    print_report("insert", &people.save(false).await?);

    if let Some(ada) = people.record_mut(0) {
        ada.set("address.city", "Cambridge")?.unset("address.zip")?;
    }
    print_report("update", &people.save(false).await?);
    print_report("noop", &people.save(false).await?);

    let reloaded = people.refresh().await?;
    println!("refreshed={reloaded}");
    for sample in runtime.samples() {
        println!(
            "runtime name={} count={} duration_us={}",
            sample.name,
            sample.count,
            sample.elapsed.as_micros()
        );
    }
    Ok(())
}

fn print_report(label: &str, report: &SaveReport) {
    info!(
        "event=cli_save module=cli status=ok step={label} operations={} write_us={}",
        report.operations.len(),
        report.write_elapsed.as_micros()
    );
    let operations: Vec<_> = report.operations.iter().map(Value::to_json).collect();
    println!(
        "{label} committed={} operations={}",
        report.committed_count(),
        serde_json::Value::Array(operations)
    );
}
