//! tether-reconcile - backfill Client.staffs from Staff.clientIds
//!
//! Usage:
//!   tether-reconcile --mongodb-uri mongodb://localhost:27017 --mongodb-db realestate
//!   tether-reconcile --dry-run --json
//!   tether-reconcile --audit
//!
//! Environment variables:
//!   MONGODB_URI, MONGODB_DB - store connection
//!   STAFF_COLLECTION, CLIENT_COLLECTION - collection names (default: staffs, clients)
//!   RECONCILE_CONCURRENCY - staff records processed concurrently (default: 8)
//!   RECONCILE_DRY_RUN, RECONCILE_REPAIR_FORWARD - run options
//!
//! Exit status is 0 whenever the run completes, even with per-record
//! errors; 1 for invalid configuration; 2 when the store is unreachable.

use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tether::config::ReconcileArgs;
use tether::relations::{audit, ReconcileOptions, Reconciler};
use tether::{logging, store};

/// Findings listed in an audit report
const AUDIT_SAMPLE_LIMIT: usize = 20;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let args = ReconcileArgs::parse();
    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::from(1);
    }

    let store = match store::open(&args.store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Store connection failed: {}", e);
            return ExitCode::from(2);
        }
    };

    if args.audit {
        return match audit(store.as_ref(), AUDIT_SAMPLE_LIMIT).await {
            Ok(report) => {
                print_report(&report, args.json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Audit failed: {}", e);
                ExitCode::from(2)
            }
        };
    }

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, finishing in-flight updates");
            signal.cancel();
        }
    });

    let options = ReconcileOptions {
        concurrency: args.concurrency,
        dry_run: args.dry_run,
        repair_forward: args.repair_forward,
    };

    match Reconciler::new(store, options).run(cancel).await {
        Ok(summary) => {
            if !summary.errors.is_empty() {
                info!(errors = summary.errors.len(), "Run completed with per-record errors");
            }
            print_report(&summary, args.json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(code = e.code(), "Reconciliation failed: {}", e);
            ExitCode::from(2)
        }
    }
}

fn print_report<T: Serialize + std::fmt::Display>(report: &T, json: bool) {
    if !json {
        println!("{}", report);
        return;
    }

    match serde_json::to_string_pretty(report) {
        Ok(body) => println!("{}", body),
        Err(e) => error!("Failed to serialize report: {}", e),
    }
}
