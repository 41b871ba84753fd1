use std::{process, sync::Arc};

use infocache::{
    config::{self, ReplayArgs, Settings},
    domain::TypeDescriptor,
    farm::{NullTransport, ReplayPlan},
    infra::{InfraError, MemoryStore, read_json_lines, telemetry},
    node::NodeContext,
};
use tokio::{fs::File, io::BufReader};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging, &settings.node.name)?;

    match cli_args.command {
        Some(config::Command::Replay(args)) => run_replay(settings, args).await,
        Some(config::Command::Types) | None => {
            print_types(&settings.types);
            Ok(())
        }
    }
}

async fn run_replay(settings: Settings, args: ReplayArgs) -> Result<(), InfraError> {
    let file = File::open(&args.file).await?;
    let tasks = read_json_lines(BufReader::new(file)).await?;
    info!(
        target = "infocache::replay",
        file = %args.file.display(),
        tasks = tasks.len(),
        "Replay file loaded"
    );

    if args.dry_run {
        let plan = ReplayPlan::from_tasks(tasks);
        println!("{plan}");
        for task in &plan.tasks {
            println!(
                "{}\t{}\t{}\t{}",
                task.id(),
                task.kind(),
                task.target(),
                task.origin()
            );
        }
        return Ok(());
    }

    let node = NodeContext::from_settings(
        &settings,
        Arc::new(MemoryStore::new()),
        Arc::new(NullTransport),
    )?;
    for task in tasks {
        node.inbox().push(task);
    }
    let report = node.consumer().consume_all().await;
    println!(
        "received={} applied={} skipped={} failed={}",
        report.received, report.applied, report.skipped, report.failed
    );
    node.shutdown();
    Ok(())
}

fn print_types(types: &[Arc<TypeDescriptor>]) {
    if types.is_empty() {
        println!("no types configured");
        return;
    }
    for descriptor in types {
        println!("{}", descriptor.object_type());
        let columns = [
            ("id", descriptor.id_column()),
            ("name", descriptor.name_column()),
            ("full_name", descriptor.full_name_column()),
            ("guid", descriptor.guid_column()),
            ("last_modified", descriptor.last_modified_column()),
            ("site_id", descriptor.site_id_column()),
        ];
        for (label, column) in columns {
            if let Some(column) = column {
                println!("  {label:<14} {column}");
            }
        }
        if let Some(resolution) = descriptor.full_name_resolution() {
            println!("  {:<14} {resolution:?}", "resolution");
        }
        println!(
            "  {:<14} caching={} log_events={} touch_dependencies={}",
            "flags",
            descriptor.supports_caching(),
            descriptor.log_events(),
            descriptor.touch_cache_dependencies()
        );
    }
}
