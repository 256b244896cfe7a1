use std::process;

use clap::Parser;
use tokio::runtime::Runtime;

use nodeforge::app_context::AppContext;
use nodeforge::cli::Cli;
use nodeforge::termination;

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt().with_thread_ids(true).init();

    let cli = Cli::parse();
    let rt = Runtime::new().expect("Failed to build Tokio runtime");

    let result = run(&rt, cli);
    if let Err(err) = &result {
        termination::write_termination_log(&format!("{err:?}"));
    }
    result
}

fn run(rt: &Runtime, cli: Cli) -> miette::Result<()> {
    let mut ctx = rt.block_on(AppContext::bootstrap(cli))?;

    let services = rt.block_on(ctx.build_services())?;

    tracing::info!("Server running (PID: {})", process::id());

    let (mut server, watcher) = ctx.ready();

    server.bootstrap();
    server.add_services(services);

    if let Some(mut watcher) = watcher {
        rt.spawn(async move { watcher.watch().await });
    }

    tracing::info!("Starting Pingora server...");

    server.run_forever();
}
