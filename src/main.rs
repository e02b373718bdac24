use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use codejudge::config::{CliArgs, Config};
use codejudge::judge::Judge;
use codejudge::languages::LanguageRegistry;
use codejudge::queue::JobQueue;
use codejudge::sandbox::{IsolatedRunner, create_sandbox_backend};
use codejudge::web_server::build_server;
use codejudge::worker::worker;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        sandbox: sandbox_config,
        languages,
        problems,
    } = cli.to_config().expect("Failed to load configuration");

    let registry = LanguageRegistry::from_config(&languages).expect("Invalid language profile");
    log::info!("Supported languages: {}", registry.names().join(", "));

    let backend = create_sandbox_backend(&sandbox_config).expect("Failed to set up the sandbox");
    let runner = IsolatedRunner::new(backend).with_stop_grace(sandbox_config.stop_grace());
    let judge = Judge::new(Arc::new(registry), runner, sandbox_config.limits())
        .with_parallelism(sandbox_config.batch_parallelism);
    log::info!("Sandbox limits: {:?}", judge.limits());

    let judge = Arc::new(judge);
    let problems = Arc::new(problems);
    let job_queue = Arc::new(JobQueue::new());
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=sandbox_config.workers {
        workers.spawn(worker(
            i,
            judge.clone(),
            job_queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let server =
        build_server(server_config, problems, job_queue).expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {:?}", e);
            } else {
                log::error!("Worker handle finished with error: {:?}", e);
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
