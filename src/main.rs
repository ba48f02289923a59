use edge_http::{
    EventLoop, HttpContext, MemoryUserDb, MmapResourceProvider, PooledCredentialStore,
    ServerConfig, ServerError, ServerResult, WorkerPool,
};
use log::info;
use std::env;
use std::path::Path;
use std::sync::Arc;

fn main() -> ServerResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 && args[1] == "--write-default-config" {
        return save_default_config(&args[2]);
    }

    let config = if args.len() > 1 && Path::new(&args[1]).exists() {
        ServerConfig::from_json_file(&args[1])?
    } else {
        let config = ServerConfig::new();
        config.validate()?;
        config
    };

    // Collaborators are built once and shared with every connection
    let users = MemoryUserDb::new();
    let credentials = Arc::new(PooledCredentialStore::init(&users, &config.credentials)?);
    let ctx = Arc::new(HttpContext::new(
        config.resource_dir.clone(),
        Arc::new(MmapResourceProvider),
        credentials,
    ));

    let pool = Arc::new(WorkerPool::new(
        config.min_threads,
        config.max_threads,
        config.resize_interval,
    )?);

    let mut event_loop = EventLoop::new(&config, pool, ctx)?;
    info!(
        "Serving {} on {} with {}..{} worker threads",
        config.resource_dir.display(),
        event_loop.local_addr(),
        config.min_threads,
        config.max_threads
    );

    let shutdown = event_loop.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal. Stopping server...");
        shutdown.shutdown();
    })
    .map_err(|e| ServerError::Config(format!("failed to install signal handler: {}", e)))?;

    event_loop.run()
}

// Save default configuration to a file
fn save_default_config(path: &str) -> ServerResult<()> {
    ServerConfig::new().save_to_json_file(path)?;
    println!("Default configuration saved to: {}", path);
    Ok(())
}
