//! `taskrunner server`: Start the HTTP server.

pub async fn run(
    host: String,
    port: u16,
    db_path: String,
    config_path: Option<String>,
) -> Result<(), String> {
    let config = taskrunner_server::ServerConfig {
        host: host.clone(),
        port,
        db_path,
        config_path,
    };

    eprintln!("Starting taskrunner server on {}:{}...", host, port);

    let addr = taskrunner_server::start_server(config).await?;
    eprintln!("taskrunner server listening on http://{}", addr);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    eprintln!("\nShutting down...");
    Ok(())
}
