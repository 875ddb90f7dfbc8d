//! `agentflow server` - Start the AgentFlow HTTP server.

pub async fn run(host: String, port: u16, db_path: String, workers: usize) -> Result<(), String> {
    let config = agentflow_server::ServerConfig {
        host: host.clone(),
        port,
        db_path,
        worker_concurrency: workers,
    };

    println!("Starting AgentFlow server on {}:{}...", host, port);

    let addr = agentflow_server::start_server(config).await?;
    println!("AgentFlow server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
