use std::sync::Arc;

use salvo::catcher::Catcher;
use salvo::prelude::*;
use salvo::server::ServerHandle;
use tokio::signal;
use tracing::info;

use gatehouse::{config, db, mailer, routers};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    config::init();
    let config = config::get();
    db::init();

    let _guard = config.log.guard();
    tracing::info!("log level: {}", &config.log.filter_level);

    let transport: Arc<dyn mailer::Mailer> = if config.email.server_ip == "stub"
    {
        Arc::new(mailer::StubMailer::default())
    } else {
        Arc::new(mailer::SmtpMailer::from_config(&config.email))
    };
    mailer::init(transport);

    let service = Service::new(routers::root()).catcher(Catcher::default());

    let addr = format!("{}:{}", config.listen_addr, config.listen_port);
    println!(
        "🚀 Server Listening on http://{}/",
        addr.replace("0.0.0.0", "127.0.0.1"),
    );
    println!(
        "📖 Open API Page: http://{}/scalar",
        addr.replace("0.0.0.0", "127.0.0.1"),
    );
    let acceptor = TcpListener::new(addr.clone()).bind().await;
    let server = Server::new(acceptor);
    tokio::spawn(shutdown_signal(server.handle()));
    server.serve(service).await;
}

async fn shutdown_signal(handle: ServerHandle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl_c signal received"),
        _ = terminate => info!("terminate signal received"),
    }
    handle.stop_graceful(std::time::Duration::from_secs(60));
}
