use foodgram_sdk::{serve, Config};
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = SimpleLogger::new().with_level(config.log_level).init() {
        eprintln!("Failed to initialize logging: {e}");
    }

    if let Err(e) = serve(config).await {
        log::error!("Server stopped: {:?}", e.info);
        std::process::exit(1);
    }
}
