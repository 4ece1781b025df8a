use wa_gateway::config::GatewayConfig;
use wa_gateway::logging;

#[tokio::main]
async fn main() {
    let config = match GatewayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wa-gateway: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = logging::init_logging(&config.log) {
        eprintln!("wa-gateway: logging disabled: {}", e);
    }

    if let Err(e) = wa_gateway::run(config).await {
        log::error!("wa-gateway stopped: {}", e);
        std::process::exit(1);
    }
}
