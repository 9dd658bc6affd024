use clap::Parser;
use insightedge::app;
use insightedge::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    println!(
        "Starting InsightEdge dashboard on http://{} (charts {}x{})",
        config.bind_addr(),
        config.chart_width,
        config.chart_height
    );
    app::run(config).await
}
