use crate::graph::GraphOptions;
use clap::Parser;
use std::time::Duration;

/// Settings for the dashboard web server
///
/// Every flag can also be given through its `INSIGHTEDGE_*` environment
/// variable.
#[derive(Clone, Debug, Parser)]
#[clap(version, about = "InsightEdge sales dashboard")]
pub struct Config {
    /// Address to listen on
    #[clap(long, env = "INSIGHTEDGE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[clap(long, env = "INSIGHTEDGE_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Width of rendered charts in pixels
    #[clap(long, env = "INSIGHTEDGE_CHART_WIDTH", default_value_t = 800)]
    pub chart_width: u32,

    /// Height of rendered charts in pixels
    #[clap(long, env = "INSIGHTEDGE_CHART_HEIGHT", default_value_t = 500)]
    pub chart_height: u32,

    /// Largest accepted upload, in megabytes
    #[clap(long, env = "INSIGHTEDGE_MAX_UPLOAD_MB", default_value_t = 200)]
    pub max_upload_mb: usize,

    /// Minutes an idle session (and its upload) is kept
    #[clap(long, env = "INSIGHTEDGE_SESSION_TTL_MINS", default_value_t = 60)]
    pub session_ttl_mins: u64,

    /// Most sessions held in memory at once
    #[clap(long, env = "INSIGHTEDGE_MAX_SESSIONS", default_value_t = 1000)]
    pub max_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            chart_width: 800,
            chart_height: 500,
            max_upload_mb: 200,
            session_ttl_mins: 60,
            max_sessions: 1000,
        }
    }
}

impl Config {
    /// Socket address the server listens on
    ///
    /// # Returns
    /// * `String` - `host:port`, ready for `TcpListener::bind`
    ///
    /// # Examples
    /// ```
    /// use insightedge::config::Config;
    ///
    /// assert_eq!(Config::default().bind_addr(), "127.0.0.1:3000");
    /// ```
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_mins * 60)
    }

    /// Chart options for a session; the theme is filled in per render
    pub fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            width: self.chart_width,
            height: self.chart_height,
            ..GraphOptions::default()
        }
    }
}
