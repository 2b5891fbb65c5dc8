use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{ChatConfig, ReconnectMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReconnectArg {
    Always,
    Bounded,
    Never,
}

impl From<ReconnectArg> for ReconnectMode {
    fn from(arg: ReconnectArg) -> Self {
        match arg {
            ReconnectArg::Always => ReconnectMode::Always,
            ReconnectArg::Bounded => ReconnectMode::Bounded,
            ReconnectArg::Never => ReconnectMode::Never,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "streamchat")]
#[command(version)]
#[command(about = "Terminal chat client for streaming assistant replies over WebSocket")]
pub struct Args {
    /// WebSocket endpoint (overrides the config file)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Path to a TOML config file
    #[arg(long, default_value = "streamchat.toml")]
    pub config: PathBuf,

    /// Reconnect policy after the connection drops
    #[arg(long, value_enum)]
    pub reconnect: Option<ReconnectArg>,

    /// Give up after this many consecutive failures (bounded policy only)
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// Log filter, e.g. "info" or "streamchat=debug". RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Apply command-line overrides on top of a loaded config.
pub fn apply_overrides(mut config: ChatConfig, args: &Args) -> ChatConfig {
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(mode) = args.reconnect {
        config.reconnect.mode = mode.into();
    }
    if let Some(max) = args.max_reconnects {
        config.reconnect.max_attempts = max;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["streamchat"]);
        assert_eq!(args.endpoint, None);
        assert_eq!(args.config, PathBuf::from("streamchat.toml"));
        assert_eq!(args.reconnect, None);
        assert_eq!(args.max_reconnects, None);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_parse_full() {
        let args = Args::parse_from([
            "streamchat",
            "--endpoint",
            "ws://10.1.1.1:7000/ws",
            "--config",
            "/etc/streamchat.toml",
            "--reconnect",
            "bounded",
            "--max-reconnects",
            "7",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.endpoint.as_deref(), Some("ws://10.1.1.1:7000/ws"));
        assert_eq!(args.config, PathBuf::from("/etc/streamchat.toml"));
        assert_eq!(args.reconnect, Some(ReconnectArg::Bounded));
        assert_eq!(args.max_reconnects, Some(7));
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn test_args_reject_unknown_policy() {
        assert!(Args::try_parse_from(["streamchat", "--reconnect", "sometimes"]).is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let args = Args::parse_from([
            "streamchat",
            "--endpoint",
            "ws://override/ws",
            "--reconnect",
            "never",
            "--max-reconnects",
            "2",
        ]);
        let c = apply_overrides(ChatConfig::default(), &args);
        assert_eq!(c.endpoint, "ws://override/ws");
        assert_eq!(c.reconnect.mode, ReconnectMode::Never);
        assert_eq!(c.reconnect.max_attempts, 2);
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let args = Args::parse_from(["streamchat"]);
        let c = apply_overrides(ChatConfig::default(), &args);
        assert_eq!(c, ChatConfig::default());
    }

    #[test]
    fn test_endpoint_flag_repairs_bad_file_endpoint() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "endpoint = \"http://bad/ws\"").unwrap();
        let args = Args::parse_from(["streamchat", "--endpoint", "ws://good/ws"]);
        let c = apply_overrides(ChatConfig::load(file.path()).unwrap(), &args);
        assert_eq!(c.endpoint, "ws://good/ws");
        assert!(c.validate().is_ok());
    }
}
