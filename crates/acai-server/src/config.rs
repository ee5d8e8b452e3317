use crate::telemetry::{ExporterKind, LogFormat, TelemetryConfig};
use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `acai-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first when present), with defaults suitable for local
/// development.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "acai-server",
    version,
    about = "Chat conversation service with OpenTelemetry request metrics"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Service name attached to every exported metric and span as the
    /// `service.name` resource attribute.
    ///
    /// Environment variable: `SERVICE_NAME`
    #[arg(long, env = "SERVICE_NAME", default_value_t = String::from("acai-server"))]
    pub service_name: String,

    /// Seconds between periodic metric exports.
    ///
    /// Environment variable: `METRICS_INTERVAL_SECS`
    #[arg(long, env = "METRICS_INTERVAL_SECS", default_value_t = 10)]
    pub metrics_interval_secs: u64,

    /// Telemetry exporter. `otlp` requires building with `--features otlp`.
    ///
    /// Environment variable: `TELEMETRY_EXPORTER`
    #[arg(long, env = "TELEMETRY_EXPORTER", value_enum, default_value_t = ExporterKind::Stdout)]
    pub exporter: ExporterKind,

    /// OTLP collector endpoint, e.g. "http://localhost:4317".
    ///
    /// Environment variable: `OTLP_ENDPOINT`
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub telemetry: TelemetryConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.metrics_interval_secs == 0 {
            bail!("METRICS_INTERVAL_SECS must be greater than 0");
        }

        if args.service_name.trim().is_empty() {
            bail!("SERVICE_NAME must not be empty");
        }

        if args.exporter == ExporterKind::Otlp && args.otlp_endpoint.is_none() {
            bail!("OTLP_ENDPOINT is required when TELEMETRY_EXPORTER is `otlp`");
        }

        Ok(Self {
            server_addr: args.server_addr,
            telemetry: TelemetryConfig {
                service_name: args.service_name,
                metrics_interval: Duration::from_secs(args.metrics_interval_secs),
                exporter: args.exporter,
                otlp_endpoint: args.otlp_endpoint,
                log_format: args.log_format,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = core::iter::once("acai-server").chain(args.iter().copied());
        ServerConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn explicit_flags_are_applied() {
        let config = parse(&[
            "--server-addr",
            "127.0.0.1:9000",
            "--service-name",
            "acai-test",
            "--metrics-interval-secs",
            "30",
            "--exporter",
            "none",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(config.server_addr, "127.0.0.1:9000");
        assert_eq!(config.telemetry.service_name, "acai-test");
        assert_eq!(config.telemetry.metrics_interval, Duration::from_secs(30));
        assert_eq!(config.telemetry.exporter, ExporterKind::None);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = parse(&["--metrics-interval-secs", "0"]).unwrap_err();
        assert!(err.to_string().contains("METRICS_INTERVAL_SECS"));
    }

    #[test]
    fn otlp_requires_an_endpoint() {
        let err = parse(&["--exporter", "otlp"]).unwrap_err();
        assert!(err.to_string().contains("OTLP_ENDPOINT"));

        let config = parse(&[
            "--exporter",
            "otlp",
            "--otlp-endpoint",
            "http://localhost:4317",
        ])
        .unwrap();
        assert_eq!(
            config.telemetry.otlp_endpoint.as_deref(),
            Some("http://localhost:4317")
        );
    }

    #[test]
    fn unknown_exporter_is_a_parse_error() {
        assert!(parse(&["--exporter", "carrier-pigeon"]).is_err());
    }
}
