//! # Telemetry lifecycle
//!
//! [`init_telemetry`] stands up the OpenTelemetry metric and trace pipelines
//! once at process start and returns a [`Telemetry`] handle that owns them
//! until [`Telemetry::shutdown`] is called during graceful termination.
//!
//! ## Exporters
//!
//! - `stdout` (default feature): pretty JSON on stdout via
//!   `opentelemetry-stdout`.
//! - `otlp` (feature `otlp`): OTLP over gRPC to `OTLP_ENDPOINT`.
//! - `none`: providers with no reader or span processor. Instruments still
//!   work, nothing leaves the process.
//!
//! Selecting an exporter whose cargo feature was not compiled in is a startup
//! error.
//!
//! ## Globals
//!
//! Both providers are built before anything is registered. Only when every
//! exporter has been constructed are the providers installed as the
//! `opentelemetry::global` defaults, along with the W3C trace-context
//! propagator and the `tracing` subscriber. A failed initialization therefore
//! leaves no telemetry state behind.
//!
//! ## Span behavior
//!
//! - Spans created via `tracing::info_span!` or `#[tracing::instrument]` are
//!   exported through the tracer provider.
//! - Events outside of a span are only shown in log output (via the `fmt`
//!   layer), not exported.
//!
//! ## Shutdown
//!
//! The tracer provider is shut down first, then the meter provider. Both are
//! always attempted. When both fail the tracer error is returned and the meter
//! error is logged. Calls after the first are no-ops.

use clap::ValueEnum;
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Meter, MeterProvider as _},
    trace::TracerProvider as _,
};
use opentelemetry_sdk::{
    Resource, error::OTelSdkError, metrics as sdkmetrics, propagation::TraceContextPropagator,
    trace as sdktrace,
};
use opentelemetry_semantic_conventions as semcnv;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Instrumentation scope name shared by the meter accessor and the tracer.
pub const SCOPE_NAME: &str = "acai-server";

/// Failures raised while standing up or tearing down telemetry.
#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    /// An exporter could not be constructed.
    #[error("failed to build {signal} exporter: {reason}")]
    Exporter {
        signal: &'static str,
        reason: String,
    },

    /// The requested exporter was not compiled into this binary.
    #[error("exporter `{0}` is not available; rebuild with `--features {0}`")]
    ExporterUnavailable(&'static str),

    /// Flushing or releasing the tracer provider failed.
    #[error("failed to shut down tracer provider: {0}")]
    TraceShutdown(#[source] OTelSdkError),

    /// Flushing or releasing the meter provider failed.
    #[error("failed to shut down meter provider: {0}")]
    MeterShutdown(#[source] OTelSdkError),
}

/// Where metrics and spans are sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ExporterKind {
    #[default]
    Stdout,
    Otlp,
    None,
}

/// Console log rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Value of the `service.name` resource attribute.
    pub service_name: String,
    /// How often the periodic reader collects and exports metrics.
    pub metrics_interval: Duration,
    pub exporter: ExporterKind,
    /// Collector endpoint, required for [`ExporterKind::Otlp`].
    pub otlp_endpoint: Option<String>,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SCOPE_NAME.to_string(),
            metrics_interval: Duration::from_secs(10),
            exporter: ExporterKind::default(),
            otlp_endpoint: None,
            log_format: LogFormat::default(),
        }
    }
}

/// Owner of the process telemetry pipelines.
///
/// Hold on to this for the life of the process and call
/// [`shutdown`](Self::shutdown) once during graceful termination so buffered
/// spans and metrics are flushed.
pub struct Telemetry {
    tracer_provider: sdktrace::SdkTracerProvider,
    meter_provider: sdkmetrics::SdkMeterProvider,
    scope: InstrumentationScope,
    shut_down: AtomicBool,
}

/// Builds the exporters and providers, then installs them process-wide.
///
/// # Errors
///
/// Returns [`TelemetryError::Exporter`] if an exporter cannot be built and
/// [`TelemetryError::ExporterUnavailable`] if the selected exporter's feature
/// is disabled. Nothing is registered globally in either case.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Telemetry, TelemetryError> {
    let resource = resource(&config.service_name);
    let tracer_provider = init_tracer(config, resource.clone())?;
    let meter_provider = init_metrics(config, resource)?;

    let telemetry = Telemetry::from_providers(tracer_provider, meter_provider);

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    opentelemetry::global::set_tracer_provider(telemetry.tracer_provider.clone());
    opentelemetry::global::set_meter_provider(telemetry.meter_provider.clone());

    init_subscriber(config.log_format, &telemetry);

    tracing::info!(
        service = %config.service_name,
        exporter = ?config.exporter,
        "OpenTelemetry initialized"
    );
    Ok(telemetry)
}

/// Returns the process-wide meter scoped to this service.
///
/// Before [`init_telemetry`] runs this is backed by the no-op global provider,
/// so instruments created from it silently discard measurements.
pub fn meter() -> Meter {
    opentelemetry::global::meter_with_scope(scope())
}

impl Telemetry {
    pub(crate) fn from_providers(
        tracer_provider: sdktrace::SdkTracerProvider,
        meter_provider: sdkmetrics::SdkMeterProvider,
    ) -> Self {
        Self {
            tracer_provider,
            meter_provider,
            scope: scope(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Meter bound to this handle's provider.
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter_with_scope(self.scope.clone())
    }

    pub const fn tracer_provider(&self) -> &sdktrace::SdkTracerProvider {
        &self.tracer_provider
    }

    pub const fn meter_provider(&self) -> &sdkmetrics::SdkMeterProvider {
        &self.meter_provider
    }

    /// Flushes and releases the tracer provider, then the meter provider.
    ///
    /// Only the first call does any work.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::TraceShutdown`] if the tracer provider fails,
    /// otherwise [`TelemetryError::MeterShutdown`] if the meter provider fails.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("Telemetry already shut down");
            return Ok(());
        }

        let traces = self
            .tracer_provider
            .shutdown()
            .map_err(TelemetryError::TraceShutdown);
        let metrics = self
            .meter_provider
            .shutdown()
            .map_err(TelemetryError::MeterShutdown);

        match (traces, metrics) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(trace_err), Err(meter_err)) => {
                tracing::error!("{meter_err}");
                Err(trace_err)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        }
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope::builder(SCOPE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semcnv::SCHEMA_URL)
        .build()
}

fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_schema_url(
            [KeyValue::new(
                semcnv::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semcnv::SCHEMA_URL,
        )
        .build()
}

fn init_metrics(
    config: &TelemetryConfig,
    resource: Resource,
) -> Result<sdkmetrics::SdkMeterProvider, TelemetryError> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource);

    let builder = match config.exporter {
        ExporterKind::None => builder,
        #[cfg(feature = "stdout")]
        ExporterKind::Stdout => {
            let exporter = opentelemetry_stdout::MetricExporter::default();
            let reader = sdkmetrics::PeriodicReader::builder(exporter)
                .with_interval(config.metrics_interval)
                .build();
            builder.with_reader(reader)
        }
        #[cfg(not(feature = "stdout"))]
        ExporterKind::Stdout => return Err(TelemetryError::ExporterUnavailable("stdout")),
        #[cfg(feature = "otlp")]
        ExporterKind::Otlp => {
            use opentelemetry_otlp::WithExportConfig;

            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(otlp_endpoint(config)?)
                .with_timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| TelemetryError::Exporter {
                    signal: "metrics",
                    reason: e.to_string(),
                })?;
            let reader = sdkmetrics::PeriodicReader::builder(exporter)
                .with_interval(config.metrics_interval)
                .build();
            builder.with_reader(reader)
        }
        #[cfg(not(feature = "otlp"))]
        ExporterKind::Otlp => return Err(TelemetryError::ExporterUnavailable("otlp")),
    };

    Ok(builder.build())
}

fn init_tracer(
    config: &TelemetryConfig,
    resource: Resource,
) -> Result<sdktrace::SdkTracerProvider, TelemetryError> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource);

    let builder = match config.exporter {
        ExporterKind::None => builder,
        #[cfg(feature = "stdout")]
        ExporterKind::Stdout => {
            let exporter = opentelemetry_stdout::SpanExporter::default();
            builder.with_span_processor(
                sdktrace::BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch_config())
                    .build(),
            )
        }
        #[cfg(not(feature = "stdout"))]
        ExporterKind::Stdout => return Err(TelemetryError::ExporterUnavailable("stdout")),
        #[cfg(feature = "otlp")]
        ExporterKind::Otlp => {
            use opentelemetry_otlp::WithExportConfig;

            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(otlp_endpoint(config)?)
                .with_timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| TelemetryError::Exporter {
                    signal: "trace",
                    reason: e.to_string(),
                })?;
            builder.with_span_processor(
                sdktrace::BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch_config())
                    .build(),
            )
        }
        #[cfg(not(feature = "otlp"))]
        ExporterKind::Otlp => return Err(TelemetryError::ExporterUnavailable("otlp")),
    };

    Ok(builder.build())
}

#[cfg(any(feature = "stdout", feature = "otlp"))]
fn batch_config() -> sdktrace::BatchConfig {
    sdktrace::BatchConfigBuilder::default()
        .with_scheduled_delay(Duration::from_secs(5))
        .with_max_queue_size(2048)
        .build()
}

#[cfg(feature = "otlp")]
fn otlp_endpoint(config: &TelemetryConfig) -> Result<String, TelemetryError> {
    config
        .otlp_endpoint
        .clone()
        .ok_or_else(|| TelemetryError::Exporter {
            signal: "otlp",
            reason: "missing `OTLP_ENDPOINT`".to_string(),
        })
}

fn init_subscriber(format: LogFormat, telemetry: &Telemetry) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_file(true);
    let fmt_layer = match format {
        LogFormat::Pretty => fmt_layer.pretty().boxed(),
        LogFormat::Json => fmt_layer.json().boxed(),
    };

    let otel_layer = tracing_opentelemetry::layer()
        .with_tracer(
            telemetry
                .tracer_provider
                .tracer_with_scope(telemetry.scope.clone()),
        )
        .with_error_records_to_exceptions(true);

    // A subscriber may already be installed (tests, embedding binaries).
    if let Err(e) = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
    {
        tracing::debug!("Keeping existing tracing subscriber: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn quiet_config() -> TelemetryConfig {
        TelemetryConfig {
            exporter: ExporterKind::None,
            ..TelemetryConfig::default()
        }
    }

    /// Layer that records the level and message of every event.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<(tracing::Level, String)>>>);

    impl<S: tracing::Subscriber> Layer<S> for CapturedEvents {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Message(String);

            impl tracing::field::Visit for Message {
                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn core::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.0 = format!("{value:?}");
                    }
                }
            }

            let mut message = Message(String::new());
            event.record(&mut message);
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), message.0));
        }
    }

    fn bare_providers() -> (sdktrace::SdkTracerProvider, sdkmetrics::SdkMeterProvider) {
        (
            sdktrace::SdkTracerProvider::builder().build(),
            sdkmetrics::SdkMeterProvider::builder().build(),
        )
    }

    #[test]
    fn default_config_exports_to_stdout_every_ten_seconds() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "acai-server");
        assert_eq!(config.metrics_interval, Duration::from_secs(10));
        assert_eq!(config.exporter, ExporterKind::Stdout);
    }

    #[test]
    fn init_then_shutdown_succeeds() {
        let telemetry = init_telemetry(&quiet_config()).unwrap();
        let counter = telemetry.meter().u64_counter("test.counter").build();
        counter.add(1, &[]);
        telemetry.shutdown().unwrap();
    }

    #[test]
    fn second_shutdown_is_a_noop() {
        let telemetry = init_telemetry(&quiet_config()).unwrap();
        telemetry.shutdown().unwrap();
        telemetry.shutdown().unwrap();
    }

    #[test]
    fn global_meter_is_usable_before_and_after_init() {
        meter().u64_counter("before.init").build().add(1, &[]);
        let telemetry = init_telemetry(&quiet_config()).unwrap();
        meter().u64_counter("after.init").build().add(1, &[]);
        telemetry.shutdown().unwrap();
    }

    #[test]
    fn tracer_failure_wins_when_both_fail() {
        let (tracer_provider, meter_provider) = bare_providers();
        tracer_provider.shutdown().unwrap();
        meter_provider.shutdown().unwrap();

        let telemetry = Telemetry::from_providers(tracer_provider, meter_provider);
        let events = CapturedEvents::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        let err = tracing::subscriber::with_default(subscriber, || telemetry.shutdown())
            .unwrap_err();
        assert!(matches!(err, TelemetryError::TraceShutdown(_)), "{err}");

        let logged = events.0.lock().unwrap();
        assert!(
            logged.iter().any(|(level, message)| *level == tracing::Level::ERROR
                && message.starts_with("failed to shut down meter provider")),
            "{logged:?}"
        );
    }

    #[test]
    fn meter_failure_surfaces_after_tracer_succeeds() {
        let (tracer_provider, meter_provider) = bare_providers();
        meter_provider.shutdown().unwrap();

        let telemetry = Telemetry::from_providers(tracer_provider.clone(), meter_provider);
        let err = telemetry.shutdown().unwrap_err();
        assert!(matches!(err, TelemetryError::MeterShutdown(_)), "{err}");

        // The tracer provider was still released.
        assert!(tracer_provider.shutdown().is_err());
    }

    #[cfg(not(feature = "otlp"))]
    #[test]
    fn missing_exporter_feature_is_a_startup_error() {
        let config = TelemetryConfig {
            exporter: ExporterKind::Otlp,
            otlp_endpoint: Some("http://localhost:4317".into()),
            ..TelemetryConfig::default()
        };
        let err = init_telemetry(&config).err().unwrap();
        assert!(matches!(err, TelemetryError::ExporterUnavailable("otlp")));
    }

    #[cfg(feature = "otlp")]
    #[test]
    fn otlp_without_endpoint_is_a_startup_error() {
        let config = TelemetryConfig {
            exporter: ExporterKind::Otlp,
            otlp_endpoint: None,
            ..TelemetryConfig::default()
        };
        let err = init_telemetry(&config).err().unwrap();
        assert!(matches!(err, TelemetryError::Exporter { .. }));
    }
}
