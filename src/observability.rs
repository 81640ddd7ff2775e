pub(crate) mod metrics;
pub(crate) mod tracing;

use std::panic::PanicHookInfo;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;

use self::metrics::Metrics;

static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Telemetry (metrics and tracing) for the orchestrator process.
#[derive(Debug, Clone)]
pub struct Telemetry {
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// Initialize tracing once, route panic records into the structured log
    /// stream, and build the metrics registry.
    pub fn new() -> Result<Self> {
        tracing::init()?;
        install_panic_hook();
        let metrics = Arc::new(Metrics::new()?);
        Ok(Self { metrics })
    }

    pub(crate) fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn record_ready_probe(&self) {
        ::tracing::debug!("service ready probe");
    }

    pub fn record_live_probe(&self) {
        ::tracing::debug!("service live probe");
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        self.metrics.render()
    }
}

/// Emit panics as structured error records instead of stderr text, so a
/// crashing handler shows up next to the message it was processing.
fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        std::panic::set_hook(Box::new(|info| {
            let thread = std::thread::current();
            let location = info
                .location()
                .map(|location| {
                    format!("{}:{}:{}", location.file(), location.line(), location.column())
                })
                .unwrap_or_else(|| "unknown".to_string());

            ::tracing::error!(
                thread = thread.name().unwrap_or("unnamed"),
                location = %location,
                message = panic_message(info),
                "panic captured"
            );
        }));
    });
}

fn panic_message<'a>(info: &'a PanicHookInfo<'_>) -> &'a str {
    let payload = info.payload();
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}
