//! Tracing subscriber setup for the CLI.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are ignored.
///
/// `RUST_LOG` is honoured; otherwise the level is `info`, or `debug` when
/// `debug` is set. Events go to stderr so prompts on stdout stay readable.
pub fn init_tracing(debug: bool) {
    INIT.call_once(|| {
        let env_filter = if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        };

        let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

        let _ = tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init();
    });
}
