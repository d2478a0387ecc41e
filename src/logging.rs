use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Install a stderr logger unless a global subscriber is already configured.
///
/// `RUST_LOG` takes precedence over `level`. `log` records from the library are forwarded to
/// the subscriber.
pub fn install_logger(level: LevelFilter) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // The wgpu crate is logging too much below warn.
        EnvFilter::new(format!("{level},wgpu=warn,wgpu_core=warn,naga=warn"))
    });
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    if registry().with(layer).try_init().is_ok() {
        update_panic_hook();
    }
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        hook(info);
    }));
}
