use anyhow::Result;

use super::quit;

/// Route operator interrupts to the active supervisor.
///
/// SIGINT and SIGTERM request a forced quit through the active slot. When no
/// supervisor is registered the process exits with the conventional
/// `128 + signal` status.
#[cfg(unix)]
pub fn setup_interrupt_handlers() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                tracing::debug!("Received signal {}", sig);
                if !quit::interrupt_active(false) {
                    std::process::exit(128 + sig);
                }
            }
        })?;

    Ok(())
}

/// Ctrl-C handling for platforms without POSIX signals; must be called from
/// within a tokio runtime
#[cfg(not(unix))]
pub fn setup_interrupt_handlers() -> Result<()> {
    tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Received Ctrl-C");
            if !quit::interrupt_active(false) {
                std::process::exit(130);
            }
        }
    });
    Ok(())
}
