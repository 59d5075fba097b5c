//! Engine diagnostics for production debugging
//!
//! Provides a SIGQUIT (kill -3) handler that dumps the engine counters to
//! stderr without stopping the process:
//! ```bash
//! kill -3 <pid>
//! ```
//!
//! ## Signal Safety
//!
//! `dump_diagnostics()` does I/O and takes the stderr lock, neither of which is
//! async-signal-safe. The handler therefore runs on a dedicated thread that
//! waits on signal-hook's iterator, never inside signal context.
//!
//! Coroutines are thread-local, so the dump only shows process-wide counters,
//! never the state of individual coroutines.

#![cfg(feature = "diagnostics")]

use crate::stats::{StatsSnapshot, snapshot};
use std::io::Write;
use std::sync::Once;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Install the SIGQUIT handler. Idempotent.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(unix)]
        {
            use signal_hook::consts::SIGQUIT;
            use signal_hook::iterator::Signals;

            let mut signals = match Signals::new([SIGQUIT]) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "could not register SIGQUIT handler");
                    return;
                }
            };

            let spawned = std::thread::Builder::new()
                .name("costack-diagnostics".to_string())
                .spawn(move || {
                    for sig in signals.forever() {
                        if sig == SIGQUIT {
                            dump_diagnostics();
                        }
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "could not start diagnostics thread");
            }
        }
    });
}

/// Dump engine diagnostics to stderr
pub fn dump_diagnostics() {
    let mut out = std::io::stderr().lock();
    let _ = write_diagnostics(&mut out, &snapshot());
}

fn write_diagnostics(out: &mut impl Write, snap: &StatsSnapshot) -> std::io::Result<()> {
    writeln!(out, "\n=== costack diagnostics ===")?;

    writeln!(out, "\n[Coroutines]")?;
    writeln!(out, "  Created:   {} (total)", snap.coroutines_created)?;
    writeln!(out, "  Finished:  {} (total)", snap.coroutines_finished)?;
    writeln!(out, "  Abandoned: {} (dropped while suspended)", snap.coroutines_abandoned)?;

    writeln!(out, "\n[Stacks]")?;
    writeln!(out, "  Mapped:    {}", snap.live_arenas())?;
    writeln!(out, "  Bytes:     {}", snap.mapped_bytes)?;
    writeln!(out, "  Peak:      {} bytes (high-water mark)", snap.peak_mapped_bytes)?;
    if snap.arenas_released > snap.arenas_acquired {
        writeln!(
            out,
            "  WARNING: {} more releases than acquisitions",
            snap.arenas_released - snap.arenas_acquired
        )?;
    }

    writeln!(out, "\n[Switching]")?;
    writeln!(out, "  Switches:  {}", snap.context_switches)?;
    writeln!(out, "  Chains:    {}", snap.root_chains)?;
    writeln!(out, "  Callbacks: {} (run on the root stack)", snap.root_callbacks)?;

    writeln!(out, "\n===========================")?;
    out.flush()
}
