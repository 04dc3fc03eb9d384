use anyhow::Result;
use std::future::Future;
use tokio::task::JoinHandle;

use crate::controller::ScanHandle;

/// External control events delivered to a running scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Ctrl+C.
    Interrupt,
    /// Ctrl+Z on Unix terminals.
    PauseToggle,
}

/// What a signal did to the scan, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Stopping,
    AlreadyStopping,
    Paused,
    Resumed,
}

/// Map one signal onto the scan's control surface.
pub fn apply_signal(handle: &ScanHandle, signal: ControlSignal) -> ControlOutcome {
    match signal {
        ControlSignal::Interrupt => {
            if handle.stop() {
                ControlOutcome::Stopping
            } else {
                ControlOutcome::AlreadyStopping
            }
        }
        ControlSignal::PauseToggle => {
            if handle.toggle_pause() {
                ControlOutcome::Paused
            } else {
                ControlOutcome::Resumed
            }
        }
    }
}

fn report(outcome: ControlOutcome) {
    match outcome {
        ControlOutcome::Stopping => {
            eprintln!("\n[!] Ctrl+C detected - stopping scan...");
        }
        ControlOutcome::AlreadyStopping => {
            eprintln!("\n[!] Second Ctrl+C - exiting now");
            std::process::exit(130);
        }
        ControlOutcome::Paused => {
            eprintln!("\n[||] Scan paused - press Ctrl+Z again to resume");
        }
        ControlOutcome::Resumed => {
            eprintln!("\n[>] Scan resumed");
        }
    }
}

/// Run `work` unless `interrupt` resolves first, in which case `None` is returned.
///
/// Used outside a scan (menu prompt, registry fetch) where no bridge is
/// listening, so Ctrl+C is never swallowed by an installed handler.
pub async fn race_interrupt<F, I>(work: F, interrupt: I) -> Option<F::Output>
where
    F: Future,
    I: Future,
{
    tokio::select! {
        out = work => Some(out),
        _ = interrupt => None,
    }
}

/// Listen for OS signals and forward them to `handle` until the task is aborted.
///
/// Handlers are installed before this returns, so no signal sent after the
/// call is missed.
#[cfg(unix)]
pub fn spawn_signal_bridge(handle: ScanHandle) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut suspend = signal(SignalKind::from_raw(libc::SIGTSTP))?;
    Ok(tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                Some(()) = interrupt.recv() => ControlSignal::Interrupt,
                Some(()) = suspend.recv() => ControlSignal::PauseToggle,
                else => break,
            };
            report(apply_signal(&handle, sig));
        }
    }))
}

/// Without SIGTSTP only Ctrl+C is forwarded.
#[cfg(not(unix))]
pub fn spawn_signal_bridge(handle: ScanHandle) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            report(apply_signal(&handle, ControlSignal::Interrupt));
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ScanPhase;

    #[test]
    fn interrupt_stops_once() {
        let h = ScanHandle::default();
        assert_eq!(apply_signal(&h, ControlSignal::Interrupt), ControlOutcome::Stopping);
        assert_eq!(apply_signal(&h, ControlSignal::Interrupt), ControlOutcome::AlreadyStopping);
        assert_eq!(h.phase(), ScanPhase::Stopped);
    }

    #[test]
    fn pause_toggle_alternates() {
        let h = ScanHandle::default();
        assert_eq!(apply_signal(&h, ControlSignal::PauseToggle), ControlOutcome::Paused);
        assert!(h.is_paused());
        assert_eq!(apply_signal(&h, ControlSignal::PauseToggle), ControlOutcome::Resumed);
        assert!(!h.is_paused());
    }

    #[tokio::test]
    async fn interrupt_cancels_pending_work() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let work = tokio::time::sleep(std::time::Duration::from_secs(30));
        tx.send(()).unwrap();
        assert!(race_interrupt(work, rx).await.is_none());
    }

    #[tokio::test]
    async fn finished_work_wins() {
        let out = race_interrupt(async { 7 }, std::future::pending::<()>()).await;
        assert_eq!(out, Some(7));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bridge_forwards_os_signals() {
        use std::time::Duration;

        async fn wait_for(check: impl Fn() -> bool) -> bool {
            for _ in 0..200 {
                if check() {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            check()
        }

        let h = ScanHandle::default();
        let bridge = spawn_signal_bridge(h.clone()).unwrap();

        unsafe {
            libc::raise(libc::SIGTSTP);
        }
        assert!(wait_for(|| h.is_paused()).await);
        assert!(!h.is_stopped());

        unsafe {
            libc::raise(libc::SIGINT);
        }
        assert!(wait_for(|| h.is_stopped()).await);
        assert_eq!(h.phase(), ScanPhase::Stopped);
        bridge.abort();
    }

    #[test]
    fn pause_does_not_clear_stop() {
        let h = ScanHandle::default();
        apply_signal(&h, ControlSignal::Interrupt);
        apply_signal(&h, ControlSignal::PauseToggle);
        assert!(h.is_stopped());
    }
}
