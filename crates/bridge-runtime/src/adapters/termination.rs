//! Termination hook backed by OS signals.
//!
//! Unix processes stop on SIGINT, SIGTERM or SIGQUIT. Other platforms only
//! see Ctrl-C. The hook names the signal that arrived so the supervisor log
//! separates an operator interrupt from an orchestrator shutdown.

use async_trait::async_trait;

use crate::ports::TerminationSignal;

/// Resolves on the first process termination signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsTermination;

#[async_trait]
impl TerminationSignal for OsTermination {
    async fn triggered(&self) -> std::io::Result<&'static str> {
        SignalSet::install()?.first().await
    }
}

/// Handlers for every termination signal, installed together.
#[cfg(unix)]
struct SignalSet {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalSet {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    async fn first(&mut self) -> std::io::Result<&'static str> {
        let name = tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.quit.recv() => "SIGQUIT",
        };
        Ok(name)
    }
}

#[cfg(not(unix))]
struct SignalSet;

#[cfg(not(unix))]
impl SignalSet {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn first(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::TEST_TIMEOUT;
    use std::process::Command;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_reports_which_signal_arrived() {
        let mut signals = SignalSet::install().unwrap();

        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let name = timeout(TEST_TIMEOUT, signals.first()).await.unwrap().unwrap();
        assert_eq!(name, "SIGTERM");
    }
}
