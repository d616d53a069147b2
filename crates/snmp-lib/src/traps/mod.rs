//! Trap subsystem
//!
//! Listener → bounded queue → forwarder, independent of the polling pipeline.
//! Both tasks share one stop signal owned by [`TrapServer`].

pub mod forwarder;
pub mod listener;
pub mod resolver;

pub use forwarder::TrapFormatter;
pub use listener::TrapPacket;
pub use resolver::OidResolver;

use crate::config::SnmpConfig;
use crate::error::{Error, TrapError};
use crate::feeder::{Feeder, Tagger};
use crate::observability::{SnmpMetrics, StructuredLogger};
use listener::TrapIntake;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Listening,
}

struct Running {
    stop_tx: broadcast::Sender<()>,
    listener: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

pub struct TrapServer {
    config: SnmpConfig,
    feeder: Arc<dyn Feeder>,
    tagger: Arc<dyn Tagger>,
    metrics: SnmpMetrics,
    logger: StructuredLogger,
    running: Option<Running>,
}

impl TrapServer {
    pub fn new(
        config: SnmpConfig,
        feeder: Arc<dyn Feeder>,
        tagger: Arc<dyn Tagger>,
        metrics: SnmpMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            config,
            feeder,
            tagger,
            metrics,
            logger,
            running: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        if self.running.is_some() {
            ListenerState::Listening
        } else {
            ListenerState::Stopped
        }
    }

    /// Load the trap databases, bind the socket and spawn both tasks
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.running.is_some() {
            return Err(TrapError::AlreadyListening.into());
        }

        let addr = self.config.trap_bind_addr()?;
        let resolver = Arc::new(OidResolver::load(&self.config.traps.db_dir).await?);
        let receiver = listener::build_receiver(addr, &self.config.trap_users()).await?;

        let (tx, rx) = mpsc::channel(self.config.traps.queue_size);
        let (stop_tx, _) = broadcast::channel(1);

        let intake = TrapIntake::new(
            self.config.trap_communities(),
            tx,
            self.metrics.clone(),
            self.logger.clone(),
        );
        let formatter = TrapFormatter::new(
            self.config.device_namespace.clone(),
            self.config.tags.clone(),
            resolver,
        );

        let listener = tokio::spawn(listener::run_listener(
            receiver,
            intake,
            stop_tx.subscribe(),
        ));
        let forwarder = tokio::spawn(forwarder::run_forwarder(
            rx,
            formatter,
            self.feeder.clone(),
            self.tagger.clone(),
            self.config.election,
            stop_tx.subscribe(),
        ));

        info!(addr = %addr, "Trap server listening");
        self.running = Some(Running {
            stop_tx,
            listener,
            forwarder,
        });
        Ok(())
    }

    /// Signal both tasks and wait for them, at most `stop_timeout_secs`
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.stop_tx.send(());

        let timeout = Duration::from_secs(self.config.traps.stop_timeout_secs);
        let listener_abort = running.listener.abort_handle();
        let forwarder_abort = running.forwarder.abort_handle();
        let joined = tokio::time::timeout(timeout, async {
            let _ = running.listener.await;
            let _ = running.forwarder.await;
        })
        .await;

        if joined.is_err() {
            warn!(timeout_secs = timeout.as_secs(), "Trap server did not stop in time, aborting");
            listener_abort.abort();
            forwarder_abort.abort();
        }
        info!("Trap server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::{MemoryFeeder, StaticTagger};
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> TrapServer {
        let mut config = SnmpConfig::default();
        config.traps.enable = true;
        config.traps.bind_host = "127.0.0.1".to_string();
        config.traps.port = 0;
        config.traps.stop_timeout_secs = 1;
        config.traps.db_dir = dir.path().to_path_buf();
        TrapServer::new(
            config,
            Arc::new(MemoryFeeder::new()),
            Arc::new(StaticTagger::with_host("agent-1")),
            SnmpMetrics::new(),
            StructuredLogger::new("test-node"),
        )
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir);
        assert_eq!(server.state(), ListenerState::Stopped);

        server.start().await.unwrap();
        assert_eq!(server.state(), ListenerState::Listening);
        assert!(matches!(
            server.start().await,
            Err(Error::Trap(TrapError::AlreadyListening))
        ));

        server.stop().await;
        assert_eq!(server.state(), ListenerState::Stopped);
        // stopping twice is a no-op
        server.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_bind_host() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir);
        server.config.traps.bind_host = "not an address".to_string();
        assert!(server.start().await.is_err());
        assert_eq!(server.state(), ListenerState::Stopped);
    }
}
