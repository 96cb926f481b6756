use log::{error, info};
use tokio::time::{interval, Duration};

use crate::config::Config;
use crate::modbus::slave::{ModbusSlave, SlaveListener};
use crate::modbus::transport::{ByteSink, ByteSource, SerialTransport};
use crate::utils::error::ModbusError;

/// Serves requests on a tokio interval until Ctrl-C.
pub struct SlaveService<L: SlaveListener> {
    slave: ModbusSlave<L>,
    poll_interval: Duration,
}

impl<L: SlaveListener> SlaveService<L> {
    pub fn open(config: &Config, listener: L, unit: u8) -> Result<Self, ModbusError> {
        let (reader, writer) = SerialTransport::open(config)?.split()?;
        Ok(Self::with_transport(config, listener, unit, reader, writer))
    }

    pub fn with_transport(
        config: &Config,
        listener: L,
        unit: u8,
        source: impl ByteSource + 'static,
        sink: impl ByteSink + 'static,
    ) -> Self {
        let slave = ModbusSlave::new(listener, config.slave)
            .with_unit(unit)
            .with_source(source)
            .with_sink(sink);
        Self {
            slave,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn listener(&self) -> &L {
        self.slave.listener()
    }

    pub async fn run(&mut self) {
        info!("👂 Serving requests, press Ctrl+C to stop");
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
        info!("🛑 Slave stopped");
    }

    /// Polls until `shutdown` completes.
    pub async fn run_until<F: std::future::Future<Output = ()>>(&mut self, shutdown: F) {
        let mut ticker = interval(self.poll_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.slave.poll(),
            }
        }
    }
}
