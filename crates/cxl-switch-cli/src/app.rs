//! Assembles the switch component tree and drives its lifecycle.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use cxl_fm::commands::CommandContext;
use cxl_fm::{LdStore, MctpCciExecutor};
use cxl_switch::{
    PhysicalPortManager, PortType, SwitchConfig, SwitchConnectionManager, VirtualSwitchManager,
};
use tokio::task::JoinSet;
use tracing::{error, info};

const DEFAULT_MLD_MEMORY: u64 = 256 * 1024 * 1024;

pub struct SwitchApp {
    connection_manager: Arc<SwitchConnectionManager>,
    switch_manager: Arc<VirtualSwitchManager>,
    executor: Arc<MctpCciExecutor>,
}

impl SwitchApp {
    pub fn new(
        config: &SwitchConfig,
        listen: SocketAddr,
        mctp_listen: SocketAddr,
    ) -> anyhow::Result<Self> {
        let connection_manager = SwitchConnectionManager::new(&config.port_configs, listen);
        let port_manager = PhysicalPortManager::new(&connection_manager, &config.port_configs);
        let switch_manager =
            VirtualSwitchManager::new(&config.virtual_switch_configs, port_manager.clone())
                .context("building virtual switches")?;

        // Until devices report their own topology, every DSP is presented to
        // the FM as a single-LD device.
        let ld_store = Arc::new(LdStore::new());
        for (index, port) in config.port_configs.iter().enumerate() {
            if port.port_type == PortType::Dsp {
                ld_store.seed_port(index as u8, DEFAULT_MLD_MEMORY, 1);
            }
        }

        let ctx = Arc::new(CommandContext {
            connection_manager: connection_manager.clone(),
            port_manager,
            switch_manager: switch_manager.clone(),
            ld_store,
            background: Arc::new(Mutex::new(Default::default())),
        });
        let executor = MctpCciExecutor::new(mctp_listen, ctx);

        Ok(SwitchApp {
            connection_manager,
            switch_manager,
            executor,
        })
    }

    /// Starts every component, waits for readiness, then serves until
    /// SIGINT.
    pub async fn run_until_shutdown(&self) -> anyhow::Result<()> {
        let mut tasks = JoinSet::new();
        {
            let manager = self.connection_manager.clone();
            tasks.spawn(async move {
                manager
                    .run()
                    .await
                    .map_err(|e| anyhow::anyhow!("connection manager: {e}"))
            });
        }
        {
            let vsm = self.switch_manager.clone();
            tasks.spawn(async move {
                vsm.run()
                    .await
                    .map_err(|e| anyhow::anyhow!("virtual switch manager: {e}"))
            });
        }
        {
            let executor = self.executor.clone();
            tasks.spawn(async move { executor.run().await });
        }

        self.connection_manager.wait_for_ready().await;
        self.switch_manager.wait_for_ready().await;
        self.executor.wait_for_ready().await;
        info!("switch is up");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
            joined = tasks.join_next() => {
                // A component died before shutdown was requested.
                if let Some(Ok(Err(e))) = joined {
                    error!(error = %e, "component failed");
                    self.stop_all().await;
                    return Err(e);
                }
            }
        }

        self.stop_all().await;
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Err(e)) = joined {
                error!(error = %e, "component failed during shutdown");
            }
        }
        Ok(())
    }

    async fn stop_all(&self) {
        self.executor.stop().await;
        self.switch_manager.stop().await;
        self.connection_manager.stop().await;
    }
}
