//! Forwards every transaction class between two fifo bundles.
//!
//! This is the glue a bind creates: the vPPB's downstream side on the left,
//! the bound downstream port's side on the right. Host→target traffic flows
//! left to right, target→host traffic right to left. A stop queues sentinels
//! behind any in-flight packets, so traffic already accepted still reaches
//! its destination before the splice winds down.

use std::sync::Arc;

use tracing::debug;

use crate::fifo::{Connection, Fifo};
use crate::runnable::{ComponentState, Lifecycle};
use crate::TransportError;

#[derive(Debug)]
pub struct Splice {
    left: Arc<Connection>,
    right: Arc<Connection>,
    lifecycle: Lifecycle,
    label: String,
}

impl Splice {
    pub fn new(left: Arc<Connection>, right: Arc<Connection>, label: impl Into<String>) -> Arc<Self> {
        Arc::new(Splice {
            left,
            right,
            lifecycle: Lifecycle::new(),
            label: label.into(),
        })
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn run(&self) -> Result<(), TransportError> {
        self.lifecycle.begin_start()?;
        self.lifecycle.set_running();

        let pairs = self.left.pairs();
        let right_pairs = self.right.pairs();
        let mut pumps = Vec::with_capacity(10);
        for (left_pair, right_pair) in pairs.into_iter().zip(right_pairs) {
            pumps.push(Self::pump(&left_pair.host_to_target, &right_pair.host_to_target));
            pumps.push(Self::pump(&right_pair.target_to_host, &left_pair.target_to_host));
        }
        futures::future::join_all(pumps).await;

        self.lifecycle.set_stopped();
        debug!(label = %self.label, "splice exited");
        Ok(())
    }

    async fn pump(from: &Fifo, to: &Fifo) {
        while let Some(packet) = from.recv().await {
            if to.send(packet).await.is_err() {
                break;
            }
        }
    }

    /// Queues sentinels on both inflow directions and waits for the pumps to
    /// drain. Idempotent.
    pub async fn stop(&self) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        for pair in self.left.pairs() {
            pair.host_to_target.send_sentinel().await;
        }
        for pair in self.right.pairs() {
            pair.target_to_host.send_sentinel().await;
        }
        self.lifecycle.wait_for(ComponentState::Stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxl_proto::mem::CxlMemPacket;
    use cxl_proto::Packet;

    #[tokio::test]
    async fn forwards_both_directions_and_drains_on_stop() {
        let left = Connection::new();
        let right = Connection::new();
        let splice = Splice::new(left.clone(), right.clone(), "test");
        let task = {
            let splice = splice.clone();
            tokio::spawn(async move { splice.run().await })
        };

        let down = Packet::Mem(CxlMemPacket::mem_rd(0x4000, 0).unwrap());
        let up = Packet::Mem(CxlMemPacket::cmp(cxl_proto::mem::NdrOpcode::Cmp, 1, 0));
        left.cxl_mem.host_to_target.send(down.clone()).await.unwrap();
        right.cxl_mem.target_to_host.send(up.clone()).await.unwrap();

        assert_eq!(right.cxl_mem.host_to_target.recv().await, Some(down));
        assert_eq!(left.cxl_mem.target_to_host.recv().await, Some(up));

        // Packets queued before the stop still cross the splice.
        let late = Packet::Mem(CxlMemPacket::mem_rd(0x8000, 0).unwrap());
        left.cxl_mem.host_to_target.send(late.clone()).await.unwrap();
        let (stopped, received) = tokio::join!(splice.stop(), right.cxl_mem.host_to_target.recv());
        let _ = stopped;
        assert_eq!(received, Some(late));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn repeated_stop_is_a_no_op() {
        let splice = Splice::new(Connection::new(), Connection::new(), "test");
        let task = {
            let splice = splice.clone();
            tokio::spawn(async move { splice.run().await })
        };
        splice.stop().await;
        splice.stop().await;
        task.await.unwrap().unwrap();
    }
}
