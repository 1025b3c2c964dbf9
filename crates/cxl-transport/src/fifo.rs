//! Bounded packet fifos with a drain-and-stop sentinel.

use std::sync::Arc;

use cxl_proto::Packet;
use tokio::sync::{mpsc, Mutex};

use crate::TransportError;

/// Queue depth of every fifo. Enqueue blocks when full; nothing is dropped.
pub const FIFO_CAPACITY: usize = 256;

/// One direction of a fifo pair. `None` on the channel means "drain what is
/// ahead of this marker, then stop".
#[derive(Debug)]
pub struct Fifo {
    tx: mpsc::Sender<Option<Packet>>,
    rx: Mutex<mpsc::Receiver<Option<Packet>>>,
}

impl Fifo {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(FIFO_CAPACITY);
        Fifo {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub async fn send(&self, packet: Packet) -> Result<(), TransportError> {
        self.tx
            .send(Some(packet))
            .await
            .map_err(|_| TransportError::FifoClosed)
    }

    /// Queues the stop sentinel behind any in-flight packets.
    pub async fn send_sentinel(&self) {
        let _ = self.tx.send(None).await;
    }

    /// Next packet, or `None` once the sentinel (or a closed channel) is
    /// reached.
    pub async fn recv(&self) -> Option<Packet> {
        self.rx.lock().await.recv().await.flatten()
    }
}

/// The two directions of one transaction class.
#[derive(Debug)]
pub struct FifoPair {
    pub host_to_target: Fifo,
    pub target_to_host: Fifo,
}

impl FifoPair {
    fn new() -> Self {
        FifoPair {
            host_to_target: Fifo::new(),
            target_to_host: Fifo::new(),
        }
    }
}

/// The five fifo pairs carried by every port and vPPB side.
#[derive(Debug)]
pub struct Connection {
    pub cfg: FifoPair,
    pub mmio: FifoPair,
    pub cxl_mem: FifoPair,
    pub cxl_cache: FifoPair,
    pub cci: FifoPair,
}

impl Connection {
    pub fn new() -> Arc<Self> {
        Arc::new(Connection {
            cfg: FifoPair::new(),
            mmio: FifoPair::new(),
            cxl_mem: FifoPair::new(),
            cxl_cache: FifoPair::new(),
            cci: FifoPair::new(),
        })
    }

    pub fn pairs(&self) -> [&FifoPair; 5] {
        [
            &self.cfg,
            &self.mmio,
            &self.cxl_mem,
            &self.cxl_cache,
            &self.cci,
        ]
    }
}
