//! The control plane.
//!
//! Bridges the outside world to the internal topics: external control
//! verbs are validated and relayed onto the internal control broadcast
//! every task subscribes to, and internal status events are fanned out
//! to external monitors. Unrecoverable faults elsewhere arrive on the
//! quit intake and trigger the same orderly shutdown as an operator
//! QUIT.

use tracing::{info, warn};
use wheelhouse_protocol::{ControlMsg, StatusEvent};
use wheelhouse_transport::{Context, PubSocket, PullSocket, TransportError};

use crate::config::{INT_CONTROL_QUEUE, INT_QUIT_QUEUE, INT_STATUS_QUEUE, MasterConfig};

const TASK: &str = "master::high_priest";

pub struct HighPriest {
    ext_control: PullSocket<ControlMsg>,
    ext_status: PubSocket<StatusEvent>,
    int_control: PubSocket<ControlMsg>,
    int_status: PullSocket<StatusEvent>,
    quit_intake: PullSocket<ControlMsg>,
}

impl HighPriest {
    pub async fn new(ctx: &Context, config: &MasterConfig) -> anyhow::Result<Self> {
        Ok(Self {
            ext_control: ctx.pull(&config.control_queue, 1).await?,
            ext_status: ctx.publish(&config.status_queue, 16).await?,
            int_control: ctx.publish(INT_CONTROL_QUEUE, 16).await?,
            int_status: ctx.pull(INT_STATUS_QUEUE, 64).await?,
            quit_intake: ctx.pull(INT_QUIT_QUEUE, 4).await?,
        })
    }

    /// The bound external control endpoint.
    pub fn control_addr(&self) -> Option<std::net::SocketAddr> {
        self.ext_control.local_addr()
    }

    /// The bound external status endpoint.
    pub fn status_addr(&self) -> Option<std::net::SocketAddr> {
        self.ext_status.local_addr()
    }

    pub async fn run(mut self) {
        info!(task = TASK, "starting");
        loop {
            tokio::select! {
                msg = self.ext_control.recv() => {
                    match msg {
                        Ok(msg) => {
                            if self.relay_control(msg).await {
                                break;
                            }
                        }
                        Err(TransportError::Schema(err)) => {
                            warn!(task = TASK, %err, "rejecting invalid control message");
                        }
                        Err(_) => break,
                    }
                }
                event = self.int_status.recv() => {
                    match event {
                        Ok(event) => {
                            let _ = self.ext_status.send(&event).await;
                        }
                        Err(TransportError::Schema(err)) => {
                            warn!(task = TASK, %err, "dropping invalid status event");
                        }
                        Err(_) => break,
                    }
                }
                quit = self.quit_intake.recv() => {
                    match quit {
                        Ok(ControlMsg::Quit) => {
                            warn!(task = TASK, "a task raised QUIT; shutting down");
                            let _ = self.int_control.send(&ControlMsg::Quit).await;
                            break;
                        }
                        Ok(other) => {
                            warn!(task = TASK, verb = other.verb(), "unexpected quit-intake verb");
                        }
                        Err(TransportError::Schema(_)) => {}
                        Err(_) => break,
                    }
                }
            }
        }
        info!(task = TASK, "stopped");
    }

    /// Relay one validated verb; returns true when the master should
    /// shut down.
    async fn relay_control(&mut self, msg: ControlMsg) -> bool {
        match msg {
            ControlMsg::Quit => warn!(task = TASK, "shutting down on QUIT"),
            ControlMsg::Pause => warn!(task = TASK, "pausing operations"),
            ControlMsg::Resume => warn!(task = TASK, "resuming operations"),
            ControlMsg::Kill(slave_id) => warn!(task = TASK, slave_id, "killing builder"),
            _ => info!(task = TASK, verb = msg.verb(), "relaying control message"),
        }
        let _ = self.int_control.send(&msg).await;
        matches!(msg, ControlMsg::Quit)
    }
}
