//! Shared task-loop plumbing.
//!
//! Every task subscribes to the internal control topic and polls it
//! alongside its own queues; the helpers here implement the common
//! verbs so each task's loop only handles what is specific to it.

use tracing::{info, warn};
use wheelhouse_protocol::ControlMsg;
use wheelhouse_transport::{SubSocket, TransportError};

/// What a task loop should do after a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskControl {
    Continue,
    Quit,
}

/// Handle a control message for a pauseable task: QUIT ends the loop,
/// PAUSE parks the task until RESUME (or QUIT) arrives, everything else
/// is ignored.
pub(crate) async fn pauseable_control(
    task: &str,
    msg: ControlMsg,
    control: &mut SubSocket<ControlMsg>,
) -> TaskControl {
    match msg {
        ControlMsg::Quit => TaskControl::Quit,
        ControlMsg::Pause => {
            info!(task, "paused");
            wait_for_resume(task, control).await
        }
        _ => TaskControl::Continue,
    }
}

/// Park until RESUME or QUIT. Used both for operator PAUSE and for the
/// pause-until-resume discipline after a surfaced filesystem error.
pub(crate) async fn wait_for_resume(
    task: &str,
    control: &mut SubSocket<ControlMsg>,
) -> TaskControl {
    loop {
        match control.recv().await {
            Ok(ControlMsg::Quit) => return TaskControl::Quit,
            Ok(ControlMsg::Resume) => {
                info!(task, "resumed");
                return TaskControl::Continue;
            }
            Ok(_) => continue,
            Err(TransportError::Schema(err)) => {
                warn!(task, %err, "ignoring malformed control message");
            }
            Err(_) => return TaskControl::Quit,
        }
    }
}

/// Treat a control-queue receive result uniformly: schema violations
/// are logged and skipped, a closed queue quits the task.
pub(crate) fn control_or_quit(
    task: &str,
    result: Result<ControlMsg, TransportError>,
) -> Result<ControlMsg, TaskControl> {
    match result {
        Ok(msg) => Ok(msg),
        Err(TransportError::Schema(err)) => {
            warn!(task, %err, "ignoring malformed control message");
            Err(TaskControl::Continue)
        }
        Err(_) => Err(TaskControl::Quit),
    }
}
