//! # Command Queue
//!
//! Deferred, FIFO handler invocations. Commands are enqueued with a payload
//! and executed later by [`CommandQueue::drain`]; the queue lock is released
//! before any handler runs, so handlers may enqueue follow-up commands, which
//! are picked up by the next drain. Sequence numbers are assigned under the
//! same lock as the push, so drain order always follows sequence order.

use crate::context::Context;
use crate::handler::{invoke, Handler, HandlerRef, Outcome};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

struct QueuedCommand {
    sequence: u64,
    handler: HandlerRef,
    payload: Value,
}

struct PendingCommands {
    commands: VecDeque<QueuedCommand>,
    next_sequence: u64,
}

/// Result of executing one queued command.
#[derive(Debug, Clone)]
pub struct CommandReceipt {
    pub sequence: u64,
    pub handler: String,
    pub outcome: Outcome,
    pub context: Context,
}

pub struct CommandQueue {
    pending: Mutex<PendingCommands>,
    catch_panics: bool,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(PendingCommands {
                commands: VecDeque::new(),
                next_sequence: 1,
            }),
            catch_panics: true,
        }
    }

    #[must_use]
    pub fn with_panic_capture(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    /// Queue `handler` to run against `payload`; returns its sequence number.
    pub fn enqueue(&self, handler: HandlerRef, payload: Value) -> u64 {
        let name = handler.name().to_string();
        let sequence = {
            let mut pending = self.pending.lock();
            let sequence = pending.next_sequence;
            pending.next_sequence += 1;
            pending.commands.push_back(QueuedCommand {
                sequence,
                handler,
                payload,
            });
            sequence
        };
        debug!(sequence, handler = %name, "Command enqueued");
        sequence
    }

    /// Run every command queued so far, oldest first.
    ///
    /// With panic capture off, a panicking handler unwinds out of `drain`.
    /// The commands after it in the batch are put back at the front of the
    /// queue before the panic resumes; the panicking command itself and the
    /// receipts of commands already run in this batch are lost.
    pub fn drain(&self) -> Vec<CommandReceipt> {
        let mut batch = std::mem::take(&mut self.pending.lock().commands);
        let mut receipts = Vec::with_capacity(batch.len());

        while let Some(command) = batch.pop_front() {
            let mut context = Context::from_payload(command.payload);
            let evaluated = catch_unwind(AssertUnwindSafe(|| {
                invoke(command.handler.as_ref(), &mut context, self.catch_panics)
            }));
            let outcome = match evaluated {
                Ok((_, outcome)) => outcome.unwrap_or(Outcome::PassThrough),
                Err(panic) => {
                    warn!(
                        sequence = command.sequence,
                        handler = command.handler.name(),
                        requeued = batch.len(),
                        "Queued command panicked, returning the rest of the batch to the queue"
                    );
                    self.requeue_front(batch);
                    resume_unwind(panic)
                }
            };

            if let Outcome::Fault(reason) = &outcome {
                warn!(
                    sequence = command.sequence,
                    handler = command.handler.name(),
                    reason = %reason,
                    "Queued command faulted"
                );
            }

            receipts.push(CommandReceipt {
                sequence: command.sequence,
                handler: command.handler.name().to_string(),
                outcome,
                context,
            });
        }

        receipts
    }

    fn requeue_front(&self, batch: VecDeque<QueuedCommand>) {
        let mut pending = self.pending.lock();
        for command in batch.into_iter().rev() {
            pending.commands.push_front(command);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().commands.is_empty()
    }

    /// Drop pending commands without running them; returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let dropped = pending.commands.len();
        pending.commands.clear();
        dropped
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.len())
            .field("catch_panics", &self.catch_panics)
            .finish()
    }
}
