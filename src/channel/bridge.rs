//! Bridging a pulled upstream into a push-style input
//!
//! `Bridge` lets a channel read from a [`BridgeInput`] instead of its piped
//! upstream. When the instruction runs, the upstream executor is detached and
//! drained by a daemon fiber that pushes each element, failure, or done value
//! into the input. The channel then consumes the input with
//! [`BridgeInput::channel`].

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::continuation::Finalizer;
use super::driver::read_upstream;
use super::executor::{ChannelExecutor, Cursor, ExecutorState};
use super::types::{Channel, ChannelState};
use crate::effect::{Cause, Effect, Exit, Fiber};
use crate::errors;
use crate::types::Val;

pub const DEFAULT_BRIDGE_CAPACITY: usize = 1;

enum InputSignal {
    Element(Val),
    Failed(Cause),
    Done(Val),
}

struct BridgeShared {
    tx: mpsc::Sender<InputSignal>,
    rx: tokio::sync::Mutex<mpsc::Receiver<InputSignal>>,
    /// Terminal signal, once the consumer has seen it
    finished: Mutex<Option<Exit>>,
}

/// Bounded hand-off between a producer and the channel reading from it
///
/// The capacity bounds how far the producer may run ahead of the reader.
#[derive(Clone)]
pub struct BridgeInput {
    shared: Arc<BridgeShared>,
}

impl Default for BridgeInput {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeInput {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BRIDGE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        BridgeInput {
            shared: Arc::new(BridgeShared {
                tx,
                rx: tokio::sync::Mutex::new(rx),
                finished: Mutex::new(None),
            }),
        }
    }

    /* ===================== Producer side ===================== */

    /// Wait until the reader has room for one more signal
    pub async fn await_read(&self) {
        let _ = self.shared.tx.reserve().await;
    }

    pub async fn emit(&self, value: Val) {
        self.send(InputSignal::Element(value)).await;
    }

    pub async fn error(&self, cause: Cause) {
        self.send(InputSignal::Failed(cause)).await;
    }

    pub async fn done(&self, value: Val) {
        self.send(InputSignal::Done(value)).await;
    }

    async fn send(&self, signal: InputSignal) {
        if self.shared.tx.send(signal).await.is_err() {
            debug!("Bridge reader is gone; dropping signal");
        }
    }

    /* ===================== Consumer side ===================== */

    /// The terminal outcome, once the reader has taken it
    pub fn finished(&self) -> Option<Exit> {
        self.shared.finished.lock().clone()
    }

    /// Take the next signal
    ///
    /// Succeeds with the element, or with unit once the done value has been
    /// recorded. A failure signal fails the effect.
    pub fn take(&self) -> Effect {
        let this = self.clone();
        Effect::from_future(async move {
            let finished = this.finished();
            if let Some(exit) = finished {
                return exit.map(|_| Val::Unit);
            }
            let signal = this.shared.rx.lock().await.recv().await;
            match signal {
                Some(InputSignal::Element(value)) => Exit::Success(value),
                Some(InputSignal::Failed(cause)) => {
                    *this.shared.finished.lock() = Some(Exit::Failure(cause.clone()));
                    Exit::Failure(cause)
                }
                Some(InputSignal::Done(value)) => {
                    *this.shared.finished.lock() = Some(Exit::Success(value));
                    Exit::unit()
                }
                None => Exit::die(errors::BRIDGE_CLOSED, "bridge producer went away"),
            }
        })
    }

    /// A channel emitting every element and ending with the producer's outcome
    pub fn channel(&self) -> Channel {
        let source = self.clone();
        let input = self.clone();
        Channel::from_effect(move || source.take()).flat_map(move |value| match input.finished() {
            Some(Exit::Success(done)) => Channel::succeed_now(done),
            Some(Exit::Failure(cause)) => Channel::fail_cause(cause),
            None => {
                let input = input.clone();
                Channel::emit(value).flat_map(move |_| input.channel())
            }
        })
    }
}

/// Pump `upstream` into `sink` until it finishes
pub(crate) fn drain_into(upstream: ChannelExecutor, sink: BridgeInput) -> Effect {
    Effect::from_fn(move |ctx| async move {
        loop {
            sink.await_read().await;
            match upstream.run() {
                ChannelState::Done(Exit::Success(done)) => {
                    sink.done(done).await;
                    return Exit::unit();
                }
                ChannelState::Done(Exit::Failure(cause)) => {
                    sink.error(cause).await;
                    return Exit::unit();
                }
                ChannelState::Emit => {
                    if let Some(value) = upstream.emitted() {
                        sink.emit(value).await;
                    }
                }
                ChannelState::FromEffect(effect) => {
                    if let Exit::Failure(cause) = effect.run(ctx.clone()).await {
                        sink.error(cause).await;
                        return Exit::unit();
                    }
                }
                ChannelState::Read(request) => {
                    if let Exit::Failure(cause) = read_upstream(request, &ctx).await {
                        sink.error(cause).await;
                        return Exit::unit();
                    }
                }
            }
        }
    })
}

impl ExecutorState {
    /// Detach the input and start draining it into `input`
    pub(crate) fn bridge(
        &mut self,
        this: &ChannelExecutor,
        input: BridgeInput,
        inner: Channel,
    ) -> Option<ChannelState> {
        self.cursor = Cursor::Channel(inner);
        let upstream = self.input.take()?;
        let weak = this.downgrade();

        Some(ChannelState::FromEffect(Effect::from_fn(move |ctx| async move {
            let drainer = drain_into(upstream.clone(), input);
            let fiber = Fiber::fork_daemon(drainer, ctx);
            debug!(fiber = %fiber.id(), upstream = upstream.id(), "Forked bridge drainer");

            let Some(this) = weak.upgrade() else {
                fiber.interrupt().await;
                return Exit::unit();
            };
            let restore = this.downgrade();
            this.lock().done_stack.push_finalizer(Finalizer::new(move |exit| {
                let exit = exit.clone();
                fiber.interrupt_effect().zip_right(Effect::suspend(move || {
                    let released = match restore.upgrade() {
                        Some(this) => this.restore_pipe(&exit, Some(upstream)),
                        None => upstream.close(&exit),
                    };
                    released.unwrap_or_else(Effect::unit)
                }))
            }));
            Exit::unit()
        })))
    }
}
