// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode-completion bridge.
//!
//! Each native decoder is bound to one [`DecodeCompletionSink`] through
//! [`CompletionBridge::create_callback`]. The returned [`CallbackHandle`] only stores the
//! decoder's [`DecoderId`]; every invocation resolves that id again, so a handle used after its
//! decoder was retired reports a [`ContractViolation`] instead of reaching a stale sink.
//!
//! Delivery is synchronous on the calling thread. Events for one decoder are handed to its sink
//! one at a time, while distinct decoders deliver concurrently.

mod registry;

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use anyhow::anyhow;
use thiserror::Error;

use crate::settings::DecoderSettings;
use crate::status::VideoCodecStatus;

use registry::Registry;

pub use registry::DecoderId;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Misuse of the bridge by the native side. These cannot be remedied at runtime.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("decoder {0} was never bound")]
    UnknownDecoder(DecoderId),
    #[error("decoder {0} has been retired")]
    Retired(DecoderId),
    #[error("invalid decoder settings {0:?}")]
    InvalidSettings(DecoderSettings),
    #[error("negative decode time {0}ms")]
    NegativeDecodeTime(i32),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
    #[error("failed to deliver decoded frame of decoder {id}: {cause:#}")]
    DeliveryFailure { id: DecoderId, cause: anyhow::Error },
}

/// One completed decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrameEvent<F> {
    pub frame: F,
    /// Time spent decoding, if the decoder measured it.
    pub decode_time_ms: Option<u32>,
    /// Quantization parameter of the frame, if known.
    pub qp: Option<i32>,
}

/// Consumer side of the bridge.
///
/// `on_frame_decoded` runs on whatever thread the decoder completes frames on, and blocks that
/// thread until it returns. Implementations that need the events on a thread of their own can use
/// [`ChannelSink`].
///
/// The binding of a decoder stays locked while its sink runs, so `on_frame_decoded` must not call
/// back into the bridge for its own decoder: retiring it, querying its state or delivering
/// another frame through its handle all deadlock. Calls for other decoders are fine.
pub trait DecodeCompletionSink<F>: Send + Sync {
    fn on_frame_decoded(&self, event: DecodedFrameEvent<F>) -> anyhow::Result<()>;
}

impl<F, T> DecodeCompletionSink<F> for T
where
    T: Fn(DecodedFrameEvent<F>) -> anyhow::Result<()> + Send + Sync,
{
    fn on_frame_decoded(&self, event: DecodedFrameEvent<F>) -> anyhow::Result<()> {
        self(event)
    }
}

/// Sink forwarding events into a channel. Delivery fails once the receiver is dropped.
pub struct ChannelSink<F> {
    sender: Sender<DecodedFrameEvent<F>>,
}

impl<F> ChannelSink<F> {
    pub fn new(sender: Sender<DecodedFrameEvent<F>>) -> Self {
        Self { sender }
    }
}

impl<F: Send> DecodeCompletionSink<F> for ChannelSink<F> {
    fn on_frame_decoded(&self, event: DecodedFrameEvent<F>) -> anyhow::Result<()> {
        self.sender.send(event).map_err(|_| anyhow!("frame consumer has gone away"))
    }
}

/// Lifecycle of a decoder binding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindingState {
    /// Bound, no frame delivered yet.
    Created,
    /// At least one frame has gone through.
    Active,
    /// The decoder was destroyed. Nothing is delivered anymore.
    Retired,
}

// A sink that panicked leaves its binding in a consistent state, so poisoning is ignored.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes completed frames from native decoders to the sink bound to each of them.
///
/// Cloning is cheap and all clones share the same set of bindings.
pub struct CompletionBridge<F> {
    registry: Arc<Mutex<Registry<F>>>,
}

impl<F> Clone for CompletionBridge<F> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry) }
    }
}

impl<F: Send + 'static> Default for CompletionBridge<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Send + 'static> CompletionBridge<F> {
    pub fn new() -> Self {
        Self { registry: Default::default() }
    }

    /// Binds `sink` to a new decoder identity and returns the callback the native decoder
    /// invokes for each completed frame.
    pub fn create_callback(
        &self,
        sink: impl DecodeCompletionSink<F> + 'static,
    ) -> CallbackHandle<F> {
        let id = lock(&self.registry).insert(Box::new(sink));
        log::debug!("bound decoder {id}");

        CallbackHandle { id, bridge: self.clone() }
    }

    /// Native-facing entry point: delivers `frame` for the decoder named by the raw handle
    /// `native_decoder`, using the boundary's integer types for the optional metadata.
    pub fn on_decoded_frame(
        &self,
        native_decoder: i64,
        frame: F,
        decode_time_ms: Option<i32>,
        qp: Option<i32>,
    ) -> VideoCodecStatus {
        let id = DecoderId::from_raw(native_decoder);
        let decode_time_ms = match decode_time_ms.map(u32::try_from).transpose() {
            Ok(decode_time_ms) => decode_time_ms,
            Err(_) => {
                let err = BridgeError::from(ContractViolation::NegativeDecodeTime(
                    decode_time_ms.unwrap_or_default(),
                ));
                log::warn!("dropping frame of decoder {id}: {err}");
                return VideoCodecStatus::from(&err);
            }
        };

        match self.deliver(id, DecodedFrameEvent { frame, decode_time_ms, qp }) {
            Ok(()) => VideoCodecStatus::Ok,
            Err(err) => VideoCodecStatus::from(&err),
        }
    }

    fn deliver(&self, id: DecoderId, event: DecodedFrameEvent<F>) -> Result<()> {
        let binding = lock(&self.registry).resolve(id).map_err(|violation| {
            log::warn!("frame completed for unusable decoder: {violation}");
            violation
        })?;

        // Held for the whole delivery. This serializes events of one decoder and lets `retire`
        // wait for in-flight deliveries.
        let mut binding = lock(&binding);
        if binding.state == BindingState::Retired {
            log::warn!("frame completed for retired decoder {id}");
            return Err(ContractViolation::Retired(id).into());
        }
        if binding.state == BindingState::Created {
            log::debug!("decoder {} is now active", binding.id);
            binding.state = BindingState::Active;
        }

        let sink = binding.sink.as_ref().ok_or(ContractViolation::Retired(id))?;
        log::trace!(
            "delivering frame of decoder {id} (decode time {:?}, qp {:?})",
            event.decode_time_ms,
            event.qp
        );
        sink.on_frame_decoded(event).map_err(|cause| {
            log::error!("failed to deliver frame of decoder {id}: {cause:#}");
            BridgeError::DeliveryFailure { id, cause }
        })?;
        binding.delivered += 1;

        Ok(())
    }

    /// Retires the decoder `id`, returning the number of frames that were delivered for it.
    ///
    /// Waits for a delivery in progress on `id` to complete. Once this returns, the sink has been
    /// dropped and any later invocation for `id` fails with [`ContractViolation::Retired`].
    pub fn retire(&self, id: DecoderId) -> Result<u64> {
        let binding = lock(&self.registry).remove(id).map_err(|violation| {
            log::warn!("cannot retire decoder: {violation}");
            violation
        })?;

        let mut binding = lock(&binding);
        binding.state = BindingState::Retired;
        binding.sink = None;
        log::debug!("retired decoder {id} after {} frames", binding.delivered);

        Ok(binding.delivered)
    }

    /// Returns the lifecycle state of `id`, or `None` if it was never issued.
    pub fn state(&self, id: DecoderId) -> Option<BindingState> {
        let resolved = lock(&self.registry).resolve(id);
        match resolved {
            Ok(binding) => {
                let state = lock(&binding).state;
                Some(state)
            }
            Err(ContractViolation::Retired(_)) => Some(BindingState::Retired),
            Err(_) => None,
        }
    }

    /// Number of decoders currently bound.
    pub fn live_decoders(&self) -> usize {
        lock(&self.registry).live()
    }
}

/// Callback bound to exactly one decoder identity for that decoder's whole lifetime.
pub struct CallbackHandle<F> {
    id: DecoderId,
    bridge: CompletionBridge<F>,
}

impl<F: Send + 'static> CallbackHandle<F> {
    pub fn id(&self) -> DecoderId {
        self.id
    }

    /// Hands `frame` and its metadata to the sink of this decoder. The frame is consumed whether
    /// or not delivery succeeds.
    pub fn on_decoded_frame(
        &self,
        frame: F,
        decode_time_ms: Option<u32>,
        qp: Option<i32>,
    ) -> Result<()> {
        self.bridge.deliver(self.id, DecodedFrameEvent { frame, decode_time_ms, qp })
    }

    /// Retires this handle's decoder. See [`CompletionBridge::retire`].
    pub fn retire(&self) -> Result<u64> {
        self.bridge.retire(self.id)
    }
}
