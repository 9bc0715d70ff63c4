// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Generation-checked table of live decoder bindings.
//!
//! A [`DecoderId`] is an index into the table plus the generation the slot had when the id was
//! issued. Retiring a binding bumps the slot's generation before the slot is reused, so an id
//! that outlived its decoder can never resolve to a different one.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use crate::bridge::BindingState;
use crate::bridge::ContractViolation;
use crate::bridge::DecodeCompletionSink;

/// Opaque identity of one live decoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecoderId {
    index: u32,
    generation: u32,
}

impl DecoderId {
    /// Returns the numeric handle that is passed around on the native side.
    pub fn as_raw(self) -> i64 {
        (((self.generation as u64) << 32) | self.index as u64) as i64
    }

    /// Rebuilds an id from a numeric handle. Any value is accepted; whether it names a live
    /// decoder is only known once it is resolved.
    pub fn from_raw(raw: i64) -> Self {
        let raw = raw as u64;
        Self { index: raw as u32, generation: (raw >> 32) as u32 }
    }
}

impl fmt::Display for DecoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

pub(crate) struct Binding<F> {
    pub(crate) id: DecoderId,
    pub(crate) state: BindingState,
    // Dropped on retirement.
    pub(crate) sink: Option<Box<dyn DecodeCompletionSink<F>>>,
    pub(crate) delivered: u64,
}

pub(crate) type SharedBinding<F> = Arc<Mutex<Binding<F>>>;

struct Slot<F> {
    generation: u32,
    // Set once `generation` can no longer be bumped. The last id issued for the slot stays
    // retired forever.
    exhausted: bool,
    binding: Option<SharedBinding<F>>,
}

pub(crate) struct Registry<F> {
    slots: Vec<Slot<F>>,
    free: Vec<u32>,
    live: usize,
}

impl<F> Default for Registry<F> {
    fn default() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), live: 0 }
    }
}

impl<F> Registry<F> {
    /// Binds `sink` to a fresh identity.
    pub(crate) fn insert(&mut self, sink: Box<dyn DecodeCompletionSink<F>>) -> DecoderId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot { generation: 0, exhausted: false, binding: None });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = DecoderId { index, generation: slot.generation };
        slot.binding = Some(Arc::new(Mutex::new(Binding {
            id,
            state: BindingState::Created,
            sink: Some(sink),
            delivered: 0,
        })));
        self.live += 1;

        id
    }

    pub(crate) fn resolve(&self, id: DecoderId) -> Result<SharedBinding<F>, ContractViolation> {
        let slot = self.slots.get(id.index as usize).ok_or(ContractViolation::UnknownDecoder(id))?;

        match &slot.binding {
            Some(binding) if slot.generation == id.generation => Ok(Arc::clone(binding)),
            _ if id.generation < slot.generation => Err(ContractViolation::Retired(id)),
            None if slot.exhausted && id.generation == slot.generation => {
                Err(ContractViolation::Retired(id))
            }
            _ => Err(ContractViolation::UnknownDecoder(id)),
        }
    }

    /// Unlinks the binding for `id` and returns it so the caller can finish retiring it.
    pub(crate) fn remove(&mut self, id: DecoderId) -> Result<SharedBinding<F>, ContractViolation> {
        let binding = self.resolve(id)?;
        let slot = &mut self.slots[id.index as usize];

        slot.binding = None;
        self.live -= 1;
        // A slot whose generation cannot grow any further is never handed out again.
        if let Some(generation) = slot.generation.checked_add(1) {
            slot.generation = generation;
            self.free.push(id.index);
        } else {
            log::debug!("slot {} exhausted its generations", id.index);
            slot.exhausted = true;
        }

        Ok(binding)
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }
}
