// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A non-blocking counting gate that limits concurrent executions.
///
/// A bounded gate hands out at most `capacity` [`Permit`]s at a time. Acquiring never waits:
/// [`try_acquire`][PermitGate::try_acquire] either returns a permit immediately or returns `None`.
/// The permit is released when it is dropped, so a permit can neither be released twice nor be
/// released without having been acquired.
///
/// The capacity can be changed at any time with [`set_capacity`][PermitGate::set_capacity].
/// Permits already handed out stay valid when the capacity shrinks.
///
/// An unbounded gate always grants permits and does no accounting. Commands isolated on a
/// worker pool use it, since the pool already bounds their concurrency.
///
/// Cloning a gate is cheap and the clones share the same permits.
///
/// # Examples
///
/// ```
/// use bulwark::PermitGate;
///
/// let gate = PermitGate::bounded(1);
///
/// let permit = gate.try_acquire().expect("a permit is available");
/// assert!(gate.try_acquire().is_none());
///
/// drop(permit);
/// assert!(gate.try_acquire().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct PermitGate(GateKind);

#[derive(Debug, Clone)]
enum GateKind {
    Bounded(Arc<BoundedGate>),
    Unbounded,
}

#[derive(Debug)]
struct BoundedGate {
    in_use: AtomicUsize,
    capacity: AtomicUsize,
}

impl PermitGate {
    /// Creates a gate that allows `capacity` concurrent permits.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self(GateKind::Bounded(Arc::new(BoundedGate {
            in_use: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity),
        })))
    }

    /// Creates a gate that always grants permits.
    #[must_use]
    pub fn unbounded() -> Self {
        Self(GateKind::Unbounded)
    }

    /// Tries to acquire a permit without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Permit> {
        match &self.0 {
            GateKind::Unbounded => Some(Permit { gate: None }),
            GateKind::Bounded(gate) => {
                let previous = gate.in_use.fetch_add(1, Ordering::AcqRel);

                if previous >= gate.capacity.load(Ordering::Acquire) {
                    gate.in_use.fetch_sub(1, Ordering::AcqRel);
                    return None;
                }

                Some(Permit {
                    gate: Some(Arc::clone(gate)),
                })
            }
        }
    }

    /// Changes the number of permits the gate allows. Has no effect on an unbounded gate.
    pub fn set_capacity(&self, capacity: usize) {
        if let GateKind::Bounded(gate) = &self.0 {
            gate.capacity.store(capacity, Ordering::Release);
        }
    }

    /// The current capacity, or `None` for an unbounded gate.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        match &self.0 {
            GateKind::Bounded(gate) => Some(gate.capacity.load(Ordering::Acquire)),
            GateKind::Unbounded => None,
        }
    }

    /// The number of permits currently held. Always zero for an unbounded gate.
    #[must_use]
    pub fn permits_in_use(&self) -> usize {
        match &self.0 {
            GateKind::Bounded(gate) => gate.in_use.load(Ordering::Acquire),
            GateKind::Unbounded => 0,
        }
    }

    /// Returns `true` for a gate created with [`PermitGate::bounded`].
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        matches!(self.0, GateKind::Bounded(_))
    }
}

/// A permit handed out by a [`PermitGate`]. Dropping it releases the permit.
#[derive(Debug)]
#[must_use = "the permit is released as soon as it is dropped"]
pub struct Permit {
    gate: Option<Arc<BoundedGate>>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.in_use.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
