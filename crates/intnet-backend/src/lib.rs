#![forbid(unsafe_code)]

//! Client side of the internal network: a NIC model hands Ethernet frames to a
//! [`NetworkBackend`] and polls it for received ones. [`IntNetBackend`] is the
//! backend attached to a switch interface.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

pub mod config;
pub mod error;
mod intnet_backend;

pub use config::OpenConfig;
pub use error::BackendError;
pub use intnet_backend::{
    IntNetBackend, IntNetBackendStats, DEFAULT_MAX_FRAME_BYTES, MAX_RX_POPS_PER_POLL,
};

/// A host-side network backend.
pub trait NetworkBackend {
    /// Queues a guest-to-host Ethernet frame.
    fn transmit(&mut self, frame: Vec<u8>);

    /// Returns the next host-to-guest frame, if one is ready.
    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// Counters for backends attached to a switch interface.
    fn stats(&self) -> Option<IntNetBackendStats> {
        None
    }
}

impl<T: NetworkBackend + ?Sized> NetworkBackend for Box<T> {
    fn transmit(&mut self, frame: Vec<u8>) {
        <T as NetworkBackend>::transmit(&mut **self, frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        <T as NetworkBackend>::poll_receive(&mut **self)
    }

    fn stats(&self) -> Option<IntNetBackendStats> {
        <T as NetworkBackend>::stats(&**self)
    }
}

impl<T: NetworkBackend + ?Sized> NetworkBackend for &mut T {
    fn transmit(&mut self, frame: Vec<u8>) {
        <T as NetworkBackend>::transmit(&mut **self, frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        <T as NetworkBackend>::poll_receive(&mut **self)
    }

    fn stats(&self) -> Option<IntNetBackendStats> {
        <T as NetworkBackend>::stats(&**self)
    }
}

/// Discards everything; useful as a placeholder while no network is attached.
impl NetworkBackend for () {
    fn transmit(&mut self, _frame: Vec<u8>) {}
}

impl<T: NetworkBackend> NetworkBackend for Option<T> {
    fn transmit(&mut self, frame: Vec<u8>) {
        if let Some(backend) = self.as_mut() {
            backend.transmit(frame);
        }
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.as_mut().and_then(|backend| backend.poll_receive())
    }

    fn stats(&self) -> Option<IntNetBackendStats> {
        self.as_ref().and_then(|backend| backend.stats())
    }
}

impl<T: NetworkBackend> NetworkBackend for RefCell<T> {
    fn transmit(&mut self, frame: Vec<u8>) {
        self.get_mut().transmit(frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.get_mut().poll_receive()
    }

    fn stats(&self) -> Option<IntNetBackendStats> {
        self.borrow().stats()
    }
}

impl<T: NetworkBackend> NetworkBackend for Rc<RefCell<T>> {
    fn transmit(&mut self, frame: Vec<u8>) {
        self.borrow_mut().transmit(frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.borrow_mut().poll_receive()
    }

    fn stats(&self) -> Option<IntNetBackendStats> {
        self.borrow().stats()
    }
}

impl<T: NetworkBackend> NetworkBackend for Mutex<T> {
    fn transmit(&mut self, frame: Vec<u8>) {
        self.get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .transmit(frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .poll_receive()
    }

    fn stats(&self) -> Option<IntNetBackendStats> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stats()
    }
}

impl<T: NetworkBackend> NetworkBackend for Arc<Mutex<T>> {
    fn transmit(&mut self, frame: Vec<u8>) {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .transmit(frame);
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .poll_receive()
    }

    fn stats(&self) -> Option<IntNetBackendStats> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stats()
    }
}
