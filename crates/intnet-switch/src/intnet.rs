//! The switch service: the registry of networks and interface handles, and
//! the request entry points clients and the ring-0 glue call.
//!
//! Lock order is the big mutex, then the handle table, then a network's table
//! lock. `send`, `wait` and `abort_wait` never take the big mutex.

use crate::config::IntNetConfig;
use crate::error::{IntNetError, Result};
use crate::interface::{lock, Interface};
use crate::network::Network;
use crate::policy::interface_flags;
use crate::session::{IfHandle, Session};
use intnet_ipc::IntNetBuf;
use intnet_protocol::{MacAddr, OpenFlags, OpenRequest, TrunkType};
use intnet_trunk::{IfId, TrunkFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Handle values start here so a zeroed handle is never valid.
const FIRST_HANDLE: u32 = 0x0001_0001;

/// Everything the big mutex protects.
#[derive(Debug)]
pub(crate) struct Registry {
    pub networks: Vec<Arc<Network>>,
    next_if_id: u32,
    next_handle: u32,
    interfaces: usize,
    pub shut_down: bool,
}

impl Registry {
    pub fn contains(&self, network: &Arc<Network>) -> bool {
        self.networks.iter().any(|n| Arc::ptr_eq(n, network))
    }

    fn find(&self, name: &str) -> Option<&Arc<Network>> {
        self.networks.iter().find(|n| n.name == name)
    }

    fn remove(&mut self, network: &Arc<Network>) {
        self.networks.retain(|n| !Arc::ptr_eq(n, network));
    }
}

struct HandleEntry {
    iface: Arc<Interface>,
    network: Arc<Network>,
}

pub(crate) struct Shared {
    config: IntNetConfig,
    pub big: Mutex<Registry>,
    handles: RwLock<HashMap<IfHandle, HandleEntry>>,
    factories: RwLock<HashMap<TrunkType, Arc<dyn TrunkFactory>>>,
}

impl Shared {
    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.big)
    }

    pub fn factory(&self, trunk_type: TrunkType) -> Option<Arc<dyn TrunkFactory>> {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&trunk_type)
            .cloned()
    }

    fn handles(&self) -> RwLockReadGuard<'_, HashMap<IfHandle, HandleEntry>> {
        self.handles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handles_mut(&self) -> RwLockWriteGuard<'_, HashMap<IfHandle, HandleEntry>> {
        self.handles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves `handle` for `session`. Handles are only valid for the
    /// session that opened them.
    fn lookup(&self, session: &Session, handle: IfHandle) -> Result<(Arc<Interface>, Arc<Network>)> {
        let handles = self.handles();
        let entry = handles.get(&handle).ok_or(IntNetError::InvalidHandle)?;
        if entry.iface.session.id != session.id {
            return Err(IntNetError::InvalidHandle);
        }
        Ok((Arc::clone(&entry.iface), Arc::clone(&entry.network)))
    }
}

/// The internal network switch. Cheap to clone; clones share one switch.
#[derive(Clone)]
pub struct IntNet {
    inner: Arc<Shared>,
}

impl IntNet {
    pub fn new(config: IntNetConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                big: Mutex::new(Registry {
                    networks: Vec::new(),
                    next_if_id: 1,
                    next_handle: FIRST_HANDLE,
                    interfaces: 0,
                    shut_down: false,
                }),
                handles: RwLock::new(HashMap::new()),
                factories: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &IntNetConfig {
        &self.inner.config
    }

    /// Makes trunks of `trunk_type` available. Replaces any earlier factory.
    pub fn register_trunk_factory(&self, trunk_type: TrunkType, factory: Arc<dyn TrunkFactory>) {
        self.inner
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(trunk_type, factory);
        tracing::debug!(%trunk_type, "trunk factory registered");
    }

    /// Opens an interface on the network `req` names, creating the network
    /// when it does not exist yet. Returns the handle and whether an existing
    /// network was joined.
    pub fn open(&self, session: &Session, req: &OpenRequest) -> Result<(IfHandle, bool)> {
        req.validate()?;
        let shared = &self.inner;
        let mut reg = shared.registry();
        if reg.shut_down {
            return Err(IntNetError::ShutDown);
        }
        if reg.interfaces >= shared.config.max_interfaces {
            tracing::warn!(limit = shared.config.max_interfaces, "interface limit reached");
            return Err(IntNetError::TooManyInterfaces {
                limit: shared.config.max_interfaces,
            });
        }

        let (network, joined) = match reg.find(&req.network) {
            Some(network) => {
                network.check_join(session, req)?;
                (Arc::clone(network), true)
            }
            None => (self.create_network(session, req)?, false),
        };

        let id = IfId(reg.next_if_id);
        reg.next_if_id = reg.next_if_id.wrapping_add(1).max(1);
        let handle = IfHandle(reg.next_handle);
        reg.next_handle = reg.next_handle.wrapping_add(1).max(FIRST_HANDLE);

        let buf = Arc::new(IntNetBuf::new(
            shared.config.recv_size(req.cb_recv),
            shared.config.send_size(req.cb_send),
        ));
        let iface = Arc::new(Interface::new(
            id,
            handle,
            *session,
            req.flags,
            interface_flags(req.flags),
            buf,
        ));

        if let Err(err) = network.add_interface(&iface, req.flags) {
            tracing::warn!(network = %network.name, %err, "failed to add interface");
            if !joined {
                network.destruct();
            }
            return Err(err);
        }
        if !joined {
            reg.networks.push(Arc::clone(&network));
        }
        reg.interfaces += 1;
        shared.handles_mut().insert(
            handle,
            HandleEntry {
                iface,
                network: Arc::clone(&network),
            },
        );
        tracing::info!(
            network = %network.name,
            %handle,
            if_id = id.0,
            joined,
            flags = ?network.flags(),
            "interface opened"
        );
        Ok((handle, joined))
    }

    fn create_network(&self, session: &Session, req: &OpenRequest) -> Result<Arc<Network>> {
        let shared = &self.inner;
        let network = Network::new(req, *session, &shared.config, Arc::downgrade(shared));
        if req.trunk_type.has_driver() {
            let factory = shared
                .factory(req.trunk_type)
                .ok_or(IntNetError::NotSupported(req.trunk_type))?;
            network.create_trunk(factory.as_ref())?;
        }
        tracing::info!(
            network = %network.name,
            trunk_type = %network.trunk_type,
            flags = ?network.flags(),
            "network created"
        );
        Ok(network)
    }

    /// Closes `handle`. The last interface to leave takes its network with it.
    pub fn close(&self, session: &Session, handle: IfHandle) -> Result<()> {
        let shared = &self.inner;
        let mut reg = shared.registry();
        shared.lookup(session, handle)?;
        let Some(entry) = shared.handles_mut().remove(&handle) else {
            return Err(IntNetError::InvalidHandle);
        };
        let HandleEntry { iface, network } = entry;

        iface.wait.abort(true);
        iface.wait.destroy();
        let empty = network.remove_interface(&iface);
        reg.interfaces = reg.interfaces.saturating_sub(1);
        tracing::info!(network = %network.name, %handle, if_id = iface.id.0, "interface closed");

        if empty {
            reg.remove(&network);
            network.destruct();
        }
        Ok(())
    }

    /// The shared buffer of `handle`.
    pub fn get_buffer(&self, session: &Session, handle: IfHandle) -> Result<Arc<IntNetBuf>> {
        let _reg = self.inner.registry();
        let (iface, _) = self.inner.lookup(session, handle)?;
        Ok(Arc::clone(&iface.buf))
    }

    pub fn set_promiscuous_mode(&self, session: &Session, handle: IfHandle, promiscuous: bool) -> Result<()> {
        let _reg = self.inner.registry();
        let (iface, network) = self.inner.lookup(session, handle)?;
        network.set_promiscuous(iface.id, promiscuous)
    }

    pub fn set_mac_address(&self, session: &Session, handle: IfHandle, mac: MacAddr) -> Result<()> {
        let _reg = self.inner.registry();
        let (iface, network) = self.inner.lookup(session, handle)?;
        network.set_mac_address(iface.id, mac)
    }

    pub fn set_active(&self, session: &Session, handle: IfHandle, active: bool) -> Result<()> {
        let _reg = self.inner.registry();
        let (iface, network) = self.inner.lookup(session, handle)?;
        network.set_active(&iface, active)
    }

    /// Switches everything queued on the send ring of `handle`.
    ///
    /// `TryAgain` means a frame needed a trunk direction that cannot be
    /// reached from the caller's context; it stays queued for a retry from a
    /// normal context.
    pub fn send(&self, session: &Session, handle: IfHandle) -> Result<()> {
        let (iface, network) = self.inner.lookup(session, handle)?;
        if !iface.is_active() {
            tracing::trace!(%handle, "send on inactive interface");
        }
        network.send(&iface)
    }

    /// Waits for frames on the receive ring. `u32::MAX` waits indefinitely.
    pub fn wait(&self, session: &Session, handle: IfHandle, timeout_ms: u32) -> Result<()> {
        let (iface, _) = self.inner.lookup(session, handle)?;
        let timeout = (timeout_ms != u32::MAX).then(|| Duration::from_millis(timeout_ms.into()));
        iface.wait.wait(timeout)
    }

    /// Wakes threads waiting on `handle`. With `no_more_waits` the handle's
    /// waits fail from now on, which is how a client prepares to close it.
    pub fn abort_wait(&self, session: &Session, handle: IfHandle, no_more_waits: bool) -> Result<()> {
        let (iface, _) = self.inner.lookup(session, handle)?;
        iface.wait.abort(no_more_waits);
        Ok(())
    }

    pub fn network_count(&self) -> usize {
        self.inner.registry().networks.len()
    }

    pub fn interface_count(&self) -> usize {
        self.inner.registry().interfaces
    }

    /// The current policy flags of `name`.
    pub fn network_flags(&self, name: &str) -> Option<OpenFlags> {
        self.inner.registry().find(name).map(|n| n.flags())
    }

    /// Whether `name` currently has a trunk connected.
    pub fn network_has_trunk(&self, name: &str) -> bool {
        self.inner
            .registry()
            .find(name)
            .is_some_and(|n| n.has_trunk())
    }

    /// Closes every handle and destroys every network. Later opens fail with
    /// `ShutDown`.
    pub fn shutdown(&self) {
        let shared = &self.inner;
        let mut reg = shared.registry();
        if reg.shut_down {
            return;
        }
        reg.shut_down = true;
        let handles: Vec<HandleEntry> = shared.handles_mut().drain().map(|(_, e)| e).collect();
        for entry in &handles {
            entry.iface.wait.abort(true);
            entry.iface.wait.destroy();
            entry.network.remove_interface(&entry.iface);
        }
        for network in std::mem::take(&mut reg.networks) {
            network.destruct();
        }
        reg.interfaces = 0;
        tracing::info!(interfaces = handles.len(), "switch shut down");
    }
}

impl std::fmt::Debug for IntNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntNet")
            .field("config", &self.inner.config)
            .field("networks", &self.network_count())
            .finish()
    }
}
