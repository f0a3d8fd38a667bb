/// SHARED PROTOCOL HANDLE
///
/// Several tasks (validator agents, customers, a host driving blocks) may
/// hold a `SharedProtocol`. Calls are serialized by a single mutex, which
/// gives every operation a total order, and each call still commits or
/// rolls back as a unit.

use arbitra_core::EventRecord;
use arbitra_economics::AssetBank;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::protocol::Protocol;

pub struct SharedProtocol<B: AssetBank + Clone> {
    inner: Arc<Mutex<Protocol<B>>>,
}

impl<B: AssetBank + Clone> Clone for SharedProtocol<B> {
    fn clone(&self) -> Self {
        SharedProtocol {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: AssetBank + Clone> SharedProtocol<B> {
    pub fn new(protocol: Protocol<B>) -> Self {
        SharedProtocol {
            inner: Arc::new(Mutex::new(protocol)),
        }
    }

    /// Run `f` with exclusive access. Keep it short: every other caller waits.
    pub fn with<R>(&self, f: impl FnOnce(&mut Protocol<B>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn read<R>(&self, f: impl FnOnce(&Protocol<B>) -> R) -> R {
        let guard = self.inner.lock();
        f(&guard)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.inner.lock().subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbitra_core::{Address, ProtocolConfig};
    use arbitra_economics::InMemoryBank;

    #[test]
    fn test_clones_share_state() {
        let admin = Address::from_label("admin");
        let token = Address::from_label("stake-token");
        let mut bank = InMemoryBank::new();
        bank.register_token(token, "STK");
        let protocol = Protocol::new(ProtocolConfig::default(), admin, token, bank).unwrap();

        let a = SharedProtocol::new(protocol);
        let b = a.clone();
        a.with(|p| p.mine(3));
        assert_eq!(b.read(|p| p.height()), 3);
    }
}
