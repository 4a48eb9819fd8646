use std::net::SocketAddr;

use dashmap::DashMap;

use crate::SessionData;

/// Session storage needed by the server, keyed by peer address.
///
/// Each operation is atomic on its own; nothing spans several calls.
pub trait SessionStore: Send + Sync {
    /// Store `data` for `addr`, replacing whatever was there.
    fn put(&self, addr: SocketAddr, data: SessionData);

    /// Latest session data for `addr`.
    fn get(&self, addr: &SocketAddr) -> Option<SessionData>;

    /// Addresses with a stored session at the time of the call.
    fn keys(&self) -> Vec<SocketAddr>;

    /// Forget `addr`, returning its last session data.
    fn remove(&self, addr: &SocketAddr) -> Option<SessionData>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store; sessions live as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore(DashMap<SocketAddr, SessionData>);

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, addr: SocketAddr, data: SessionData) {
        let _ = self.0.insert(addr, data);
    }

    fn get(&self, addr: &SocketAddr) -> Option<SessionData> {
        self.0.get(addr).map(|entry| entry.value().clone())
    }

    fn keys(&self) -> Vec<SocketAddr> {
        self.0.iter().map(|entry| *entry.key()).collect()
    }

    fn remove(&self, addr: &SocketAddr) -> Option<SessionData> {
        self.0.remove(addr).map(|(_, data)| data)
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn session(name: &str) -> SessionData {
        [("name", name)].into_iter().collect()
    }

    #[test]
    fn put_replaces_whole_entry() {
        let store = MemorySessionStore::new();
        let mut first = session("alice");
        first.insert("level", "3");
        store.put(addr(9000), first);
        store.put(addr(9000), session("alice"));

        let stored = store.get(&addr(9000)).unwrap();
        assert_eq!(stored, session("alice"));
        assert_eq!(stored.get("level"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn addresses_differ_by_port_and_host() {
        let store = MemorySessionStore::new();
        store.put(addr(9000), session("alice"));
        store.put(addr(9001), session("bob"));
        store.put(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)), 9000),
            session("carol"),
        );

        assert_eq!(store.get(&addr(9000)).unwrap().get("name"), Some("alice"));
        assert_eq!(store.get(&addr(9001)).unwrap().get("name"), Some("bob"));
        assert_eq!(store.get(&addr(9002)), None);

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&addr(9000)));
    }

    #[test]
    fn remove_forgets_session() {
        let store = MemorySessionStore::new();
        store.put(addr(9000), session("alice"));
        assert_eq!(store.remove(&addr(9000)), Some(session("alice")));
        assert!(store.is_empty());
        assert_eq!(store.remove(&addr(9000)), None);
    }

    #[test]
    fn concurrent_writers() {
        let store = Arc::new(MemorySessionStore::new());
        let threads: Vec<_> = (0..8u16)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100u16 {
                        store.put(addr(10_000 + t * 100 + i), session("peer"));
                        let _ = store.keys();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.len(), 800);
    }
}
