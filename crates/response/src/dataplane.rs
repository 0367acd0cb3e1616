use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

/// The controlled data plane the built-in actions mutate: drop rules,
/// bandwidth caps, destination rewrites, container network membership and a
/// file quarantine area.
///
/// In simulation mode (production actions disabled) the tables are never
/// touched; actions record their intended effect only. State is
/// process-local; a deployment wires these calls to its real enforcement
/// point behind the same interface.
pub struct DataPlane {
    production: bool,
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    blocked: HashSet<String>,
    rate_caps: HashMap<String, u64>,
    redirects: HashMap<String, String>,
    isolated: HashSet<String>,
    quarantined: HashMap<String, String>,
}

impl DataPlane {
    /// A data plane that applies rules for real.
    #[must_use]
    pub fn production() -> Arc<Self> {
        Arc::new(Self {
            production: true,
            inner: Mutex::new(Tables::default()),
        })
    }

    /// A data plane that records nothing; actions run in simulation.
    #[must_use]
    pub fn simulated() -> Arc<Self> {
        Arc::new(Self {
            production: false,
            inner: Mutex::new(Tables::default()),
        })
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.production
    }

    /// Install a drop rule. `false` when the rule already exists.
    pub fn block(&self, ip: &str) -> bool {
        self.inner.lock().blocked.insert(ip.to_owned())
    }

    /// Remove a drop rule. `false` when none existed.
    pub fn unblock(&self, ip: &str) -> bool {
        self.inner.lock().blocked.remove(ip)
    }

    #[must_use]
    pub fn is_blocked(&self, ip: &str) -> bool {
        self.inner.lock().blocked.contains(ip)
    }

    /// Apply a bandwidth cap in kbit/s. Returns the previous cap, if any.
    pub fn cap_bandwidth(&self, target: &str, kbps: u64) -> Option<u64> {
        self.inner.lock().rate_caps.insert(target.to_owned(), kbps)
    }

    pub fn remove_cap(&self, target: &str) -> bool {
        self.inner.lock().rate_caps.remove(target).is_some()
    }

    #[must_use]
    pub fn cap_for(&self, target: &str) -> Option<u64> {
        self.inner.lock().rate_caps.get(target).copied()
    }

    /// Install a destination rewrite. `false` when one already exists.
    pub fn redirect(&self, target: &str, destination: &str) -> bool {
        let mut tables = self.inner.lock();
        if tables.redirects.contains_key(target) {
            return false;
        }
        tables
            .redirects
            .insert(target.to_owned(), destination.to_owned());
        true
    }

    pub fn remove_redirect(&self, target: &str) -> bool {
        self.inner.lock().redirects.remove(target).is_some()
    }

    /// Disconnect a compute unit from its data network.
    pub fn isolate(&self, unit: &str) -> bool {
        self.inner.lock().isolated.insert(unit.to_owned())
    }

    pub fn reconnect(&self, unit: &str) -> bool {
        self.inner.lock().isolated.remove(unit)
    }

    #[must_use]
    pub fn is_isolated(&self, unit: &str) -> bool {
        self.inner.lock().isolated.contains(unit)
    }

    /// Move a file into quarantine. Returns the quarantine path, or `None`
    /// when the file is already quarantined.
    pub fn quarantine(&self, path: &str) -> Option<String> {
        let mut tables = self.inner.lock();
        if tables.quarantined.contains_key(path) {
            return None;
        }
        let quarantine_path = format!("/var/lib/vigil/quarantine{path}");
        tables
            .quarantined
            .insert(path.to_owned(), quarantine_path.clone());
        Some(quarantine_path)
    }

    /// Move a quarantined file back. `false` when it is not quarantined.
    pub fn release(&self, path: &str) -> bool {
        self.inner.lock().quarantined.remove(path).is_some()
    }
}
