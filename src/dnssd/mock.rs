//! Mock DNS-SD Backend
//!
//! Implementiert Browser und Advertiser in-memory für Tests: Ereignisse
//! werden von Hand injiziert, Registrierungen nur aufgezeichnet.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    AdvertisementId, DnssdAdvertiser, DnssdBrowser, DnssdCallback, DnssdEvent,
    ServiceDescription,
};
use crate::error::{NodeError, NodeResult};

#[derive(Default)]
struct MockState {
    browsed_types: Vec<String>,
    callbacks: Vec<DnssdCallback>,
    registered: HashMap<AdvertisementId, (String, String, u16)>,
    next_id: u64,
}

/// In-memory DNS-SD für Tests.
#[derive(Clone, Default)]
pub struct MockDnssd {
    state: Arc<Mutex<MockState>>,
}

impl MockDnssd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injiziert ein "Dienst aufgelöst"-Ereignis.
    pub fn resolve(&self, description: ServiceDescription) {
        self.emit(DnssdEvent::ServiceResolved(description));
    }

    /// Injiziert ein "Dienst entfernt"-Ereignis.
    pub fn remove(&self, description: ServiceDescription) {
        self.emit(DnssdEvent::ServiceRemoved(description));
    }

    fn emit(&self, event: DnssdEvent) {
        let state = self.state.lock();
        for callback in state.callbacks.iter() {
            callback(&event);
        }
    }

    /// Welche Typen gebrowst werden.
    pub fn browsed_types(&self) -> Vec<String> {
        self.state.lock().browsed_types.clone()
    }

    /// Aktuell registrierte Dienste: (Typ, Name, Port).
    pub fn registered_services(&self) -> Vec<(String, String, u16)> {
        self.state.lock().registered.values().cloned().collect()
    }
}

impl DnssdBrowser for MockDnssd {
    fn browse_for(&self, service_type: &str) -> NodeResult<()> {
        self.state.lock().browsed_types.push(service_type.to_string());
        Ok(())
    }

    fn subscribe(&self, callback: DnssdCallback) {
        self.state.lock().callbacks.push(callback);
    }
}

impl DnssdAdvertiser for MockDnssd {
    fn register_service(
        &self,
        service_type: &str,
        name: &str,
        port: u16,
        _txt: HashMap<String, String>,
    ) -> NodeResult<AdvertisementId> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = AdvertisementId(format!("mock-{}", state.next_id));
        state.registered.insert(
            id.clone(),
            (service_type.to_string(), name.to_string(), port),
        );
        Ok(id)
    }

    fn unregister_service(&self, id: &AdvertisementId) -> NodeResult<()> {
        let mut state = self.state.lock();
        state
            .registered
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| NodeError::Config(format!("unknown advertisement {}", id.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_events_reach_subscribers() {
        let mock = MockDnssd::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_callback = seen.clone();
        mock.subscribe(Box::new(move |event| {
            if matches!(event, DnssdEvent::ServiceResolved(_)) {
                seen_in_callback.fetch_add(1, Ordering::Relaxed);
            }
        }));

        mock.resolve(ServiceDescription {
            name: "Studio A".into(),
            port: 8554,
            ..ServiceDescription::default()
        });
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_register_unregister() {
        let mock = MockDnssd::new();
        let id = mock
            .register_service("_rtsp._tcp.local.", "Studio A", 8554, HashMap::new())
            .unwrap();
        assert_eq!(mock.registered_services().len(), 1);

        mock.unregister_service(&id).unwrap();
        assert!(mock.registered_services().is_empty());
        assert!(mock.unregister_service(&id).is_err());
    }
}
