//! RAVENNA session browser
//!
//! Watches DNS-SD for `_ravenna_session` services under `_rtsp._tcp` and
//! keeps the set of currently visible sessions. Subscribers are notified
//! from the backend thread; consumers marshal into their own context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::dnssd::{DnssdBrowser, DnssdEvent, ServiceDescription, RAVENNA_SESSION_SUBTYPE};
use crate::error::NodeResult;

/// Browser events, already reduced to RAVENNA sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RavennaBrowserEvent {
    SessionResolved(ServiceDescription),
    SessionRemoved(ServiceDescription),
}

type BrowserCallback = Box<dyn Fn(&RavennaBrowserEvent) + Send + Sync>;

/// Tracks discovered RAVENNA sessions.
pub struct RavennaBrowser {
    services: Arc<Mutex<HashMap<String, ServiceDescription>>>,
    callbacks: Arc<Mutex<Vec<BrowserCallback>>>,
}

impl RavennaBrowser {
    /// Hooks into the DNS-SD browser and starts browsing for sessions.
    pub fn start(browser: &dyn DnssdBrowser) -> NodeResult<Arc<Self>> {
        let ravenna = Arc::new(Self {
            services: Arc::new(Mutex::new(HashMap::new())),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        });

        let services = ravenna.services.clone();
        let callbacks = ravenna.callbacks.clone();
        browser.subscribe(Box::new(move |event| {
            let mapped = match event {
                DnssdEvent::ServiceResolved(description) => {
                    debug!("RAVENNA session resolved: {}", description.name);
                    services
                        .lock()
                        .insert(description.fullname.clone(), description.clone());
                    RavennaBrowserEvent::SessionResolved(description.clone())
                }
                DnssdEvent::ServiceRemoved(description) => {
                    debug!("RAVENNA session removed: {}", description.name);
                    services.lock().remove(&description.fullname);
                    RavennaBrowserEvent::SessionRemoved(description.clone())
                }
            };
            for callback in callbacks.lock().iter() {
                callback(&mapped);
            }
        }));

        browser.browse_for(RAVENNA_SESSION_SUBTYPE)?;
        info!("🔍 browsing for RAVENNA sessions");
        Ok(ravenna)
    }

    pub fn subscribe(&self, callback: impl Fn(&RavennaBrowserEvent) + Send + Sync + 'static) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// All currently visible sessions.
    pub fn sessions(&self) -> Vec<ServiceDescription> {
        self.services.lock().values().cloned().collect()
    }

    /// Looks a session up by its advertised instance name.
    pub fn find_by_name(&self, session_name: &str) -> Option<ServiceDescription> {
        self.services
            .lock()
            .values()
            .find(|service| service.name == session_name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssd::MockDnssd;

    fn service(name: &str) -> ServiceDescription {
        ServiceDescription {
            fullname: format!("{name}._rtsp._tcp.local."),
            name: name.to_string(),
            service_type: "_rtsp._tcp.local.".into(),
            domain: "local.".into(),
            host: "studio.local.".into(),
            port: 8554,
            ..ServiceDescription::default()
        }
    }

    #[test]
    fn test_browser_tracks_services() {
        let mock = MockDnssd::new();
        let browser = RavennaBrowser::start(&mock).unwrap();
        assert_eq!(mock.browsed_types(), vec![RAVENNA_SESSION_SUBTYPE.to_string()]);

        mock.resolve(service("Studio A"));
        mock.resolve(service("Studio B"));
        assert_eq!(browser.sessions().len(), 2);
        assert!(browser.find_by_name("Studio A").is_some());

        mock.remove(service("Studio A"));
        assert!(browser.find_by_name("Studio A").is_none());
        assert_eq!(browser.sessions().len(), 1);
    }

    #[test]
    fn test_subscribers_see_events() {
        let mock = MockDnssd::new();
        let browser = RavennaBrowser::start(&mock).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        browser.subscribe(move |event| sink.lock().push(event.clone()));

        mock.resolve(service("Studio A"));
        mock.remove(service("Studio A"));

        let events = events.lock();
        assert!(matches!(events[0], RavennaBrowserEvent::SessionResolved(_)));
        assert!(matches!(events[1], RavennaBrowserEvent::SessionRemoved(_)));
    }
}
