//! mdns-sd Backend
//!
//! Browser und Advertiser auf Basis des mdns-sd ServiceDaemon.

use std::collections::HashMap;
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    AdvertisementId, DnssdAdvertiser, DnssdBrowser, DnssdCallback, DnssdEvent,
    ServiceDescription,
};
use crate::error::{NodeError, NodeResult};

fn daemon_error(e: mdns_sd::Error) -> NodeError {
    NodeError::Config(format!("mdns: {e}"))
}

/// Browser über den mdns-sd Daemon.
///
/// Ereignisse kommen von einem Backend-Thread pro Servicetyp.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    callbacks: Arc<Mutex<Vec<DnssdCallback>>>,
}

impl MdnsBrowser {
    pub fn new() -> NodeResult<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new().map_err(daemon_error)?,
            callbacks: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

impl DnssdBrowser for MdnsBrowser {
    fn browse_for(&self, service_type: &str) -> NodeResult<()> {
        let receiver = self.daemon.browse(service_type).map_err(daemon_error)?;
        info!("🔍 mDNS Browse gestartet: {service_type}");

        let callbacks = self.callbacks.clone();
        std::thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                let mapped = match event {
                    ServiceEvent::ServiceResolved(info) => {
                        debug!("Dienst aufgelöst: {}", info.get_fullname());
                        Some(DnssdEvent::ServiceResolved(describe(&info)))
                    }
                    ServiceEvent::ServiceRemoved(service_type, fullname) => {
                        debug!("Dienst entfernt: {fullname}");
                        Some(DnssdEvent::ServiceRemoved(ServiceDescription {
                            fullname: fullname.clone(),
                            name: instance_name(&fullname, &service_type),
                            service_type,
                            domain: "local.".into(),
                            ..ServiceDescription::default()
                        }))
                    }
                    ServiceEvent::SearchStarted(_) | ServiceEvent::SearchStopped(_) => None,
                    ServiceEvent::ServiceFound(_, fullname) => {
                        debug!("Dienst gefunden (noch nicht aufgelöst): {fullname}");
                        None
                    }
                };

                if let Some(event) = mapped {
                    for callback in callbacks.lock().iter() {
                        callback(&event);
                    }
                }
            }
        });

        Ok(())
    }

    fn subscribe(&self, callback: DnssdCallback) {
        self.callbacks.lock().push(callback);
    }
}

fn describe(info: &ServiceInfo) -> ServiceDescription {
    let mut txt = HashMap::new();
    for property in info.get_properties().iter() {
        txt.insert(property.key().to_string(), property.val_str().to_string());
    }

    ServiceDescription {
        fullname: info.get_fullname().to_string(),
        name: instance_name(info.get_fullname(), info.get_type()),
        service_type: info.get_type().to_string(),
        domain: "local.".into(),
        host: info.get_hostname().to_string(),
        port: info.get_port(),
        txt,
        addresses: info.get_addresses().iter().map(|a| (*a).into()).collect(),
    }
}

/// Instanzname aus dem Fullname: "<name>.<type>".
fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .map(|name| name.trim_end_matches('.').to_string())
        .unwrap_or_else(|| fullname.to_string())
}

/// Advertiser über den mdns-sd Daemon.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
}

impl MdnsAdvertiser {
    pub fn new() -> NodeResult<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new().map_err(daemon_error)?,
        })
    }
}

impl DnssdAdvertiser for MdnsAdvertiser {
    fn register_service(
        &self,
        service_type: &str,
        name: &str,
        port: u16,
        txt: HashMap<String, String>,
    ) -> NodeResult<AdvertisementId> {
        let host_name = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "ravenna-node".to_string());

        let service = ServiceInfo::new(
            service_type,
            name,
            &format!("{host_name}.local."),
            (), // alle Interfaces
            port,
            txt,
        )
        .map_err(daemon_error)?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        self.daemon.register(service).map_err(daemon_error)?;
        info!("🔊 mDNS Dienst registriert: {name} ({service_type}) auf Port {port}");

        Ok(AdvertisementId(fullname))
    }

    fn unregister_service(&self, id: &AdvertisementId) -> NodeResult<()> {
        match self.daemon.unregister(&id.0) {
            Ok(_) => {
                info!("🔇 mDNS Dienst deregistriert: {}", id.0);
                Ok(())
            }
            Err(e) => {
                warn!("Deregistrierung fehlgeschlagen: {e}");
                Err(daemon_error(e))
            }
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            error!("mDNS Daemon Shutdown fehlgeschlagen: {e}");
        }
    }
}
