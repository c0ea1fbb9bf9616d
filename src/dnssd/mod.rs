//! DNS-SD Abstraktion
//!
//! Browser- und Advertiser-Schnittstellen für die RAVENNA-Discovery über
//! `_rtsp._tcp` mit den RAVENNA-Subtypes. Das mdns-sd Backend bedient
//! beide; für Tests existiert ein Mock-Backend.

mod mdns;
mod mock;

use std::collections::HashMap;
use std::net::IpAddr;

use crate::error::NodeResult;

pub use mdns::{MdnsAdvertiser, MdnsBrowser};
pub use mock::MockDnssd;

/// Basis-Servicetyp aller RAVENNA-Knoten.
pub const RTSP_SERVICE_TYPE: &str = "_rtsp._tcp.local.";

/// Subtype für RAVENNA-Knoten.
pub const RAVENNA_NODE_SUBTYPE: &str = "_ravenna._sub._rtsp._tcp.local.";

/// Subtype für einzelne RAVENNA-Sessions.
pub const RAVENNA_SESSION_SUBTYPE: &str = "_ravenna_session._sub._rtsp._tcp.local.";

/// Beschreibung eines aufgelösten Dienstes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescription {
    pub fullname: String,
    pub name: String,
    pub service_type: String,
    pub domain: String,
    pub host: String,
    pub port: u16,
    pub txt: HashMap<String, String>,
    pub addresses: Vec<IpAddr>,
}

/// Browser-Ereignisse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnssdEvent {
    /// Dienst wurde aufgelöst (Adressen bekannt).
    ServiceResolved(ServiceDescription),
    /// Dienst ist aus dem Netz verschwunden.
    ServiceRemoved(ServiceDescription),
}

pub type DnssdCallback = Box<dyn Fn(&DnssdEvent) + Send + Sync>;

/// Sucht Dienste eines Typs und meldet Ereignisse an Subscriber.
///
/// Callbacks kommen vom Backend-Thread; der Aufrufer überführt sie in
/// seinen eigenen Kontext.
pub trait DnssdBrowser: Send + Sync {
    fn browse_for(&self, service_type: &str) -> NodeResult<()>;
    fn subscribe(&self, callback: DnssdCallback);
}

/// Kennung eines registrierten Dienstes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdvertisementId(pub String);

/// Registriert benannte Dienste mit TXT-Record auf einem Port.
pub trait DnssdAdvertiser: Send + Sync {
    fn register_service(
        &self,
        service_type: &str,
        name: &str,
        port: u16,
        txt: HashMap<String, String>,
    ) -> NodeResult<AdvertisementId>;

    fn unregister_service(&self, id: &AdvertisementId) -> NodeResult<()>;
}
