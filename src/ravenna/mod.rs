//! RAVENNA session layer
//!
//! Glues discovery, RTSP/SDP and the RTP data plane together: browsing
//! for advertised sessions, receiving subscribed streams, and sending
//! local streams with SDP service and DNS-SD advertisement.

mod browser;
mod receiver;
mod sender;

pub use browser::{RavennaBrowser, RavennaBrowserEvent};
pub use receiver::{RavennaReceiver, RavennaSessionHandle, ReceiveState};
pub use sender::{RavennaSender, RavennaSenderConfig};
