//! # UPnP control point
//!
//! Discovers UPnP devices, tracks whether they are still alive, subscribes
//! to their events and invokes their actions:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use upnp_cp::{ControlPoint, ControlPointConfig, Service};
//!
//! let control_point = ControlPoint::new(ControlPointConfig::default())?;
//! control_point.add_notify_event_listener(Arc::new(
//!     |service: &Arc<Service>, seq: u64, variable: &str, value: &str| {
//!         tracing::info!("{} #{}: {} = {}", service.service_id(), seq, variable, value);
//!     },
//! ));
//! control_point.start();
//! control_point.search(None)?;
//!
//! for device in control_point.devices() {
//!     if let Some(service) = device.find_service_by_type("urn:schemas-upnp-org:service:RenderingControl:1") {
//!         control_point.subscribe(service, true)?;
//!     }
//! }
//! # Ok::<(), upnp_cp::ControlPointError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ControlPoint (discovery state machine, lifecycle)
//!     ↓
//! DeviceHolder (expiry)      SubscribeManager (renewal + NOTIFY receiver)
//!     ↓                          ↓
//! upnp-ssdp (M-SEARCH/NOTIFY)  callback-server, soap-client
//!     ↓                          ↓
//! upnp-http (message framing, blocking client)
//! ```
//!
//! Everything runs on plain threads. Description downloads go to a bounded
//! I/O pool; listener notifications go through a [`CallbackExecutor`] that
//! preserves order.

pub mod config;
pub mod description;
pub mod device_holder;
mod error;
pub mod executor;
pub mod listener;
pub mod logging;
pub mod model;
pub mod subscribe_holder;
pub mod subscribe_service;

mod control_point;
mod service_client;
mod subscribe_manager;

pub use config::ControlPointConfig;
pub use control_point::ControlPoint;
pub use description::{DescriptionParser, XmlDescriptionParser};
pub use device_holder::{DeviceHolder, Expiring};
pub use error::{ControlPointError, Result};
pub use executor::{CallbackExecutor, ExecutorError, Task, TaskExecutors, WorkerPool};
pub use listener::{
    AcceptAll, DiscoveryListener, IconFilter, ListenerSet, NoIcons, NotifyEventListener, SsdpMessageFilter,
};
pub use logging::{init_logging, LoggingMode};
pub use model::{
    Action, Argument, Device, DeviceDraft, Direction, Icon, IconDraft, Service, ServiceDraft, StateVariable,
    Subscription,
};

pub use upnp_ssdp::{Protocol, SsdpMessage};
