use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use upnp_http::urls::resolve_url;
use upnp_ssdp::SsdpMessage;

use crate::error::{ControlPointError, Result};
use crate::model::icon::{Icon, IconDraft};
use crate::model::service::{Service, ServiceDraft};

/// SSDP state shared by a root device, its embedded devices and all services.
pub(crate) struct Presence {
    message: Mutex<SsdpMessage>,
    pinned: AtomicBool,
}

impl Presence {
    pub(crate) fn new(message: SsdpMessage) -> Self {
        let pinned = message.is_pinned();
        Self {
            message: Mutex::new(message),
            pinned: AtomicBool::new(pinned),
        }
    }

    pub(crate) fn message(&self) -> SsdpMessage {
        self.message.lock().clone()
    }

    pub(crate) fn local_address(&self) -> Option<IpAddr> {
        self.message.lock().local_address()
    }

    pub(crate) fn scope_id(&self) -> u32 {
        self.message.lock().scope_id()
    }
}

/// Device description fields as read from XML. Only the parser fills this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDraft {
    /// Raw device description document
    pub description: String,
    pub url_base: Option<String>,
    pub udn: Option<String>,
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub manufacturer_url: Option<String>,
    pub model_name: Option<String>,
    pub model_description: Option<String>,
    pub model_number: Option<String>,
    pub model_url: Option<String>,
    pub serial_number: Option<String>,
    pub presentation_url: Option<String>,
    pub upc: Option<String>,
    pub icons: Vec<IconDraft>,
    pub services: Vec<ServiceDraft>,
    pub devices: Vec<DeviceDraft>,
}

/// A discovered UPnP device.
///
/// The SSDP message is replaced whenever a newer announcement wins; all other
/// fields come from the description and never change.
pub struct Device {
    presence: Arc<Presence>,
    location: String,
    base_url: String,
    description: String,
    udn: String,
    device_type: String,
    friendly_name: String,
    manufacturer: String,
    manufacturer_url: Option<String>,
    model_name: String,
    model_description: Option<String>,
    model_number: Option<String>,
    model_url: Option<String>,
    serial_number: Option<String>,
    presentation_url: Option<String>,
    upc: Option<String>,
    icons: Vec<Icon>,
    services: Vec<Arc<Service>>,
    devices: Vec<Arc<Device>>,
}

impl Device {
    /// Build a device from its description and the message that located it.
    ///
    /// A pinned placeholder message makes a pinned device.
    pub fn from_draft(draft: DeviceDraft, message: SsdpMessage) -> Result<Self> {
        let location = message
            .location()
            .ok_or(ControlPointError::missing("SsdpMessage", "LOCATION"))?
            .to_string();
        let presence = Arc::new(Presence::new(message));
        let base_url = draft.url_base.clone().unwrap_or_else(|| location.clone());
        Self::build(draft, presence, location, base_url)
    }

    fn build(draft: DeviceDraft, presence: Arc<Presence>, location: String, base_url: String) -> Result<Self> {
        let udn = draft.udn.ok_or(ControlPointError::missing("Device", "UDN"))?;
        let services = draft
            .services
            .into_iter()
            .map(|s| Service::from_draft(s, &udn, &base_url, Arc::clone(&presence)).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let icons = draft
            .icons
            .into_iter()
            .map(|mut icon| {
                if let Some(url) = icon.url.take() {
                    icon.url = Some(resolve_url(&base_url, &url)?);
                }
                Icon::from_draft(icon)
            })
            .collect::<Result<Vec<_>>>()?;
        let devices = draft
            .devices
            .into_iter()
            .map(|d| {
                Self::build(d, Arc::clone(&presence), location.clone(), base_url.clone()).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device_type: draft
                .device_type
                .ok_or(ControlPointError::missing("Device", "deviceType"))?,
            friendly_name: draft
                .friendly_name
                .ok_or(ControlPointError::missing("Device", "friendlyName"))?,
            manufacturer: draft
                .manufacturer
                .ok_or(ControlPointError::missing("Device", "manufacturer"))?,
            model_name: draft
                .model_name
                .ok_or(ControlPointError::missing("Device", "modelName"))?,
            manufacturer_url: draft.manufacturer_url,
            model_description: draft.model_description,
            model_number: draft.model_number,
            model_url: draft.model_url,
            serial_number: draft.serial_number,
            presentation_url: draft.presentation_url,
            upc: draft.upc,
            description: draft.description,
            presence,
            location,
            base_url,
            udn,
            icons,
            services,
            devices,
        })
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn manufacturer_url(&self) -> Option<&str> {
        self.manufacturer_url.as_deref()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_description(&self) -> Option<&str> {
        self.model_description.as_deref()
    }

    pub fn model_number(&self) -> Option<&str> {
        self.model_number.as_deref()
    }

    pub fn model_url(&self) -> Option<&str> {
        self.model_url.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn presentation_url(&self) -> Option<&str> {
        self.presentation_url.as_deref()
    }

    pub fn upc(&self) -> Option<&str> {
        self.upc.as_deref()
    }

    /// URL the description was downloaded from
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Base for relative URLs: `URLBase` when given, else the location
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Copy of the SSDP message currently representing this device
    pub fn ssdp_message(&self) -> SsdpMessage {
        self.presence.message()
    }

    pub(crate) fn update_ssdp_message(&self, message: SsdpMessage) {
        *self.presence.message.lock() = message;
    }

    pub fn expire_time(&self) -> Instant {
        self.presence.message.lock().expire_time()
    }

    pub fn local_address(&self) -> Option<IpAddr> {
        self.presence.local_address()
    }

    pub fn scope_id(&self) -> u32 {
        self.presence.scope_id()
    }

    pub fn is_pinned(&self) -> bool {
        self.presence.pinned.load(Ordering::SeqCst)
    }

    pub(crate) fn set_pinned(&self, pinned: bool) {
        self.presence.pinned.store(pinned, Ordering::SeqCst);
    }

    pub fn icons(&self) -> &[Icon] {
        &self.icons
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn find_service_by_type(&self, service_type: &str) -> Option<&Arc<Service>> {
        self.services.iter().find(|s| s.service_type() == service_type)
    }

    pub fn find_service_by_id(&self, service_id: &str) -> Option<&Arc<Service>> {
        self.services.iter().find(|s| s.service_id() == service_id)
    }

    /// Embedded devices
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn find_device_by_type(&self, device_type: &str) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.device_type == device_type)
    }

    /// Find an embedded device at any depth by UDN.
    pub fn find_embedded(&self, udn: &str) -> Option<&Arc<Device>> {
        for device in &self.devices {
            if device.udn == udn {
                return Some(device);
            }
            if let Some(found) = device.find_embedded(udn) {
                return Some(found);
            }
        }
        None
    }

    /// Services of this device and of every embedded device.
    pub fn all_services(&self) -> Vec<Arc<Service>> {
        let mut services = self.services.clone();
        for device in &self.devices {
            services.extend(device.all_services());
        }
        services
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("udn", &self.udn)
            .field("friendly_name", &self.friendly_name)
            .field("device_type", &self.device_type)
            .field("location", &self.location)
            .field("pinned", &self.is_pinned())
            .field("services", &self.services.len())
            .field("devices", &self.devices.len())
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.friendly_name, self.udn)
    }
}
