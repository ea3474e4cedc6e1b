//! Device and service description loading.
//!
//! The control point does not read XML itself. It hands a location to a
//! [`DescriptionParser`] and gets back a [`DeviceDraft`] with every service's
//! SCPD filled in, which `Device::from_draft` then validates.

use serde::Deserialize;
use upnp_http::urls::resolve_url;
use upnp_http::HttpClient;

use crate::error::{ControlPointError, Result};
use crate::model::{
    ActionDraft, ArgumentDraft, DeviceDraft, IconDraft, ServiceDraft, StateVariableDraft,
};

/// Turns a description location into a populated [`DeviceDraft`].
pub trait DescriptionParser: Send + Sync {
    fn load(&self, client: &HttpClient, location: &str) -> Result<DeviceDraft>;
}

/// Default parser for UPnP device description and SCPD documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlDescriptionParser;

impl DescriptionParser for XmlDescriptionParser {
    fn load(&self, client: &HttpClient, location: &str) -> Result<DeviceDraft> {
        let xml = client.download_string(location)?;
        let mut draft = parse_device_description(&xml)?;
        let base_url = draft.url_base.clone().unwrap_or_else(|| location.to_string());
        load_scpds(client, &base_url, &mut draft)?;
        Ok(draft)
    }
}

fn load_scpds(client: &HttpClient, base_url: &str, draft: &mut DeviceDraft) -> Result<()> {
    for service in &mut draft.services {
        let Some(scpd_url) = service.scpd_url.as_deref() else {
            continue;
        };
        let url = resolve_url(base_url, scpd_url)?;
        tracing::trace!("Loading SCPD {}", url);
        let xml = client.download_string(&url)?;
        parse_scpd(&xml, service)?;
    }
    for embedded in &mut draft.devices {
        load_scpds(client, base_url, embedded)?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RootXml {
    #[serde(rename = "URLBase")]
    url_base: Option<String>,
    device: DeviceXml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeviceXml {
    device_type: Option<String>,
    friendly_name: Option<String>,
    manufacturer: Option<String>,
    #[serde(rename = "manufacturerURL")]
    manufacturer_url: Option<String>,
    model_name: Option<String>,
    model_description: Option<String>,
    model_number: Option<String>,
    #[serde(rename = "modelURL")]
    model_url: Option<String>,
    serial_number: Option<String>,
    #[serde(rename = "UDN")]
    udn: Option<String>,
    #[serde(rename = "UPC")]
    upc: Option<String>,
    #[serde(rename = "presentationURL")]
    presentation_url: Option<String>,
    icon_list: Option<IconListXml>,
    service_list: Option<ServiceListXml>,
    device_list: Option<DeviceListXml>,
}

#[derive(Debug, Default, Deserialize)]
struct IconListXml {
    #[serde(rename = "icon", default)]
    icons: Vec<IconXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IconXml {
    mimetype: Option<String>,
    width: Option<String>,
    height: Option<String>,
    depth: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceListXml {
    #[serde(rename = "service", default)]
    services: Vec<ServiceXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ServiceXml {
    service_type: Option<String>,
    service_id: Option<String>,
    #[serde(rename = "SCPDURL")]
    scpd_url: Option<String>,
    #[serde(rename = "controlURL")]
    control_url: Option<String>,
    #[serde(rename = "eventSubURL")]
    event_sub_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceListXml {
    #[serde(rename = "device", default)]
    devices: Vec<DeviceXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScpdXml {
    action_list: Option<ActionListXml>,
    service_state_table: Option<StateTableXml>,
}

#[derive(Debug, Default, Deserialize)]
struct ActionListXml {
    #[serde(rename = "action", default)]
    actions: Vec<ActionXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ActionXml {
    name: Option<String>,
    argument_list: Option<ArgumentListXml>,
}

#[derive(Debug, Default, Deserialize)]
struct ArgumentListXml {
    #[serde(rename = "argument", default)]
    arguments: Vec<ArgumentXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ArgumentXml {
    name: Option<String>,
    direction: Option<String>,
    related_state_variable: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StateTableXml {
    #[serde(rename = "stateVariable", default)]
    variables: Vec<StateVariableXml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StateVariableXml {
    #[serde(rename = "@sendEvents")]
    send_events: Option<String>,
    #[serde(rename = "@multicast")]
    multicast: Option<String>,
    name: Option<String>,
    data_type: Option<String>,
    default_value: Option<String>,
    allowed_value_list: Option<AllowedValueListXml>,
    allowed_value_range: Option<AllowedValueRangeXml>,
}

#[derive(Debug, Default, Deserialize)]
struct AllowedValueListXml {
    #[serde(rename = "allowedValue", default)]
    values: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AllowedValueRangeXml {
    minimum: Option<String>,
    maximum: Option<String>,
    step: Option<String>,
}

/// Parse a device description document. Service SCPDs are left empty.
pub fn parse_device_description(xml: &str) -> Result<DeviceDraft> {
    let root: RootXml = quick_xml::de::from_str(strip_bom(xml))
        .map_err(|e| ControlPointError::Description(format!("Failed to parse device XML: {}", e)))?;
    let mut draft = device_draft(root.device, xml);
    draft.url_base = text(root.url_base);
    Ok(draft)
}

/// Parse an SCPD document into `service`.
pub fn parse_scpd(xml: &str, service: &mut ServiceDraft) -> Result<()> {
    let scpd: ScpdXml = quick_xml::de::from_str(strip_bom(xml))
        .map_err(|e| ControlPointError::Description(format!("Failed to parse SCPD: {}", e)))?;

    service.description = xml.to_string();
    service.actions = scpd
        .action_list
        .map(|list| list.actions)
        .unwrap_or_default()
        .into_iter()
        .map(|action| ActionDraft {
            name: text(action.name),
            arguments: action
                .argument_list
                .map(|list| list.arguments)
                .unwrap_or_default()
                .into_iter()
                .map(|argument| ArgumentDraft {
                    name: text(argument.name),
                    direction: text(argument.direction),
                    related_state_variable: text(argument.related_state_variable),
                })
                .collect(),
        })
        .collect();
    service.state_variables = scpd
        .service_state_table
        .map(|table| table.variables)
        .unwrap_or_default()
        .into_iter()
        .map(|variable| {
            let range = variable.allowed_value_range.unwrap_or_default();
            StateVariableDraft {
                name: text(variable.name),
                data_type: text(variable.data_type),
                // sendEvents defaults to "yes"
                send_events: variable.send_events.as_deref().map_or(true, is_yes),
                multicast: variable.multicast.as_deref().is_some_and(is_yes),
                default_value: text(variable.default_value),
                allowed_values: variable
                    .allowed_value_list
                    .map(|list| list.values.into_iter().map(|v| v.trim().to_string()).collect())
                    .unwrap_or_default(),
                minimum: text(range.minimum),
                maximum: text(range.maximum),
                step: text(range.step),
            }
        })
        .collect();
    Ok(())
}

fn device_draft(device: DeviceXml, description: &str) -> DeviceDraft {
    DeviceDraft {
        description: description.to_string(),
        url_base: None,
        udn: text(device.udn),
        device_type: text(device.device_type),
        friendly_name: text(device.friendly_name),
        manufacturer: text(device.manufacturer),
        manufacturer_url: text(device.manufacturer_url),
        model_name: text(device.model_name),
        model_description: text(device.model_description),
        model_number: text(device.model_number),
        model_url: text(device.model_url),
        serial_number: text(device.serial_number),
        presentation_url: text(device.presentation_url),
        upc: text(device.upc),
        icons: device
            .icon_list
            .map(|list| list.icons)
            .unwrap_or_default()
            .into_iter()
            .map(|icon| IconDraft {
                mime_type: text(icon.mimetype),
                width: number(icon.width),
                height: number(icon.height),
                depth: number(icon.depth),
                url: text(icon.url),
                binary: None,
            })
            .collect(),
        services: device
            .service_list
            .map(|list| list.services)
            .unwrap_or_default()
            .into_iter()
            .map(|service| ServiceDraft {
                service_type: text(service.service_type),
                service_id: text(service.service_id),
                scpd_url: text(service.scpd_url),
                control_url: text(service.control_url),
                // Services without evented variables may leave this empty
                event_sub_url: Some(
                    service
                        .event_sub_url
                        .map(|url| url.trim().to_string())
                        .unwrap_or_default(),
                ),
                ..Default::default()
            })
            .collect(),
        devices: device
            .device_list
            .map(|list| list.devices)
            .unwrap_or_default()
            .into_iter()
            .map(|embedded| device_draft(embedded, ""))
            .collect(),
    }
}

fn text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn number(value: Option<String>) -> Option<u32> {
    value.and_then(|v| v.trim().parse().ok())
}

fn is_yes(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("yes")
}

fn strip_bom(xml: &str) -> &str {
    xml.trim_start_matches('\u{feff}').trim_start()
}
