use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use upnp_http::urls::resolve_url;

use crate::error::{ControlPointError, Result};
use crate::model::device::Presence;

/// Direction of an action argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentDraft {
    pub name: Option<String>,
    pub direction: Option<String>,
    pub related_state_variable: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    name: String,
    direction: Direction,
    related_state_variable: String,
}

impl Argument {
    pub fn from_draft(draft: ArgumentDraft) -> Result<Self> {
        let direction = draft
            .direction
            .as_deref()
            .and_then(Direction::parse)
            .ok_or(ControlPointError::missing("Argument", "direction"))?;
        Ok(Self {
            name: draft.name.ok_or(ControlPointError::missing("Argument", "name"))?,
            direction,
            related_state_variable: draft
                .related_state_variable
                .ok_or(ControlPointError::missing("Argument", "relatedStateVariable"))?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::In
    }

    pub fn related_state_variable(&self) -> &str {
        &self.related_state_variable
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionDraft {
    pub name: Option<String>,
    pub arguments: Vec<ArgumentDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    name: String,
    arguments: Vec<Argument>,
}

impl Action {
    pub fn from_draft(draft: ActionDraft) -> Result<Self> {
        Ok(Self {
            name: draft.name.ok_or(ControlPointError::missing("Action", "name"))?,
            arguments: draft
                .arguments
                .into_iter()
                .map(Argument::from_draft)
                .collect::<Result<_>>()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn find_argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVariableDraft {
    pub name: Option<String>,
    pub data_type: Option<String>,
    pub send_events: bool,
    pub multicast: bool,
    pub default_value: Option<String>,
    pub allowed_values: Vec<String>,
    pub minimum: Option<String>,
    pub maximum: Option<String>,
    pub step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    name: String,
    data_type: String,
    send_events: bool,
    multicast: bool,
    default_value: Option<String>,
    allowed_values: Vec<String>,
    minimum: Option<String>,
    maximum: Option<String>,
    step: Option<String>,
}

impl StateVariable {
    pub fn from_draft(draft: StateVariableDraft) -> Result<Self> {
        Ok(Self {
            name: draft.name.ok_or(ControlPointError::missing("StateVariable", "name"))?,
            data_type: draft
                .data_type
                .ok_or(ControlPointError::missing("StateVariable", "dataType"))?,
            send_events: draft.send_events,
            multicast: draft.multicast,
            default_value: draft.default_value,
            allowed_values: draft.allowed_values,
            minimum: draft.minimum,
            maximum: draft.maximum,
            step: draft.step,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Whether changes are delivered through GENA
    pub fn is_send_events(&self) -> bool {
        self.send_events
    }

    pub fn is_multicast(&self) -> bool {
        self.multicast
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn allowed_values(&self) -> &[String] {
        &self.allowed_values
    }

    pub fn minimum(&self) -> Option<&str> {
        self.minimum.as_deref()
    }

    pub fn maximum(&self) -> Option<&str> {
        self.maximum.as_deref()
    }

    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDraft {
    pub service_type: Option<String>,
    pub service_id: Option<String>,
    pub scpd_url: Option<String>,
    pub control_url: Option<String>,
    pub event_sub_url: Option<String>,
    /// Raw SCPD document
    pub description: String,
    pub actions: Vec<ActionDraft>,
    pub state_variables: Vec<StateVariableDraft>,
}

/// Longest subscription lifetime honoured; larger timeouts are treated as this.
pub const MAX_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(86_400);

/// An active GENA subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub start: Instant,
    pub timeout: Duration,
}

impl Subscription {
    pub fn new(id: impl Into<String>, start: Instant, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            start,
            timeout,
        }
    }

    /// The granted timeout, capped to [`MAX_SUBSCRIPTION_TIMEOUT`].
    pub fn lifetime(&self) -> Duration {
        self.timeout.min(MAX_SUBSCRIPTION_TIMEOUT)
    }

    pub fn expiry_time(&self) -> Instant {
        self.start + self.lifetime()
    }
}

/// A service of a device, with its actions, state table and subscription.
///
/// URLs are absolute. The subscription is kept as a single value so that id,
/// start and timeout are always set and cleared together.
pub struct Service {
    presence: Arc<Presence>,
    device_udn: String,
    service_type: String,
    service_id: String,
    scpd_url: String,
    control_url: String,
    event_sub_url: String,
    description: String,
    actions: Vec<Action>,
    state_variables: Vec<StateVariable>,
    subscription: Mutex<Option<Subscription>>,
}

impl Service {
    pub(crate) fn from_draft(
        draft: ServiceDraft,
        device_udn: &str,
        base_url: &str,
        presence: Arc<Presence>,
    ) -> Result<Self> {
        let service_type = draft
            .service_type
            .ok_or(ControlPointError::missing("Service", "serviceType"))?;
        let service_id = draft
            .service_id
            .ok_or(ControlPointError::missing("Service", "serviceId"))?;
        let scpd_url = draft
            .scpd_url
            .ok_or(ControlPointError::missing("Service", "SCPDURL"))?;
        let control_url = draft
            .control_url
            .ok_or(ControlPointError::missing("Service", "controlURL"))?;
        let event_sub_url = draft
            .event_sub_url
            .ok_or(ControlPointError::missing("Service", "eventSubURL"))?;
        let state_variables = draft
            .state_variables
            .into_iter()
            .map(StateVariable::from_draft)
            .collect::<Result<Vec<_>>>()?;
        let actions = draft
            .actions
            .into_iter()
            .map(Action::from_draft)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            presence,
            device_udn: device_udn.to_string(),
            scpd_url: resolve_url(base_url, &scpd_url)?,
            control_url: resolve_url(base_url, &control_url)?,
            event_sub_url: if event_sub_url.trim().is_empty() {
                String::new()
            } else {
                resolve_url(base_url, &event_sub_url)?
            },
            service_type,
            service_id,
            description: draft.description,
            actions,
            state_variables,
            subscription: Mutex::new(None),
        })
    }

    /// UDN of the device this service belongs to
    pub fn device_udn(&self) -> &str {
        &self.device_udn
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn scpd_url(&self) -> &str {
        &self.scpd_url
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    /// Empty when the service has no evented variables
    pub fn event_sub_url(&self) -> &str {
        &self.event_sub_url
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn find_action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn state_variables(&self) -> &[StateVariable] {
        &self.state_variables
    }

    pub fn find_state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.name == name)
    }

    /// Interface address the owning device was discovered on
    pub fn local_address(&self) -> Option<IpAddr> {
        self.presence.local_address()
    }

    pub(crate) fn scope_id(&self) -> u32 {
        self.presence.scope_id()
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.subscription.lock().clone()
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.subscription.lock().as_ref().map(|s| s.id.clone())
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    pub(crate) fn set_subscription(&self, subscription: Subscription) {
        *self.subscription.lock() = Some(subscription);
    }

    pub(crate) fn clear_subscription(&self) -> Option<Subscription> {
        self.subscription.lock().take()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("device_udn", &self.device_udn)
            .field("service_id", &self.service_id)
            .field("service_type", &self.service_type)
            .field("control_url", &self.control_url)
            .field("event_sub_url", &self.event_sub_url)
            .field("subscription", &*self.subscription.lock())
            .finish()
    }
}
