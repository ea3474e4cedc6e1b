//! SOAP and GENA requests on behalf of a [`Service`].

use std::time::{Duration, Instant};

use soap_client::SoapClient;
use upnp_http::HttpClient;

use crate::error::{ControlPointError, Result};
use crate::model::{Service, Subscription};
use crate::subscribe_holder::Renewer;

/// Talks to services: action invocation and subscription management.
///
/// Requests to IPv6 link-local services go through a client carrying the
/// service's scope id; everything else shares one keep-alive client.
pub(crate) struct ServiceClient {
    soap: SoapClient,
    timeout: Duration,
}

impl ServiceClient {
    pub(crate) fn new(keep_alive: bool, timeout: Duration) -> Self {
        Self {
            soap: SoapClient::new(keep_alive),
            timeout,
        }
    }

    fn with_client<R>(&self, service: &Service, f: impl FnOnce(&SoapClient) -> R) -> R {
        match service.scope_id() {
            0 => f(&self.soap),
            scope_id => f(&SoapClient::with_http_client(
                HttpClient::new(false).with_scope_id(scope_id),
            )),
        }
    }

    pub(crate) fn invoke(
        &self,
        service: &Service,
        action: &str,
        arguments: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        if service.find_action(action).is_none() {
            return Err(ControlPointError::NoSuchAction {
                service_id: service.service_id().to_string(),
                action: action.to_string(),
            });
        }
        let output = self.with_client(service, |soap| {
            soap.invoke(service.control_url(), service.service_type(), action, arguments)
        })?;
        Ok(output)
    }

    pub(crate) fn subscribe(&self, service: &Service, callback_url: &str) -> Result<()> {
        let event_url = event_url(service)?;
        let start = Instant::now();
        let response = self.with_client(service, |soap| {
            soap.subscribe(event_url, callback_url, self.timeout.as_secs())
        })?;
        tracing::info!(
            "Subscribed to {} as {} for {}s",
            service.service_id(),
            response.sid,
            response.timeout_seconds
        );
        service.set_subscription(Subscription::new(
            response.sid,
            start,
            Duration::from_secs(response.timeout_seconds),
        ));
        Ok(())
    }

    pub(crate) fn renew_subscription(&self, service: &Service) -> Result<()> {
        let sid = service
            .subscription_id()
            .ok_or_else(|| ControlPointError::NotSubscribed(service.service_id().to_string()))?;
        let event_url = event_url(service)?;
        let start = Instant::now();
        let response = self.with_client(service, |soap| {
            soap.renew_subscription(event_url, &sid, self.timeout.as_secs())
        })?;
        service.set_subscription(Subscription::new(
            sid,
            start,
            Duration::from_secs(response.timeout_seconds),
        ));
        Ok(())
    }

    /// Clear the subscription locally, then send `UNSUBSCRIBE`.
    pub(crate) fn unsubscribe(&self, service: &Service) -> Result<()> {
        let subscription = service
            .clear_subscription()
            .ok_or_else(|| ControlPointError::NotSubscribed(service.service_id().to_string()))?;
        let event_url = event_url(service)?;
        self.with_client(service, |soap| soap.unsubscribe(event_url, &subscription.id))?;
        tracing::debug!("Unsubscribed {} from {}", subscription.id, service.service_id());
        Ok(())
    }
}

impl Renewer for ServiceClient {
    fn renew(&self, service: &Service) -> Result<()> {
        self.renew_subscription(service)
    }
}

fn event_url(service: &Service) -> Result<&str> {
    match service.event_sub_url() {
        "" => Err(ControlPointError::Description(format!(
            "{} has no eventSubURL",
            service.service_id()
        ))),
        url => Ok(url),
    }
}
