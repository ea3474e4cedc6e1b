//! Renewal bookkeeping for one subscription.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ControlPointError, Result};
use crate::model::{Service, Subscription};

/// Renew this long before expiry when the timeout allows it.
const RENEW_MARGIN: Duration = Duration::from_secs(10);

/// Timeouts at or below this renew at two thirds instead.
const MIN_MARGIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Consecutive renewal failures after which a subscription is dropped.
pub const MAX_FAIL_COUNT: u32 = 2;

/// A subscribed service and when it next needs attention.
///
/// Without keep-alive the scan time is the expiry itself and the entry is
/// simply dropped then. With keep-alive it is a point inside the
/// subscription window; each failed renewal moves it halfway towards the
/// expiry, so retries come faster while staying before it.
#[derive(Debug)]
pub struct SubscribeService {
    service: Arc<Service>,
    keep_alive: bool,
    fail_count: u32,
    expiry_time: Instant,
    next_scan_time: Instant,
}

impl SubscribeService {
    /// Fails with `NotSubscribed` if the service holds no subscription.
    pub fn new(service: Arc<Service>, keep_alive: bool) -> Result<Self> {
        let subscription = service
            .subscription()
            .ok_or_else(|| ControlPointError::NotSubscribed(service.service_id().to_string()))?;
        let expiry_time = subscription.expiry_time();
        let next_scan_time = scan_time(&subscription, keep_alive);
        Ok(Self {
            service,
            keep_alive,
            fail_count: 0,
            expiry_time,
            next_scan_time,
        })
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn is_failed(&self) -> bool {
        self.fail_count >= MAX_FAIL_COUNT
    }

    pub fn expiry_time(&self) -> Instant {
        self.expiry_time
    }

    pub fn next_scan_time(&self) -> Instant {
        self.next_scan_time
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry_time
    }

    /// Recompute from the service's refreshed subscription.
    pub fn renew_succeeded(&mut self) {
        match self.service.subscription() {
            Some(subscription) => {
                self.fail_count = 0;
                self.expiry_time = subscription.expiry_time();
                self.next_scan_time = scan_time(&subscription, self.keep_alive);
            }
            None => self.fail_count = MAX_FAIL_COUNT,
        }
    }

    /// Record a failed renewal attempted at `now`.
    pub fn renew_failed(&mut self, now: Instant) {
        self.fail_count += 1;
        self.next_scan_time = if now >= self.expiry_time {
            self.expiry_time
        } else {
            now + (self.expiry_time - now) / 2
        };
    }
}

fn scan_time(subscription: &Subscription, keep_alive: bool) -> Instant {
    if !keep_alive {
        return subscription.expiry_time();
    }
    let timeout = subscription.lifetime();
    if timeout > MIN_MARGIN_TIMEOUT {
        subscription.start + timeout - RENEW_MARGIN
    } else {
        subscription.start + timeout * 2 / 3
    }
}
