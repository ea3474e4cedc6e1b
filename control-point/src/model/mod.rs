//! Devices, services and their parts.
//!
//! Each type is built from a `*Draft` value filled in by the description
//! parser. `from_draft` checks the fields UPnP requires and fails with
//! [`ControlPointError::MissingField`](crate::ControlPointError::MissingField)
//! naming the first one absent.

pub(crate) mod device;
mod icon;
pub(crate) mod service;

pub use device::{Device, DeviceDraft};
pub use icon::{Icon, IconDraft};
pub use service::{
    Action, ActionDraft, Argument, ArgumentDraft, Direction, Service, ServiceDraft, StateVariable,
    StateVariableDraft, Subscription,
};
