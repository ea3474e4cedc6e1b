//! Discover UPnP devices and print rendering control events
//!
//! Searches the network, lists what answers, subscribes to every
//! RenderingControl service found and prints volume changes for a while.
//!
//! Run with: cargo run -p upnp-cp --example discover

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use upnp_cp::{ControlPoint, ControlPointConfig, ControlPointError, Device, DiscoveryListener, LoggingMode, Service};

const RENDERING_CONTROL: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

struct PrintDevices;

impl DiscoveryListener for PrintDevices {
    fn on_discover(&self, device: &Arc<Device>) {
        println!("+ {} [{}] at {}", device.friendly_name(), device.device_type(), device.location());
    }

    fn on_lost(&self, device: &Arc<Device>) {
        println!("- {}", device.friendly_name());
    }
}

fn main() -> Result<(), ControlPointError> {
    if let Err(e) = upnp_cp::init_logging(LoggingMode::Development) {
        eprintln!("Logging unavailable: {}", e);
    }

    println!("UPnP control point example");
    println!("==========================");

    let control_point = ControlPoint::new(ControlPointConfig::default())?;
    control_point.add_discovery_listener(Arc::new(PrintDevices));
    control_point.add_notify_event_listener(Arc::new(
        |service: &Arc<Service>, seq: u64, variable: &str, value: &str| {
            println!("  event #{} from {}: {} = {}", seq, service.device_udn(), variable, value);
        },
    ));

    control_point.start();
    control_point.search(None)?;

    // Give devices time to answer and descriptions time to load
    thread::sleep(Duration::from_secs(5));
    println!("\n{} devices found", control_point.device_count());

    for device in control_point.devices() {
        let Some(service) = device.find_service_by_type(RENDERING_CONTROL) else {
            continue;
        };
        match control_point.invoke(service, "GetVolume", &[
            ("InstanceID".to_string(), "0".to_string()),
            ("Channel".to_string(), "Master".to_string()),
        ]) {
            Ok(output) => println!("{}: {:?}", device.friendly_name(), output),
            Err(e) => println!("{}: GetVolume failed: {}", device.friendly_name(), e),
        }
        if let Err(e) = control_point.subscribe(service, true) {
            println!("{}: subscribe failed: {}", device.friendly_name(), e);
        }
    }

    println!("\nWatching events for 30 seconds...");
    thread::sleep(Duration::from_secs(30));

    control_point.terminate();
    Ok(())
}
