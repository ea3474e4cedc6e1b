//! GENA `propertyset` parsing.
//!
//! ```xml
//! <e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
//!   <e:property><TransportState>PLAYING</TransportState></e:property>
//! </e:propertyset>
//! ```

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{CallbackServerError, Result};

/// Extract `(variable, value)` pairs in document order.
///
/// Values are unescaped text; markup nested inside a variable element is
/// skipped and only its text kept.
pub fn parse_property_set(xml: &str) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_str(xml);
    let mut properties = Vec::new();
    let mut seen_root = false;
    let mut in_property = false;
    // (name, value, nesting depth below the variable element)
    let mut current: Option<(String, String, usize)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                if let Some((_, _, depth)) = current.as_mut() {
                    *depth += 1;
                } else if in_property {
                    current = Some((name, String::new(), 0));
                } else if name == "property" {
                    in_property = true;
                } else if name == "propertyset" {
                    seen_root = true;
                }
            }
            Event::Empty(e) => {
                if in_property && current.is_none() {
                    properties.push((local_name(e.local_name().as_ref()), String::new()));
                }
            }
            Event::Text(text) => {
                if let Some((_, value, _)) = current.as_mut() {
                    value.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some((_, value, _)) = current.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(e) => {
                if let Some((name, value, depth)) = current.take() {
                    if depth > 0 {
                        current = Some((name, value, depth - 1));
                    } else {
                        properties.push((name, value));
                    }
                } else if local_name(e.local_name().as_ref()) == "property" {
                    in_property = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(CallbackServerError::PropertySet("missing propertyset element".to_string()));
    }
    Ok(properties)
}

fn local_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
