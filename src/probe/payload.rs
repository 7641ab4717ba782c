//! POST payload validation for service probes.
//!
//! A malformed payload fails the check before any request goes out.

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use super::PayloadError;

/// Check that REST parameters are well-formed JSON. The parameter text is
/// sent as the body verbatim, so this only validates.
pub fn validate_json(parameters: &str) -> Result<(), PayloadError> {
    serde_json::from_str::<serde_json::Value>(parameters)?;
    Ok(())
}

/// Parse SOAP parameters and re-serialize them, rejecting anything that is
/// not a well-formed XML document with a single root element.
pub fn normalize_xml(parameters: &str) -> Result<String, PayloadError> {
    let mut reader = Reader::from_str(parameters);
    let mut writer = Writer::new(Vec::new());
    let mut depth: i64 = 0;
    let mut roots = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => {
                match &event {
                    Event::Start(_) => {
                        if depth == 0 {
                            roots += 1;
                        }
                        depth += 1;
                    }
                    Event::Empty(_) => {
                        if depth == 0 {
                            roots += 1;
                        }
                    }
                    Event::End(_) => depth -= 1,
                    _ => {}
                }
                writer
                    .write_event(event)
                    .map_err(|e| PayloadError::Xml(e.to_string()))?;
            }
            Err(e) => {
                return Err(PayloadError::Xml(format!(
                    "error at position {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if depth != 0 {
        return Err(PayloadError::Xml("unclosed element".to_string()));
    }
    if roots == 0 {
        return Err(PayloadError::Xml("no root element".to_string()));
    }
    if roots > 1 {
        return Err(PayloadError::Xml("multiple root elements".to_string()));
    }

    String::from_utf8(writer.into_inner()).map_err(|e| PayloadError::Xml(e.to_string()))
}
