use std::str::FromStr;

use minidom::Element;

use crate::error::PipelineError;
use crate::ns;

/// Parse a single inbound frame into an element.
pub fn parse_frame(raw: &[u8]) -> Result<Element, PipelineError> {
    let xml = std::str::from_utf8(raw).map_err(|error| {
        PipelineError::ParseFailed(format!("invalid UTF-8 stanza bytes: {error}"))
    })?;
    let trimmed = xml.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::ParseFailed(
            "stanza payload is empty".to_string(),
        ));
    }

    Element::from_str(trimmed).map_err(|error| {
        PipelineError::ParseFailed(format!("failed to parse stanza XML: {error}"))
    })
}

pub fn serialize_element(element: &Element) -> Result<Vec<u8>, PipelineError> {
    let mut payload = Vec::new();
    element.write_to(&mut payload).map_err(|error| {
        PipelineError::SerializeFailed(format!(
            "failed to serialize <{}/> element: {error}",
            element.name()
        ))
    })?;
    Ok(payload)
}

/// Serialize for logs and debug sinks. Never fails.
pub fn to_debug_string(element: &Element) -> String {
    serialize_element(element)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|_| format!("<{}/>", element.name()))
}

pub fn is_stream_features(element: &Element) -> bool {
    element.name() == "features" && element.ns() == ns::STREAM
}

pub fn is_iq(element: &Element) -> bool {
    element.name() == "iq"
}

/// A process-unique stanza id tagged with `suffix`, e.g. `"…:register"`.
pub fn unique_id(suffix: &str) -> String {
    format!("{}:{suffix}", uuid::Uuid::new_v4())
}

/// Build an `<iq/>` in the client namespace. The payload is appended as is.
pub fn iq(kind: &str, id: &str, payload: Element) -> Element {
    Element::builder("iq", ns::CLIENT)
        .attr("type", kind)
        .attr("id", id)
        .append(payload)
        .build()
}
