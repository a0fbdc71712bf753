//! Standard response envelope.
//!
//! # Responsibilities
//! - Carry status, error text, service labels and the result payload
//! - Render as JSON (default) or XML
//! - Provide the gateway's own localized messages
//!
//! # Design Decisions
//! - The envelope status is also the HTTP status
//! - Gateway-generated bodies are always JSON

use std::io::Cursor;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_XML: &str = "application/xml";

/// Messages the gateway itself produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMessage {
    Success,
    NotRegistered,
    Unavailable,
    PathNotFound,
}

impl GatewayMessage {
    fn pairs(&self) -> [(&'static str, &'static str); 2] {
        match self {
            GatewayMessage::Success => [("en", "Success"), ("id", "Berhasil")],
            GatewayMessage::NotRegistered => {
                [("en", "Service not registered"), ("id", "Layanan tidak terdaftar")]
            }
            GatewayMessage::Unavailable => {
                [("en", "Service unavailable"), ("id", "Layanan tidak dapat diakses")]
            }
            GatewayMessage::PathNotFound => [("en", "Path not found"), ("id", "Jalur tidak ditemukan")],
        }
    }

    /// Text for `locale`, English when the locale is unknown.
    pub fn text(&self, locale: &str) -> &'static str {
        let pairs = self.pairs();
        pairs
            .iter()
            .find(|(lang, _)| lang.eq_ignore_ascii_case(locale))
            .unwrap_or(&pairs[0])
            .1
    }

    /// All locales as a JSON object.
    pub fn as_value(&self) -> Value {
        let map = self
            .pairs()
            .iter()
            .map(|(lang, text)| (lang.to_string(), Value::String(text.to_string())))
            .collect();
        Value::Object(map)
    }
}

/// `{response, error, appid, svcid, controller, action, result}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub response: u16,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub appid: String,
    #[serde(default)]
    pub svcid: String,
    #[serde(default)]
    pub controller: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub result: Value,
}

impl Envelope {
    pub fn new(status: u16) -> Self {
        Self {
            response: status,
            error: String::new(),
            appid: String::new(),
            svcid: String::new(),
            controller: String::new(),
            action: String::new(),
            result: Value::String(String::new()),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn with_appid(mut self, appid: impl Into<String>) -> Self {
        self.appid = appid.into();
        self
    }

    pub fn with_svcid(mut self, svcid: impl Into<String>) -> Self {
        self.svcid = svcid.into();
        self
    }

    pub fn with_controller(mut self, controller: impl Into<String>) -> Self {
        self.controller = controller.into();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.response).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Serializing a struct of strings and a `Value` cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        start(&mut writer, "Response")?;
        text_element(&mut writer, "Response", &self.response.to_string())?;
        text_element(&mut writer, "Error", &self.error)?;
        text_element(&mut writer, "Appid", &self.appid)?;
        text_element(&mut writer, "Svcid", &self.svcid)?;
        text_element(&mut writer, "Controller", &self.controller)?;
        text_element(&mut writer, "Action", &self.action)?;
        value_element(&mut writer, "Result", &self.result)?;
        end(&mut writer, "Response")?;
        Ok(writer.into_inner().into_inner())
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, self.to_json()).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        response
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn start(writer: &mut XmlWriter, name: &str) -> Result<(), String> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| e.to_string())
}

fn end(writer: &mut XmlWriter, name: &str) -> Result<(), String> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| e.to_string())
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), String> {
    start(writer, name)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| e.to_string())?;
    end(writer, name)
}

fn value_element(writer: &mut XmlWriter, name: &str, value: &Value) -> Result<(), String> {
    match value {
        Value::Object(map) => {
            start(writer, name)?;
            for (key, inner) in map {
                value_element(writer, &element_name(key), inner)?;
            }
            end(writer, name)
        }
        Value::Array(items) => {
            start(writer, name)?;
            for inner in items {
                value_element(writer, "item", inner)?;
            }
            end(writer, name)
        }
        Value::Null => text_element(writer, name, ""),
        Value::String(s) => text_element(writer, name, s),
        other => text_element(writer, name, &other.to_string()),
    }
}

/// Map an arbitrary object key onto a legal XML element name.
fn element_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .collect();
    if name.is_empty() || !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let env = Envelope::new(501)
            .with_error("Service not registered")
            .with_svcid("billing")
            .with_controller("/billing/x")
            .with_action("GET");
        let json: Value = serde_json::from_slice(&env.to_json()).unwrap();
        assert_eq!(json["response"], 501);
        assert_eq!(json["svcid"], "billing");
        assert_eq!(json["result"], "");
        assert_eq!(json["appid"], "");
    }

    #[test]
    fn test_xml_rendering() {
        let env = Envelope::new(200)
            .with_action("Get")
            .with_result(serde_json::json!({"en": "Success", "1x": [1, 2], "a<b": null}));
        let xml = String::from_utf8(env.to_xml().unwrap()).unwrap();

        assert!(xml.starts_with("<Response><Response>200</Response>"));
        assert!(xml.contains("<Action>Get</Action>"));
        assert!(xml.contains("<en>Success</en>"));
        assert!(xml.contains("<_1x><item>1</item><item>2</item></_1x>"));
        assert!(xml.contains("<a_b></a_b>"));
        assert!(xml.ends_with("</Result></Response>"));
    }

    #[test]
    fn test_gateway_messages() {
        assert_eq!(GatewayMessage::NotRegistered.text("id"), "Layanan tidak terdaftar");
        assert_eq!(GatewayMessage::NotRegistered.text("de"), "Service not registered");
        assert_eq!(GatewayMessage::Success.as_value()["id"], "Berhasil");
    }

    #[test]
    fn test_invalid_status_maps_to_500() {
        assert_eq!(Envelope::new(42).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
