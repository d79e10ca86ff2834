// src/models/call.rs
use serde::Serialize;
use std::collections::HashMap;

/// An inbound INVITE as received from the signaling engine.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    pub call_id: String,
    pub request_uri: String,
    pub from: String,
    pub to: String,
    pub source_address: Option<String>,
    /// Headers not modelled above; the first occurrence of a name wins.
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Identifies the signaling connection the request arrived on.
    pub transport_id: String,
}

impl CallRequest {
    /// User part of the Request-URI, falling back to the To header.
    pub fn dialed_user(&self) -> Option<&str> {
        uri_user(&self.request_uri).or_else(|| uri_user(&self.to))
    }

    pub fn calling_user(&self) -> Option<&str> {
        uri_user(&self.from)
    }

    pub fn caller_name(&self) -> Option<&str> {
        display_name(&self.from)
    }

    pub fn request_host(&self) -> Option<&str> {
        uri_host(&self.request_uri).or_else(|| uri_host(&self.to))
    }

    /// Application-defined `X-` headers.
    pub fn custom_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter(|(k, _)| k.len() > 2 && k.get(..2).map_or(false, |p| p.eq_ignore_ascii_case("x-")))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Strips a name-addr down to its URI: `"Alice" <sip:a@b>;tag=1` -> `sip:a@b`.
fn addr_spec(value: &str) -> &str {
    match (value.find('<'), value.find('>')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value.split(';').next().unwrap_or(value).trim(),
    }
}

fn strip_scheme(uri: &str) -> &str {
    for scheme in ["sips:", "sip:", "tel:"] {
        if uri.get(..scheme.len()).map_or(false, |s| s.eq_ignore_ascii_case(scheme)) {
            return &uri[scheme.len()..];
        }
    }
    uri
}

pub fn uri_user(value: &str) -> Option<&str> {
    let spec = addr_spec(value);
    let is_tel = spec.get(..4).map_or(false, |s| s.eq_ignore_ascii_case("tel:"));
    let rest = strip_scheme(spec);
    let user = match rest.find('@') {
        Some(at) => &rest[..at],
        None if is_tel => rest,
        None => return None,
    };
    let user = user.split(';').next().unwrap_or(user);
    let user = user.split(':').next().unwrap_or(user);
    (!user.is_empty()).then_some(user)
}

pub fn uri_host(value: &str) -> Option<&str> {
    let rest = strip_scheme(addr_spec(value));
    let host_port = match rest.find('@') {
        Some(at) => &rest[at + 1..],
        None => rest,
    };
    let host_port = host_port.split(';').next().unwrap_or(host_port);
    let host = match host_port.rfind(':') {
        Some(colon) if !host_port.ends_with(']') => &host_port[..colon],
        _ => host_port,
    };
    (!host.is_empty()).then_some(host)
}

fn display_name(value: &str) -> Option<&str> {
    let open = value.find('<')?;
    let name = value[..open].trim().trim_matches('"').trim();
    (!name.is_empty()).then_some(name)
}

/// A final response handed back to the signaling engine for one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl SipResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}
