//! Parsing and rendering of the xray server config.
//!
//! The input config is parsed once at startup for the admin API address and
//! the set of supported inbounds. Rendering injects a user set into every
//! supported inbound's client list without touching anything else.

use std::path::Path;

use proxops_common::{
    api::ApiUser,
    error::Error,
    state::{Inbound, InboundType},
};
use serde_json::{json, Value};

#[derive(Debug)]
pub struct ServerConfig {
    raw: Value,
    inbounds: Vec<Inbound>,
    api_listen: String,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Access(format!("read server config {}: {e}", path.display())))?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parse server config {}: {e}", path.display())))?;

        let inbounds = parse_inbounds(&value);
        if inbounds.is_empty() {
            return Err(Error::Config(
                "no supported inbounds in server config".into(),
            ));
        }

        let api_listen = value
            .pointer("/api/listen")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("no api.listen address in server config".into()))?
            .to_string();

        Ok(Self {
            raw: value,
            inbounds,
            api_listen,
        })
    }

    pub fn inbounds(&self) -> &[Inbound] {
        &self.inbounds
    }

    pub fn api_listen(&self) -> &str {
        &self.api_listen
    }

    /// Produce the runtime config with `users` installed as the client list
    /// of every supported inbound.
    pub fn render_with_users(&self, users: &[ApiUser]) -> Result<String, Error> {
        let mut value = self.raw.clone();

        let sections = value
            .get_mut("inbounds")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| Error::Internal("inbounds vanished from config".into()))?;

        for inbound in &self.inbounds {
            let clients: Vec<Value> = users
                .iter()
                .map(|u| section_user(inbound.ty, u))
                .collect::<Result<_, _>>()?;

            let section = sections
                .iter_mut()
                .find(|s| s.get("tag").and_then(Value::as_str) == Some(inbound.tag.as_str()))
                .ok_or_else(|| {
                    Error::Internal(format!("inbound {} vanished from config", inbound.tag))
                })?;
            section["settings"]["clients"] = Value::Array(clients);
        }

        serde_json::to_string_pretty(&value)
            .map_err(|e| Error::Internal(format!("serialize runtime config: {e}")))
    }
}

fn parse_inbounds(value: &Value) -> Vec<Inbound> {
    let Some(sections) = value.get("inbounds").and_then(Value::as_array) else {
        return Vec::new();
    };

    sections
        .iter()
        .filter_map(|section| {
            let tag = section.get("tag").and_then(Value::as_str)?;
            let protocol = section.get("protocol").and_then(Value::as_str).unwrap_or("");
            let network = section
                .pointer("/streamSettings/network")
                .and_then(Value::as_str)
                .unwrap_or("");
            let security = section
                .pointer("/streamSettings/security")
                .and_then(Value::as_str)
                .unwrap_or("");
            let ty = inbound_type(protocol, network, security);
            (ty != InboundType::Unsupported).then(|| Inbound {
                tag: tag.to_string(),
                ty,
            })
        })
        .collect()
}

fn inbound_type(protocol: &str, network: &str, security: &str) -> InboundType {
    if protocol != "vless" {
        return InboundType::Unsupported;
    }
    if network == "tcp" && security == "reality" {
        return InboundType::VlessTcpReality;
    }
    if network == "xhttp" {
        return InboundType::VlessXhttp;
    }
    InboundType::Unsupported
}

fn section_user(ty: InboundType, user: &ApiUser) -> Result<Value, Error> {
    match ty {
        InboundType::VlessTcpReality => Ok(json!({
            "email": user.name,
            "flow": "xtls-rprx-vision",
            "id": user.uuid,
        })),
        InboundType::VlessXhttp => Ok(json!({
            "email": user.name,
            "id": user.uuid,
        })),
        InboundType::Unsupported => Err(Error::Internal("unsupported inbound type".into())),
    }
}
