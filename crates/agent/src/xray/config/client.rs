//! Client config template handling.
//!
//! The client config is a JSON document with `{{ .Field }}` placeholders in
//! its user fields. The daemon never renders it for real clients; it only
//! extracts the placeholder names so the manager can serve the template out
//! together with the field names.

use std::{collections::BTreeSet, path::Path, sync::OnceLock};

use proxops_common::{error::Error, state::ClientConfig};
use regex::Regex;
use serde_json::Value;

pub fn load(path: &Path) -> Result<ClientConfig, Error> {
    let template = std::fs::read_to_string(path)
        .map_err(|e| Error::Access(format!("read client config {}: {e}", path.display())))?;
    let value: Value = serde_json::from_str(&template)
        .map_err(|e| Error::Config(format!("parse client config {}: {e}", path.display())))?;

    let users = collect_users(&value);
    let user_name_field = single_field(&users, "email")?;
    let vless_uuid_field = single_field(&users, "id")?;

    let cfg = ClientConfig {
        template,
        user_name_field,
        vless_uuid_field,
    };
    validate(&cfg)?;
    Ok(cfg)
}

/// Probe-render the template and make sure the result is still JSON.
fn validate(cfg: &ClientConfig) -> Result<(), Error> {
    let rendered = render(
        &cfg.template,
        &[
            (cfg.user_name_field.as_str(), "probe-name"),
            (cfg.vless_uuid_field.as_str(), "probe-uuid"),
        ],
    );
    serde_json::from_str::<Value>(&rendered)
        .map_err(|e| Error::Config(format!("client template renders to invalid JSON: {e}")))?;
    Ok(())
}

fn template_var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").unwrap())
}

/// Substitute `{{ .Field }}` placeholders; unknown fields are left in place.
pub fn render(template: &str, fields: &[(&str, &str)]) -> String {
    template_var_re()
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            fields
                .iter()
                .find(|(field, _)| *field == name)
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// All `outbounds[*].settings.vnext[*].users[*]` entries.
fn collect_users(value: &Value) -> Vec<&Value> {
    let mut users = Vec::new();
    let Some(outbounds) = value.get("outbounds").and_then(Value::as_array) else {
        return users;
    };
    for outbound in outbounds {
        let Some(vnext) = outbound.pointer("/settings/vnext").and_then(Value::as_array) else {
            continue;
        };
        for server in vnext {
            if let Some(entries) = server.get("users").and_then(Value::as_array) {
                users.extend(entries);
            }
        }
    }
    users
}

/// The named field must resolve to exactly one distinct template variable
/// across every user entry.
fn single_field(users: &[&Value], name: &str) -> Result<String, Error> {
    let mut fields = BTreeSet::new();
    for user in users {
        let Some(raw) = user.get(name).and_then(Value::as_str) else {
            continue;
        };
        fields.insert(extract_template_var(raw)?);
    }

    let mut iter = fields.into_iter();
    match (iter.next(), iter.next()) {
        (Some(field), None) => Ok(field),
        (None, _) => Err(Error::Config(format!(
            "no template variable found for user field {name}"
        ))),
        (Some(a), Some(b)) => Err(Error::Config(format!(
            "multiple template variables for user field {name}: {a}, {b}"
        ))),
    }
}

fn extract_template_var(raw: &str) -> Result<String, Error> {
    let var = raw.trim();
    let var = var
        .strip_prefix("{{")
        .and_then(|v| v.strip_suffix("}}"))
        .ok_or_else(|| Error::Config(format!("invalid template format: {raw}")))?
        .trim();
    let var = var
        .strip_prefix('.')
        .ok_or_else(|| Error::Config("template variable should start with '.'".into()))?;
    if var.is_empty() {
        return Err(Error::Config("empty template variable name".into()));
    }
    Ok(var.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_cfg(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const CLIENT_CFG: &str = r#"{
        "outbounds": [
            {
                "protocol": "vless",
                "settings": {
                    "vnext": [
                        {
                            "address": "example.com",
                            "users": [
                                { "email": "{{ .UserName }}", "id": "{{ .VlessUUID }}" }
                            ]
                        },
                        {
                            "address": "example.org",
                            "users": [
                                { "email": "{{ .UserName }}", "id": "{{ .VlessUUID }}" }
                            ]
                        }
                    ]
                }
            },
            { "protocol": "freedom", "settings": {} }
        ]
    }"#;

    #[test]
    fn extracts_single_template_fields() {
        let file = write_cfg(CLIENT_CFG);
        let cfg = load(file.path()).unwrap();

        assert_eq!(cfg.user_name_field, "UserName");
        assert_eq!(cfg.vless_uuid_field, "VlessUUID");
        assert!(cfg.template.contains("{{ .UserName }}"));
    }

    #[test]
    fn rejects_distinct_variables_for_one_field() {
        let file = write_cfg(
            r#"{
            "outbounds": [{
                "protocol": "vless",
                "settings": { "vnext": [{
                    "users": [
                        { "email": "{{ .UserName }}", "id": "{{ .VlessUUID }}" },
                        { "email": "{{ .UserName }}", "id": "{{ .OtherUUID }}" }
                    ]
                }]}
            }]
        }"#,
        );
        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_plain_value_in_user_field() {
        let file = write_cfg(
            r#"{
            "outbounds": [{
                "protocol": "vless",
                "settings": { "vnext": [{
                    "users": [{ "email": "alice@example.com", "id": "{{ .VlessUUID }}" }]
                }]}
            }]
        }"#,
        );
        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn renders_placeholders() {
        let rendered = render(
            r#"{"email": "{{ .UserName }}", "id": "{{.VlessUUID}}"}"#,
            &[("UserName", "alice"), ("VlessUUID", "u-1")],
        );
        assert_eq!(rendered, r#"{"email": "alice", "id": "u-1"}"#);
    }
}
