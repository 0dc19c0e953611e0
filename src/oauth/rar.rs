//! RFC 9396 Rich Authorization Requests — `authorization_details` policy.
//!
//! Each detail names a type from the plugin's `rar-types` table. The type
//! carries the allow-lists its details are checked against and the user
//! claims copied into the detail when a token is issued.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clients::ClientRecord;
use crate::config::{PluginConfig, RarTypeDefinition};
use crate::error::{ParError, ParResult};

/// A single RFC 9396 authorization detail entry.
///
/// ```json
/// {"type": "type1", "actions": ["action1-type1"], "locations": ["https://type1-1.resource.tld"]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationDetail {
    #[serde(rename = "type")]
    pub detail_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatypes: Option<Vec<String>>,

    /// Scopes the detail is bound to, when the client states them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    /// Type-specific members, kept as sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parse the `authorization_details` parameter (a JSON array).
pub fn parse_details(text: &str) -> ParResult<Vec<AuthorizationDetail>> {
    let details: Vec<AuthorizationDetail> = serde_json::from_str(text)
        .map_err(|e| ParError::MalformedRequest(format!("authorization_details: {}", e)))?;
    if details.is_empty() {
        return Err(ParError::MalformedRequest("authorization_details is empty".into()));
    }
    Ok(details)
}

/// Where the details travelled. Flat parameters are neither signed nor encrypted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetailsTransport {
    pub signed: bool,
    pub encrypted: bool,
}

pub fn validate_details(
    details: &[AuthorizationDetail],
    requested_scopes: &[String],
    client: &ClientRecord,
    config: &PluginConfig,
    transport: DetailsTransport,
) -> ParResult<()> {
    if !config.oauth_rar_allowed {
        return Err(ParError::PolicyViolation("authorization_details not allowed".into()));
    }
    if !transport.signed && !config.rar_allow_auth_unsigned {
        return Err(ParError::PolicyViolation(
            "authorization_details must be in a signed request object".into(),
        ));
    }
    if !transport.encrypted && !config.rar_allow_auth_unencrypted {
        return Err(ParError::PolicyViolation(
            "authorization_details must be in an encrypted request object".into(),
        ));
    }

    let client_types = client.property_list(&config.rar_types_client_property);
    for detail in details {
        let def = config.rar_type(&detail.detail_type).ok_or_else(|| {
            ParError::PolicyViolation(format!("unknown authorization type {}", detail.detail_type))
        })?;
        if !client_types.iter().any(|t| t == &def.name) {
            return Err(ParError::PolicyViolation(format!(
                "client {} may not request type {}",
                client.client_id, def.name
            )));
        }
        check_detail(detail, def, requested_scopes)?;
    }
    Ok(())
}

fn check_detail(detail: &AuthorizationDetail, def: &RarTypeDefinition, requested_scopes: &[String]) -> ParResult<()> {
    subset(&detail.locations, &def.allowed_locations, "locations", &def.name)?;
    subset(&detail.actions, &def.allowed_actions, "actions", &def.name)?;
    subset(&detail.datatypes, &def.allowed_datatypes, "datatypes", &def.name)?;
    subset(&detail.scopes, &def.allowed_scopes, "scopes", &def.name)?;

    // A type bound to scopes is only reachable through one of them.
    if !def.allowed_scopes.is_empty()
        && !requested_scopes.iter().any(|s| def.allowed_scopes.contains(s))
    {
        return Err(ParError::PolicyViolation(format!(
            "type {} needs one of scopes {:?}",
            def.name, def.allowed_scopes
        )));
    }
    Ok(())
}

fn subset(requested: &Option<Vec<String>>, allowed: &[String], member: &str, type_name: &str) -> ParResult<()> {
    let Some(requested) = requested else {
        return Ok(());
    };
    match requested.iter().find(|value| !allowed.contains(*value)) {
        Some(value) => Err(ParError::PolicyViolation(format!(
            "{} {} not allowed for type {}",
            member, value, type_name
        ))),
        None => Ok(()),
    }
}

/// Copy the type's enriched claims from the user's profile into each detail.
pub fn enrich(
    mut details: Vec<AuthorizationDetail>,
    config: &PluginConfig,
    user_claims: &Map<String, Value>,
) -> Vec<AuthorizationDetail> {
    for detail in details.iter_mut() {
        let Some(def) = config.rar_type(&detail.detail_type) else {
            continue;
        };
        for claim in &def.enriched_claims {
            if let Some(value) = user_claims.get(claim) {
                detail.extra.insert(claim.clone(), value.clone());
            }
        }
    }
    details
}
