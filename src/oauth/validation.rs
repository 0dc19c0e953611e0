use std::collections::BTreeSet;

use super::decoder::RequestObject;
use super::pkce;
use super::rar::{self, DetailsTransport};
use super::types::{parse_response_types, AuthorizationParameters, ResponseType, ValidatedRequest};
use crate::clients::ClientRecord;
use crate::config::PluginConfig;
use crate::error::{ParError, ParResult};

/// Run every parameter and policy check against the resolved `client`.
///
/// Checks run in a fixed order and the first failure wins. Nothing is
/// stored or altered on failure.
pub fn validate_request(
    parameters: AuthorizationParameters,
    client: &ClientRecord,
    request_object: Option<&RequestObject>,
    config: &PluginConfig,
) -> ParResult<ValidatedRequest> {
    let response_types = check_response_types(parameters.response_type.as_deref(), client, config)?;

    let client_id = parameters
        .client_id
        .as_deref()
        .ok_or_else(|| ParError::MalformedRequest("client_id missing".into()))?;
    if client_id != client.client_id {
        return Err(ParError::ClientAuthFailure(format!(
            "client_id {} does not match authenticated client {}",
            client_id, client.client_id
        )));
    }
    if !client.enabled {
        return Err(ParError::ClientAuthFailure(format!("client {} is disabled", client_id)));
    }

    let redirect_uri = check_redirect_uri(parameters.redirect_uri.as_deref(), client)?;

    let scopes = parameters.scopes();
    if scopes.is_empty() {
        return Err(ParError::MalformedRequest("scope missing".into()));
    }
    // An empty registration leaves the client unrestricted
    if !client.scope.is_empty() {
        if let Some(extra) = scopes.iter().find(|s| !client.scope.contains(*s)) {
            return Err(ParError::PolicyViolation(format!(
                "scope {} is not registered for {}",
                extra, client.client_id
            )));
        }
    }

    let pkce = pkce::validate_challenge(
        parameters.code_challenge.as_deref(),
        parameters.code_challenge_method.as_deref(),
        config,
    )?;

    if let Some(details) = &parameters.authorization_details {
        let transport = request_object
            .map(|o| DetailsTransport {
                signed: o.envelope.is_signed(),
                encrypted: o.envelope.is_encrypted(),
            })
            .unwrap_or_default();
        rar::validate_details(details, &scopes, client, config, transport)?;
    }

    let mut parameters = parameters;
    parameters.redirect_uri = Some(redirect_uri.clone());

    Ok(ValidatedRequest {
        client_id: client.client_id.clone(),
        redirect_uri,
        response_types,
        scopes,
        pkce,
        parameters,
    })
}

fn check_response_types(
    value: Option<&str>,
    client: &ClientRecord,
    config: &PluginConfig,
) -> ParResult<BTreeSet<ResponseType>> {
    let value = value.ok_or_else(|| ParError::MalformedRequest("response_type missing".into()))?;
    let types = parse_response_types(value)?;
    for response_type in &types {
        let enabled = match response_type {
            ResponseType::Code => config.auth_type_code_enabled,
            ResponseType::Token => config.auth_type_token_enabled,
        };
        if !enabled {
            return Err(ParError::PolicyViolation(format!(
                "response_type {} is disabled",
                response_type.as_str()
            )));
        }
        if !client.authorization_type.iter().any(|t| t == response_type.as_str()) {
            return Err(ParError::PolicyViolation(format!(
                "client {} may not use response_type {}",
                client.client_id,
                response_type.as_str()
            )));
        }
    }
    Ok(types)
}

fn check_redirect_uri(requested: Option<&str>, client: &ClientRecord) -> ParResult<String> {
    match requested {
        Some(uri) if client.redirect_uri.iter().any(|r| r == uri) => Ok(uri.to_string()),
        Some(uri) => Err(ParError::PolicyViolation(format!(
            "redirect_uri {} is not registered for {}",
            uri, client.client_id
        ))),
        None => match client.redirect_uri.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(ParError::MalformedRequest("redirect_uri missing".into())),
        },
    }
}

/// Has the user already granted every requested scope to this client?
pub fn scopes_granted(requested: &[String], granted: &BTreeSet<String>) -> bool {
    requested.iter().all(|s| granted.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jose::Envelope;
    use crate::oauth::pkce::CodeChallengeMethod;
    use std::collections::BTreeMap;

    const REDIRECT: &str = "../../test-oidc.html?param=client1_cb1";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn client() -> ClientRecord {
        let mut client = ClientRecord::new("client1_id");
        client.redirect_uri = vec![REDIRECT.into()];
        client.authorization_type = vec!["code".into(), "token".into()];
        client.properties.insert(
            "authorization_data_types".into(),
            serde_json::json!(["type1"]),
        );
        client
    }

    fn params(pairs: &[(&str, &str)]) -> AuthorizationParameters {
        let mut bag: BTreeMap<String, String> = [
            ("response_type", "code token"),
            ("client_id", "client1_id"),
            ("redirect_uri", REDIRECT),
            ("scope", "g_profile openid"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            bag.insert(k.to_string(), v.to_string());
        }
        AuthorizationParameters::from_bag(bag).unwrap()
    }

    fn rar_config() -> PluginConfig {
        let mut types = BTreeMap::new();
        types.insert(
            "type1".to_string(),
            crate::config::RarTypeDefinition {
                allowed_actions: vec!["action1-type1".into()],
                ..Default::default()
            },
        );
        PluginConfig {
            oauth_rar_allowed: true,
            rar_types: types,
            ..PluginConfig::default()
        }
        .finalize()
        .unwrap()
    }

    #[test]
    fn complete_request_passes() {
        let validated =
            validate_request(params(&[("state", "xyz")]), &client(), None, &PluginConfig::default()).unwrap();
        assert!(validated.wants_code());
        assert!(validated.wants_token());
        assert_eq!(validated.scopes, vec!["g_profile", "openid"]);
        assert_eq!(validated.parameters.state.as_deref(), Some("xyz"));
        assert!(validated.pkce.is_none());
    }

    #[test]
    fn response_type_rules() {
        let config = PluginConfig::default();
        let mut missing = params(&[]);
        missing.response_type = None;
        assert!(matches!(
            validate_request(missing, &client(), None, &config),
            Err(ParError::MalformedRequest(_))
        ));
        assert!(validate_request(params(&[("response_type", "error")]), &client(), None, &config).is_err());

        let mut code_only = client();
        code_only.authorization_type = vec!["code".into()];
        assert!(validate_request(params(&[]), &code_only, None, &config).is_err());

        let no_token = PluginConfig {
            auth_type_token_enabled: false,
            ..PluginConfig::default()
        };
        assert!(validate_request(params(&[]), &client(), None, &no_token).is_err());
        assert!(validate_request(params(&[("response_type", "code")]), &client(), None, &no_token).is_ok());
    }

    #[test]
    fn client_id_must_match() {
        let config = PluginConfig::default();
        assert!(validate_request(params(&[("client_id", "other")]), &client(), None, &config).is_err());

        let mut disabled = client();
        disabled.enabled = false;
        assert!(validate_request(params(&[]), &disabled, None, &config).is_err());
    }

    #[test]
    fn redirect_uri_rules() {
        let config = PluginConfig::default();
        assert!(validate_request(
            params(&[("redirect_uri", "https://evil.tld/cb")]),
            &client(),
            None,
            &config
        )
        .is_err());

        let mut implied = params(&[]);
        implied.redirect_uri = None;
        let validated = validate_request(implied.clone(), &client(), None, &config).unwrap();
        assert_eq!(validated.redirect_uri, REDIRECT);
        assert_eq!(validated.parameters.redirect_uri.as_deref(), Some(REDIRECT));

        let mut two = client();
        two.redirect_uri.push("https://client.tld/cb2".into());
        assert!(validate_request(implied, &two, None, &config).is_err());
    }

    #[test]
    fn scope_required() {
        let mut no_scope = params(&[]);
        no_scope.scope = None;
        assert!(validate_request(no_scope, &client(), None, &PluginConfig::default()).is_err());
    }

    #[test]
    fn registered_scopes_bound_the_request() {
        let config = PluginConfig::default();
        let mut bounded = client();
        bounded.scope = vec!["openid".into(), "g_profile".into()];
        assert!(validate_request(params(&[]), &bounded, None, &config).is_ok());

        let err = validate_request(params(&[("scope", "openid scope3")]), &bounded, None, &config).unwrap_err();
        assert!(matches!(err, ParError::PolicyViolation(_)));

        // Nothing registered, nothing enforced
        assert!(validate_request(params(&[("scope", "openid scope3")]), &client(), None, &config).is_ok());
    }

    #[test]
    fn pkce_is_validated() {
        let config = PluginConfig::default();
        let validated = validate_request(
            params(&[("code_challenge", CHALLENGE), ("code_challenge_method", "S256")]),
            &client(),
            None,
            &config,
        )
        .unwrap();
        assert_eq!(validated.pkce.unwrap().method, CodeChallengeMethod::S256);

        assert!(validate_request(params(&[("code_challenge", CHALLENGE)]), &client(), None, &config).is_err());
    }

    #[test]
    fn rar_transport_follows_request_object() {
        let details = r#"[{"type":"type1","actions":["action1-type1"]}]"#;
        let flat = params(&[("authorization_details", details)]);
        let config = rar_config();

        // Default policy wants details signed and encrypted
        assert!(validate_request(flat.clone(), &client(), None, &config).is_err());

        let nested = RequestObject {
            envelope: Envelope::Nested,
            claims: Default::default(),
            signing_key: None,
            decryption_key: None,
        };
        assert!(validate_request(flat.clone(), &client(), Some(&nested), &config).is_ok());

        let relaxed = PluginConfig {
            rar_allow_auth_unsigned: true,
            rar_allow_auth_unencrypted: true,
            ..rar_config()
        };
        assert!(validate_request(flat, &client(), None, &relaxed).is_ok());
    }

    #[test]
    fn grant_coverage() {
        let granted: BTreeSet<String> = ["openid", "g_profile"].iter().map(|s| s.to_string()).collect();
        assert!(scopes_granted(&["openid".into()], &granted));
        assert!(!scopes_granted(&["openid".into(), "scope3".into()], &granted));
    }
}
