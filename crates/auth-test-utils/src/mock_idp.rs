//! Wiremock identity provider.
//!
//! Serves an OIDC discovery document, a JWKS with one deterministic
//! signing key, and token and revocation endpoints that tests program per
//! scenario.

use crate::crypto_fixtures::TestKeypair;
use crate::token_builders::TokenBuilder;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// JWKS document publishing `keys`.
pub fn jwks_body(keys: &[&TestKeypair]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

/// Discovery document for a provider rooted at `base`.
pub fn discovery_body(base: &str) -> Value {
    json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "jwks_uri": format!("{base}/jwks"),
        "revocation_endpoint": format!("{base}/revoke"),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"]
    })
}

/// Token endpoint success body.
pub fn token_response(
    access_token: &str,
    refresh_token: Option<&str>,
    id_token: Option<&str>,
    expires_in: i64,
) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(rt) = refresh_token {
        body["refresh_token"] = json!(rt);
    }
    if let Some(id) = id_token {
        body["id_token"] = json!(id);
    }
    body
}

/// A running mock provider.
pub struct MockIdentityProvider {
    server: MockServer,
    key: TestKeypair,
    client_id: String,
}

impl MockIdentityProvider {
    /// Start the provider with discovery and JWKS mounted.
    pub async fn start(client_id: &str) -> Self {
        let server = MockServer::start().await;
        let key = TestKeypair::new(1, "idp-key-1");

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(discovery_body(&server.uri())))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&[&key])))
            .mount(&server)
            .await;

        Self {
            server,
            key,
            client_id: client_id.to_string(),
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.server.uri())
    }

    /// Issuer claimed in the discovery document.
    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn key(&self) -> &TestKeypair {
        &self.key
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// A token builder preset with this provider's issuer and the client id
    /// as audience.
    pub fn token_builder(&self) -> TokenBuilder {
        TokenBuilder::new(&self.issuer(), &self.client_id)
    }

    /// A signed ID token for `subject`.
    pub fn id_token(&self, subject: &str, email: &str, roles: &[&str]) -> String {
        self.token_builder()
            .subject(subject)
            .email(email)
            .roles(roles.iter().copied())
            .sign(&self.key)
    }

    /// Answer the authorization-code exchange for `code` with `body`.
    pub async fn mock_code_exchange(&self, code: &str, body: Value) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains(format!("code={code}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer refresh-token grants with `response`, optionally asserting
    /// the number of calls when the server is dropped.
    pub async fn mock_refresh(&self, response: ResponseTemplate, expected_calls: Option<u64>) {
        let mock = Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(response);
        match expected_calls {
            Some(n) => mock.expect(n).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Answer revocation requests with `status`.
    pub async fn mock_revocation(&self, status: u16, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }
}
