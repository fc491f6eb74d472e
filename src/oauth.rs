//! Authorization-code login against the identity provider.

use crate::config::OAuthConfig;
use crate::error::OAuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UserInfo {
    #[serde(default)]
    pub sub: String,
    #[serde(rename = "preferred_username")]
    pub username: String,
}

pub struct OAuthClient {
    config: OAuthConfig,
    auth_url: Url,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, http: reqwest::Client) -> Result<Self, url::ParseError> {
        let auth_url = Url::parse(&config.auth_url)?;
        Ok(OAuthClient {
            config,
            auth_url,
            http,
        })
    }

    /// A random value to round-trip through the provider as `state`.
    pub fn new_state() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn authorize_url(&self, state: &str) -> Url {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state);
        url
    }

    pub async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let token: TokenResponse = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(OAuthError::TokenExchange)?
            .json()
            .await
            .map_err(OAuthError::TokenExchange)?;
        Ok(token.access_token)
    }

    pub async fn user_info(&self, access_token: &str) -> Result<UserInfo, OAuthError> {
        let resp = self
            .http
            .get(&self.config.user_info_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(OAuthError::UserInfoTransport)?;

        if resp.status() != StatusCode::OK {
            return Err(OAuthError::UserInfoStatus(resp.status().as_u16()));
        }

        resp.json().await.map_err(OAuthError::UserInfoDecode)
    }
}
