//! HTTP client for the node daemon's administrative surface.

use std::time::Duration;

use hmac::{Hmac, Mac};
use jwt::SignWithKey;
use proxops_common::{
    api::{ApiUser, EditUsersRequest, ErrorBody, StartRequest, StartResponse, StatusResponse},
    error::Error,
    state::{NodeProperties, NodeStatus, User},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;

use crate::reconcile::NodeApi;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub iat: i64,
}

pub struct NodeClient {
    client: reqwest::Client,
    endpoint: String,
    key: Option<Hmac<Sha256>>,
}

impl NodeClient {
    /// `access_key` empty means the node runs with auth disabled; requests
    /// are then sent without a bearer token.
    pub fn new(endpoint: &str, access_key: &str) -> Result<Self, Error> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::Config(format!("invalid node endpoint {endpoint}")));
        }

        let key = if access_key.is_empty() {
            None
        } else {
            Some(
                Hmac::new_from_slice(access_key.as_bytes())
                    .map_err(|e| Error::Config(format!("access key: {e}")))?,
            )
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            key,
        })
    }

    fn token(&self) -> Result<Option<String>, Error> {
        let Some(key) = &self.key else {
            return Ok(None);
        };
        let claims = Claims {
            iss: "proxops-controlplane".to_string(),
            iat: chrono::Utc::now().timestamp(),
        };
        let token = claims
            .sign_with_key(key)
            .map_err(|e| Error::Internal(format!("sign access token: {e}")))?;
        Ok(Some(token))
    }

    async fn request<R: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> Result<R, Error> {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.endpoint));
        if let Some(token) = self.token()? {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Service(format!("node api {path}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ErrorBody>()
                .await
                .map(|b| b.message)
                .unwrap_or_else(|_| "no error body".to_string());
            return Err(match status.as_u16() {
                401 => Error::Config(format!("node api {path}: unauthorized: {message}")),
                _ => Error::Service(format!("node api {path}: status {status}: {message}")),
            });
        }

        resp.json::<R>()
            .await
            .map_err(|e| Error::Service(format!("node api {path}: decode response: {e}")))
    }
}

fn to_api_users(users: Vec<User>) -> Vec<ApiUser> {
    users
        .into_iter()
        .map(|u| ApiUser {
            name: u.name,
            uuid: u.vless_uuid,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct Empty {}

impl NodeApi for NodeClient {
    async fn start(&self, users: Vec<User>) -> Result<NodeProperties, Error> {
        let req = StartRequest {
            users: to_api_users(users),
        };
        let resp: StartResponse = self
            .request(reqwest::Method::POST, "/start", Some(&req))
            .await?;
        Ok(resp.properties)
    }

    async fn stop(&self) -> Result<(), Error> {
        let _: Empty = self
            .request(reqwest::Method::POST, "/stop", None::<&()>)
            .await?;
        Ok(())
    }

    async fn status(&self) -> Result<NodeStatus, Error> {
        let resp: StatusResponse = self
            .request(reqwest::Method::GET, "/status", None::<&()>)
            .await?;
        Ok(resp.service_status.into())
    }

    async fn edit_users(&self, add: Vec<User>, remove: Vec<User>) -> Result<(), Error> {
        let req = EditUsersRequest {
            add: to_api_users(add),
            remove: to_api_users(remove),
        };
        let _: Empty = self
            .request(reqwest::Method::POST, "/editUsers", Some(&req))
            .await?;
        Ok(())
    }
}
