//! Blocking client for the engine REST API
//!
//! Covers just the endpoints ovdk needs: SSO login and token revocation,
//! VM lookup, disk fetch and disk attachment update. All requests use the
//! JSON representation of API version 4.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::Parser;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::model::{Disk, DiskAttachment, DiskAttachmentUpdate, DiskUpdate, Fault, Vm, VmList};

/// Default engine API endpoint
pub const DEFAULT_URL: &str = "http://127.0.0.1:8080/ovirt-engine/api";

const SSO_SCOPE: &str = "ovirt-app-api";

/// Options for connecting to the engine
#[derive(Debug, Clone, Parser)]
pub struct ConnectionOpts {
    /// Engine API URL
    #[clap(long, env = "OVDK_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// User name, including the authentication profile
    #[clap(long, env = "OVDK_USERNAME", default_value = "admin@internal")]
    pub username: String,

    /// Password for the user
    #[clap(long, env = "OVDK_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Accept invalid TLS certificates
    #[clap(long, env = "OVDK_INSECURE", value_parser = FalseyValueParser::new())]
    pub insecure: bool,

    /// PEM file with the CA certificate of the engine
    #[clap(long, env = "OVDK_CA_FILE")]
    pub ca_file: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[clap(long, default_value = "60")]
    pub request_timeout: u64,
}

/// The virtual machine and disk a run operates on
#[derive(Debug, Clone, Parser)]
pub struct TargetOpts {
    /// Id of the virtual machine the disk is attached to
    #[clap(long, env = "OVDK_VM_ID")]
    pub vm_id: Uuid,

    /// Id of the disk to update
    #[clap(long, env = "OVDK_DISK_ID")]
    pub disk_id: Uuid,
}

/// Errors returned by the engine client
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or its response not read
    #[error("{method} {url}: {source}")]
    Transport {
        method: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The engine answered with a non-success status
    #[error("{method} {url} returned HTTP {status}: {reason}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        reason: String,
    },
    /// The response body did not match the expected shape
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    /// SSO refused to issue a token
    #[error("SSO authentication failed: {0}")]
    Auth(String),
    /// The VM search returned nothing
    #[error("no virtual machine matches search '{0}'")]
    VmNotFound(String),
    /// Client construction failed (TLS setup, CA file)
    #[error("configuring HTTP client: {0}")]
    Setup(String),
}

/// Operations the disk-update pipeline needs from the engine
pub trait DiskApi {
    /// Fetch the current state of a disk
    fn get_disk(&self, disk_id: &str) -> Result<Disk, ApiError>;

    /// Submit a partial update to a disk through its attachment to a VM
    fn update_disk_attachment(
        &self,
        vm_id: &str,
        disk_id: &str,
        update: &DiskUpdate,
    ) -> Result<DiskAttachment, ApiError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// An authenticated session with the engine
#[derive(Debug)]
pub struct Connection {
    client: Client,
    url: String,
    token: String,
}

/// Build an SSO endpoint URL from the API URL
///
/// The SSO service lives next to the API: `.../ovirt-engine/api` maps to
/// `.../ovirt-engine/sso/oauth/{endpoint}`.
pub(crate) fn sso_url(api_url: &str, endpoint: &str) -> String {
    let api_url = api_url.trim_end_matches('/');
    let parent = api_url
        .rsplit_once('/')
        .map(|(parent, _)| parent)
        .unwrap_or(api_url);
    format!("{parent}/sso/oauth/{endpoint}")
}

fn http_client(opts: &ConnectionOpts) -> Result<Client, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert("Version", HeaderValue::from_static("4"));

    let mut builder = Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(opts.request_timeout))
        .danger_accept_invalid_certs(opts.insecure);

    if let Some(ca_file) = &opts.ca_file {
        let pem = std::fs::read(ca_file)
            .map_err(|e| ApiError::Setup(format!("reading {}: {e}", ca_file.display())))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| ApiError::Setup(format!("parsing {}: {e}", ca_file.display())))?;
        builder = builder.add_root_certificate(cert);
    }

    builder.build().map_err(|e| ApiError::Setup(e.to_string()))
}

/// Turn a response into a typed body, mapping failures to [`ApiError`]
fn decode<T: DeserializeOwned>(
    method: &'static str,
    url: &str,
    response: Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().map_err(|source| ApiError::Transport {
        method,
        url: url.to_owned(),
        source,
    })?;

    if !status.is_success() {
        let reason = serde_json::from_str::<Fault>(&body)
            .ok()
            .and_then(|f| f.summary())
            .unwrap_or_else(|| body.trim().to_owned());
        return Err(ApiError::Status {
            method,
            url: url.to_owned(),
            status: status.as_u16(),
            reason,
        });
    }

    serde_json::from_str(&body).map_err(|source| ApiError::Decode {
        url: url.to_owned(),
        source,
    })
}

impl Connection {
    /// Log in through SSO and return an authenticated connection
    #[instrument(skip_all, fields(url = %opts.url, username = %opts.username))]
    pub fn connect(opts: &ConnectionOpts) -> Result<Self, ApiError> {
        let client = http_client(opts)?;
        let url = opts.url.trim_end_matches('/').to_owned();
        let token_url = sso_url(&url, "token");
        debug!("Requesting access token from {token_url}");

        let response = client
            .post(&token_url)
            .form(&[
                ("grant_type", "password"),
                ("scope", SSO_SCOPE),
                ("username", opts.username.as_str()),
                ("password", opts.password.as_str()),
            ])
            .send()
            .map_err(|source| ApiError::Transport {
                method: "POST",
                url: token_url.clone(),
                source,
            })?;

        // SSO reports bad credentials as a JSON error body, sometimes with 400
        let status = response.status();
        let body = response.text().map_err(|source| ApiError::Transport {
            method: "POST",
            url: token_url.clone(),
            source,
        })?;
        let token: TokenResponse = serde_json::from_str(&body).map_err(|source| {
            if status.is_success() {
                ApiError::Decode {
                    url: token_url.clone(),
                    source,
                }
            } else {
                ApiError::Auth(format!("HTTP {status}: {}", body.trim()))
            }
        })?;

        let token = match token {
            TokenResponse {
                access_token: Some(t),
                ..
            } => t,
            TokenResponse {
                error,
                error_description,
                ..
            } => {
                return Err(ApiError::Auth(
                    error_description
                        .or(error)
                        .unwrap_or_else(|| format!("HTTP {status} without a token")),
                ))
            }
        };

        debug!("Connected to {url}");
        Ok(Self { client, url, token })
    }

    /// Base API URL of this connection
    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: &'static str,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|source| ApiError::Transport {
                method,
                url: url.to_owned(),
                source,
            })?;
        decode(method, url, response)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        let request = self.client.get(&url).query(query);
        self.send("GET", &url, request)
    }

    fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        let request = self.client.put(&url).json(body);
        self.send("PUT", &url, request)
    }

    /// Look up a virtual machine by id using the engine search syntax
    #[instrument(skip(self))]
    pub fn find_vm(&self, vm_id: &str) -> Result<Vm, ApiError> {
        let search = format!("id={vm_id}");
        let vms: VmList = self.get_json("vms", &[("search", search.as_str())])?;
        vms.vm
            .into_iter()
            .next()
            .ok_or(ApiError::VmNotFound(search))
    }

    /// Revoke the access token
    ///
    /// Failure to revoke is logged and otherwise ignored; the token expires
    /// on its own.
    pub fn close(self) {
        let revoke_url = sso_url(&self.url, "revoke");
        let result = self
            .client
            .post(&revoke_url)
            .form(&[("scope", SSO_SCOPE), ("token", self.token.as_str())])
            .send()
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => debug!("Revoked access token"),
            Err(e) => warn!("Failed to revoke access token: {e}"),
        }
    }
}

impl DiskApi for Connection {
    #[instrument(skip(self))]
    fn get_disk(&self, disk_id: &str) -> Result<Disk, ApiError> {
        self.get_json(&format!("disks/{disk_id}"), &[])
    }

    #[instrument(skip(self))]
    fn update_disk_attachment(
        &self,
        vm_id: &str,
        disk_id: &str,
        update: &DiskUpdate,
    ) -> Result<DiskAttachment, ApiError> {
        self.put_json(
            &format!("vms/{vm_id}/diskattachments/{disk_id}"),
            &DiskAttachmentUpdate { disk: update },
        )
    }
}
