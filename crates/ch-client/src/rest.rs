//! REST collaborator.
//!
//! Everything here is a plain request/response call consumed from setup
//! and update paths; nothing touches the frame multiplexer. The client
//! owns its cookie jar — the `auth.chatango.com` cookie obtained by
//! `login` is what the PM endpoint's `tlogin` consumes — and carries the
//! fixed headers the endpoints require.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, USER_AGENT};
use tracing::debug;

use crate::error::ClientError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0";
const AUTH_COOKIE: &str = "auth.chatango.com";

/// Supplies the PM auth token. Implemented by [`RestClient`] for real use
/// and by stubs in tests.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    async fn token(&self) -> Result<String, ClientError>;
}

/// One account's HTTP client: cookie jar, fixed headers, 10 s timeout.
pub struct RestClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    username: String,
    password: String,
}

impl RestClient {
    pub fn new(username: &str, password: &str) -> Result<Self, ClientError> {
        let jar = Arc::new(Jar::default());
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static("https://st.chatango.com"));
        headers.insert(USER_AGENT, HeaderValue::from_static(UA));
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .cookie_provider(jar.clone())
            .default_headers(headers)
            .build()?;
        Ok(RestClient {
            http,
            jar,
            username: username.to_lowercase(),
            password: password.to_owned(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Log in and return the `auth.chatango.com` cookie value. The cookie
    /// also stays in the jar for subsequent calls.
    pub async fn login(&self) -> Result<String, ClientError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(ClientError::LoginFailed);
        }
        let response = self
            .http
            .post("https://chatango.com/login")
            .header("Host", "chatango.com")
            .form(&[
                ("user_id", self.username.as_str()),
                ("password", self.password.as_str()),
                ("storecookie", "on"),
                ("checkerrors", "yes"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::LoginFailed);
        }
        self.auth_cookie().ok_or(ClientError::LoginFailed)
    }

    fn auth_cookie(&self) -> Option<String> {
        let url = "https://chatango.com/".parse().ok()?;
        let cookies = self.jar.cookies(&url)?;
        let cookies = cookies.to_str().ok()?.to_owned();
        cookies.split("; ").find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == AUTH_COOKIE && !value.is_empty()).then(|| value.to_owned())
        })
    }

    /// Whether `name` is a group (rooms must be validated before opening a
    /// WebSocket to them).
    pub async fn is_group(&self, name: &str) -> Result<bool, ClientError> {
        let name = name.to_lowercase();
        let body = self
            .http
            .get("https://chatango.com/checkname")
            .query(&[("name", name.as_str())])
            .send()
            .await?
            .text()
            .await?;
        // Reply shape: `answer=1&name=…` — answer 1 means the name is a
        // registered group.
        Ok(query_field(&body, "answer") == Some("1"))
    }

    pub async fn get_mini_profile(&self, name: &str) -> Result<String, ClientError> {
        self.profile_resource(name, "mod1.xml").await
    }

    pub async fn get_full_profile(&self, name: &str) -> Result<String, ClientError> {
        self.profile_resource(name, "mod2.xml").await
    }

    pub async fn get_background(&self, name: &str) -> Result<String, ClientError> {
        self.profile_resource(name, "msgbg.xml").await
    }

    pub async fn get_style(&self, name: &str) -> Result<String, ClientError> {
        self.profile_resource(name, "msgstyles.json").await
    }

    async fn profile_resource(&self, name: &str, file: &str) -> Result<String, ClientError> {
        let name = name.to_lowercase();
        if name.is_empty() {
            return Err(ClientError::InvalidUsername);
        }
        let url = format!("https://{}/{file}", profile_path(&name));
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::RequestFailed(format!(
                "{file} fetch: {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }

    /// Search registered usernames. Returns `(name, is_online)` pairs;
    /// records are `;`-separated, fields split on `,`.
    pub async fn search_people(&self, query: &str) -> Result<Vec<(String, bool)>, ClientError> {
        let body = self
            .http
            .get("https://st.chatango.com/script/namesearch")
            .header("Host", "script.st.chatango.com")
            .query(&[("q", query)])
            .send()
            .await?
            .text()
            .await?;
        Ok(body
            .split(';')
            .filter(|r| !r.is_empty())
            .filter_map(|record| {
                let (name, online) = record.split_once(',')?;
                Some((name.to_owned(), online == "1"))
            })
            .collect())
    }

    /// Update the stored message background settings.
    pub async fn set_background(&self, params: &[(&str, &str)]) -> Result<(), ClientError> {
        self.authed_form("https://chatango.com/updatemsgbg", params)
            .await
    }

    /// Update the stored message style settings.
    pub async fn set_style(&self, params: &[(&str, &str)]) -> Result<(), ClientError> {
        self.authed_form("https://chatango.com/updatemsgstyles", params)
            .await
    }

    async fn authed_form(&self, url: &str, params: &[(&str, &str)]) -> Result<(), ClientError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("lo", self.username.as_str()),
            ("p", self.password.as_str()),
        ];
        form.extend_from_slice(params);
        let response = self.http.post(url).form(&form).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::RequestFailed(format!(
                "{url}: {}",
                response.status()
            )))
        }
    }

    /// Upload a profile image. Returns the assigned image id.
    pub async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ClientError> {
        self.upload("https://chatango.com/uploadimg", filename, bytes)
            .await
    }

    /// Upload a message-background image.
    pub async fn upload_bg_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ClientError> {
        self.upload("https://chatango.com/uploadmsgbg", filename, bytes)
            .await
    }

    async fn upload(
        &self,
        url: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ClientError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_owned())
            .mime_str("image/jpeg")
            .map_err(|e| ClientError::RequestFailed(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("u", self.username.clone())
            .text("p", self.password.clone())
            .part("filedata", part);
        let body = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await?
            .text()
            .await?;
        // Reply shape: `success:<image id>` on success.
        match body.trim().split_once(':') {
            Some(("success", id)) => Ok(id.to_owned()),
            _ => Err(ClientError::RequestFailed(format!("upload refused: {body}"))),
        }
    }

    /// Register a device token for push delivery.
    pub async fn register_gcm(&self, token: &str) -> Result<(), ClientError> {
        self.gcm_call("register", token).await
    }

    pub async fn set_token_gcm(&self, token: &str) -> Result<(), ClientError> {
        self.gcm_call("settoken", token).await
    }

    pub async fn unregister_gcm(&self, token: &str) -> Result<(), ClientError> {
        self.gcm_call("unregister", token).await
    }

    async fn gcm_call(&self, action: &str, token: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post("https://settings.chatango.com/updategcm")
            .form(&[
                ("sid", self.username.as_str()),
                ("pwd", self.password.as_str()),
                ("action", action),
                ("token", token),
            ])
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::RequestFailed(format!(
                "gcm {action}: {}",
                response.status()
            )))
        }
    }

    /// Whether `name` is available for registration. Returns the server's
    /// objections when it is not.
    pub async fn check_username(&self, name: &str) -> Result<Vec<String>, ClientError> {
        let body = self
            .http
            .get("https://chatango.com/checkname")
            .query(&[("name", &name.to_lowercase())])
            .send()
            .await?
            .text()
            .await?;
        match query_field(&body, "answer") {
            Some("0") | None => Ok(Vec::new()),
            Some(_) => Ok(query_field(&body, "errors")
                .unwrap_or("taken")
                .split(',')
                .map(str::to_owned)
                .collect()),
        }
    }

    /// Groups owned by (or moderated by) the logged-in account.
    pub async fn get_group_list(&self) -> Result<Vec<String>, ClientError> {
        let body = self
            .http
            .get("https://chatango.com/groupslist")
            .query(&[("u", self.username.as_str())])
            .send()
            .await?
            .text()
            .await?;
        Ok(body
            .split(';')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

#[async_trait]
impl TokenSource for RestClient {
    async fn token(&self) -> Result<String, ClientError> {
        // Reuse a live cookie; refresh through a fresh login otherwise.
        if let Some(token) = self.auth_cookie() {
            debug!("reusing cached auth cookie");
            return Ok(token);
        }
        self.login().await
    }
}

/// `ust.chatango.com/profileimg/{u0}/{u1}/{name}` where `u0`/`u1` are the
/// first two characters (the first again for 1-character names).
fn profile_path(name: &str) -> String {
    let mut chars = name.chars();
    let u0 = chars.next().unwrap_or('0');
    let u1 = chars.next().unwrap_or(u0);
    format!("ust.chatango.com/profileimg/{u0}/{u1}/{name}")
}

fn query_field<'a>(body: &'a str, field: &str) -> Option<&'a str> {
    body.split('&')
        .find_map(|pair| match pair.split_once('=') {
            Some((k, v)) if k == field => Some(v),
            _ => None,
        })
}
