use anyhow::{Context, Result, bail};
use portal_auth::{Location, PortalClient, Role};
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::{Map, Value};
use tracing::{debug, info};

pub struct CommandExecutor {
    client: PortalClient,
}

impl CommandExecutor {
    pub fn new(client: PortalClient) -> Self {
        Self { client }
    }

    pub async fn login(
        &self,
        role: Role,
        endpoint: &str,
        fields: Vec<(String, String)>,
    ) -> Result<()> {
        let body: Map<String, Value> = fields
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();

        let pair = self
            .client
            .login(role, &body, endpoint)
            .await
            .with_context(|| format!("Login as {role} failed"))?;

        println!("Logged in as {role}");
        println!("  access token expires  {}", pair.access_expiry);
        if let Some(refresh_expiry) = pair.refresh_expiry {
            println!("  refresh token expires {refresh_expiry}");
        }
        Ok(())
    }

    pub async fn logout(&self, role: Role) -> Result<()> {
        self.client.logout(role).await?;
        println!("Logged out {role}");
        Ok(())
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        data: Option<&str>,
        role: Option<Role>,
    ) -> Result<()> {
        let mut request = self.client.request(method, path)?;
        if let Some(data) = data {
            let body: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
            *request.body_mut() = Some(serde_json::to_vec(&body)?.into());
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let response = match role {
            Some(role) => self.client.send_as(request, Some(role)).await,
            None => self.client.send(request).await,
        }
        .with_context(|| format!("Request to {path} failed"))?;

        let status = response.status();
        let text = response.text().await.context("Failed to read response body")?;
        println!("{status}");
        match serde_json::from_str::<Value>(&text) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) if text.is_empty() => {}
            Err(_) => println!("{text}"),
        }
        Ok(())
    }

    pub async fn refresh(&self, role: Option<Role>) -> Result<()> {
        let role = role.or_else(|| self.client.active_role());
        let Some(role) = role else {
            bail!("No role to refresh; pass --role or a --location inside a portal");
        };

        let outcome = self
            .client
            .refresh_coordinator()
            .refresh_with_outcome(Some(role))
            .await;
        match outcome.result {
            Ok(_) => {
                info!(role = %role, "Refresh complete");
                println!("Refreshed access token for {role}");
                Ok(())
            }
            Err(e) => {
                if e.requires_relogin() {
                    bail!("Refresh failed for {role}: {e}. Log in again.");
                }
                bail!("Refresh failed for {role}: {e}")
            }
        }
    }

    pub async fn whoami(&self) -> Result<()> {
        let path = self.client.location().current_path();
        debug!(path = ?path, "Resolving role");

        let Some(role) = self.client.active_role() else {
            match path {
                Some(path) => println!("{path}: no role (no credential will be attached)"),
                None => println!("Detached: no role (pass --location)"),
            }
            return Ok(());
        };

        let session = self.client.session();
        let access = session.access_token(role).await?.is_some();
        let refresh = session.refresh_token(role).await?.is_some();
        println!("role           {role}");
        println!("credential key {}", role.credential_key());
        println!("access token   {}", if access { "present" } else { "absent" });
        println!("refresh token  {}", if refresh { "present" } else { "absent" });
        Ok(())
    }

    pub fn routes(&self) {
        let routes = &self.client.config().routes;
        if routes.is_empty() {
            println!("No routes configured");
            return;
        }
        for entry in routes.entries() {
            println!(
                "{:<16} {:<14} {}",
                entry.prefix,
                entry.role.to_string(),
                entry.role.credential_key()
            );
        }
    }
}
