//! Provider subprocess protocol.
//!
//! Upstream access goes through an external binary named
//! `calmirror-provider-<name>` that speaks the JSON protocol in
//! [`super::protocol`] over stdin/stdout. Any executable that speaks the
//! protocol can be a provider.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::protocol::{
    Command, CreateEvent, DeleteEvent, Grant, ListCalendars, ListEvents, ProviderCommand, Request,
    Response, UpdateEvent,
};
use super::{EventQuery, RemoteCalendar};
use crate::calendar::Calendar;
use crate::credentials::Credentials;
use crate::error::{CalMirrorError, CalMirrorResult};
use crate::event::{Event, EventPatch};

#[derive(Clone, Debug)]
pub struct Provider {
    name: String,
    timeout: Duration,
    binary: Option<PathBuf>,
}

impl Provider {
    pub fn from_name(name: &str, timeout_secs: u64) -> Self {
        Provider {
            name: name.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            binary: None,
        }
    }

    /// Use an explicit executable instead of searching `PATH`.
    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn binary_path(&self) -> CalMirrorResult<PathBuf> {
        if let Some(path) = &self.binary {
            return Ok(path.clone());
        }
        let binary_name = format!("calmirror-provider-{}", self.name);
        which::which(&binary_name).map_err(|_| CalMirrorError::ProviderNotInstalled(binary_name))
    }

    /// Call a typed provider command. The response type comes from the
    /// command's associated type.
    pub async fn call<C: ProviderCommand>(&self, cmd: C) -> CalMirrorResult<C::Response> {
        timeout(self.timeout, self.call_raw(C::command(), cmd))
            .await
            .map_err(|_| CalMirrorError::ProviderTimeout(self.timeout.as_secs()))?
    }

    async fn call_raw<P: Serialize, R: DeserializeOwned>(
        &self,
        command: Command,
        params: P,
    ) -> CalMirrorResult<R> {
        let params = serde_json::to_value(params)
            .map_err(|e| CalMirrorError::Serialization(e.to_string()))?;
        let request_json = serde_json::to_string(&Request { command, params })
            .map_err(|e| CalMirrorError::Serialization(e.to_string()))?;

        let binary_path = self.binary_path()?;
        tracing::debug!(provider = %self.name, ?command, "Calling provider");

        let mut child = TokioCommand::new(&binary_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CalMirrorError::Remote(format!("Failed to spawn {}: {e}", binary_path.display()))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CalMirrorError::Remote("Provider stdin unavailable".into()))?;
        stdin
            .write_all(format!("{request_json}\n").as_bytes())
            .await?;
        drop(stdin);

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            return Err(CalMirrorError::Remote(format!(
                "Provider exited with status: {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let response_str = String::from_utf8_lossy(&output.stdout);
        if response_str.trim().is_empty() {
            return Err(CalMirrorError::Remote("Provider returned no response".into()));
        }

        let response: Response<R> = serde_json::from_str(&response_str)
            .map_err(|e| CalMirrorError::Remote(format!("Failed to parse response: {e}")))?;

        match response {
            Response::Success { data } => Ok(data),
            Response::Error { error } => Err(CalMirrorError::Remote(error)),
        }
    }
}

/// [`RemoteCalendar`] backed by a provider binary.
pub struct ProviderRemote {
    provider: Provider,
}

impl ProviderRemote {
    pub fn new(provider: Provider) -> Self {
        ProviderRemote { provider }
    }
}

#[async_trait]
impl RemoteCalendar for ProviderRemote {
    async fn list_calendars(&self, credentials: &Credentials) -> CalMirrorResult<Vec<Calendar>> {
        self.provider
            .call(ListCalendars {
                grant: Grant::from(credentials),
            })
            .await
    }

    async fn list_events(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        query: &EventQuery,
    ) -> CalMirrorResult<Vec<Event>> {
        self.provider
            .call(ListEvents {
                grant: Grant::from(credentials),
                calendar_id: calendar_id.to_string(),
                start: query.start,
                end: query.end,
                limit: query.limit,
            })
            .await
    }

    async fn create_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event: &Event,
    ) -> CalMirrorResult<Event> {
        self.provider
            .call(CreateEvent {
                grant: Grant::from(credentials),
                calendar_id: calendar_id.to_string(),
                event: event.clone(),
            })
            .await
    }

    async fn update_event(
        &self,
        credentials: &Credentials,
        event_id: &str,
        calendar_id: &str,
        patch: &EventPatch,
    ) -> CalMirrorResult<Event> {
        self.provider
            .call(UpdateEvent {
                grant: Grant::from(credentials),
                calendar_id: calendar_id.to_string(),
                event_id: event_id.to_string(),
                patch: patch.clone(),
            })
            .await
    }

    async fn delete_event(
        &self,
        credentials: &Credentials,
        event_id: &str,
        calendar_id: &str,
    ) -> CalMirrorResult<()> {
        self.provider
            .call(DeleteEvent {
                grant: Grant::from(credentials),
                calendar_id: calendar_id.to_string(),
                event_id: event_id.to_string(),
            })
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn credentials() -> Credentials {
        Credentials {
            grant_id: "grant".into(),
            access_token: "token".into(),
            email: "me@example.com".into(),
            provider: "google".into(),
            expires_at: None,
            id_token: None,
            token_type: None,
            scope: None,
        }
    }

    fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("calmirror-provider-fake");
        std::fs::write(&path, format!("#!/bin/sh\nread request\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_success_response_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(
            &dir,
            r#"echo '{"status":"success","data":[{"id":"cal-1","name":"Work","grant_id":"grant","color":null,"foreground_color":null,"description":null}]}'"#,
        );
        let remote = ProviderRemote::new(Provider::from_name("fake", 5).with_binary(binary));

        let calendars = remote.list_calendars(&credentials()).await.unwrap();
        assert_eq!(calendars.len(), 1);
        assert_eq!(calendars[0].id, "cal-1");
        assert_eq!(calendars[0].timezone, "UTC");
    }

    #[tokio::test]
    async fn test_error_response_is_remote_error() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(&dir, r#"echo '{"status":"error","error":"grant revoked"}'"#);
        let remote = ProviderRemote::new(Provider::from_name("fake", 5).with_binary(binary));

        let err = remote
            .delete_event(&credentials(), "evt", "cal")
            .await
            .unwrap_err();
        assert!(matches!(err, CalMirrorError::Remote(ref m) if m == "grant revoked"));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(&dir, "sleep 5");
        let provider = Provider::from_name("fake", 0).with_binary(binary);

        let err = provider
            .call(ListCalendars {
                grant: Grant::from(&credentials()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CalMirrorError::ProviderTimeout(0)));
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let provider = Provider::from_name("definitely-not-installed-xyz", 5);
        let err = provider
            .call(ListCalendars {
                grant: Grant::from(&credentials()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CalMirrorError::ProviderNotInstalled(_)));
    }
}
