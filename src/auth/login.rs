//! Username/password login, logout and session status

use anyhow::{bail, Context, Result};

use super::{Session, StoredToken, TokenStore};
use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use crate::api::{connect, REPORT_FLUSH_TIMEOUT};
use crate::config::{Config, FileTokenStore};
use crate::models::{LoginRequest, LoginResponse, LOGIN_PATH};

/// Turn a login response into the session to persist.
fn session_from_login(login: LoginResponse) -> Result<Session, ApiError> {
    let user_id = login.user.as_ref().map(|u| u.id.clone());
    let tenant_id = login
        .tenant
        .as_ref()
        .map(|t| t.id.clone())
        .or_else(|| login.user.as_ref().and_then(|u| u.tenant_id.clone()));

    let user = login
        .user
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
    let tenant = login
        .tenant
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

    Ok(Session {
        access_token: Some(StoredToken::new(login.token, None)),
        refresh_token: login.refresh_token,
        tenant_id,
        user_id,
        user,
        tenant,
    })
}

/// Log in through the client's pipeline and replace the stored session.
pub async fn sign_in(
    client: &ApiClient,
    username: &str,
    password: &str,
    tenant_code: Option<&str>,
) -> Result<Session, ApiError> {
    let request = LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
        tenant_code: tenant_code.map(String::from),
    };
    let body =
        serde_json::to_value(&request).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    let payload = client.post(LOGIN_PATH, body).await?;
    let login: LoginResponse = serde_json::from_value(payload)
        .map_err(|e| ApiError::InvalidResponse(format!("login response: {}", e)))?;
    let session = session_from_login(login)?;

    client
        .store()
        .update_session(&mut |s| *s = session.clone())
        .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;

    tracing::info!(
        "Logged in as user {} (tenant {})",
        session.user_id.as_deref().unwrap_or("?"),
        session.tenant_id.as_deref().unwrap_or("?")
    );
    Ok(session)
}

/// Perform login and save the session to the config file
pub async fn login(username: &str, password: &str, tenant_code: Option<&str>) -> Result<()> {
    let client = connect()?;
    let result = sign_in(&client, username, password, tenant_code).await;
    client.flush(REPORT_FLUSH_TIMEOUT).await;

    match result {
        Ok(_) => {
            println!("Login successful.");
            Ok(())
        }
        // Raised after the request succeeded, so nothing has been shown yet.
        Err(e @ (ApiError::InvalidResponse(_) | ApiError::Storage(_))) => {
            bail!("Login failed: {}", e)
        }
        Err(e) => Err(e.into()),
    }
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let (_, store) = FileTokenStore::open()?;
    store.clear_tokens().context("Failed to clear credentials")?;
    println!("Logged out.");
    Ok(())
}

/// Force a token refresh
pub async fn refresh_session() -> Result<()> {
    let client = connect()?;
    let result = client.force_refresh().await;
    client.flush(REPORT_FLUSH_TIMEOUT).await;

    result?;
    println!("Token refreshed.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;
    let session = &config.session;

    println!("API base:    {}", config.api_base);

    match session.access_token {
        Some(ref token) if !token.is_expired() => {
            println!("Access tok:  present");
            if let Some(exp) = token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => println!("Access tok:  expired"),
        None => println!("Access tok:  none"),
    }

    match session.refresh_token {
        Some(_) => println!("Refresh tok: present"),
        None => println!("Refresh tok: none"),
    }

    println!("Tenant id:   {}", session.tenant_id.as_deref().unwrap_or("none"));
    println!("User id:     {}", session.user_id.as_deref().unwrap_or("none"));

    let username = session
        .user
        .as_deref()
        .and_then(|u| serde_json::from_str::<serde_json::Value>(u).ok())
        .and_then(|u| u.get("username").and_then(|n| n.as_str()).map(String::from));
    if let Some(name) = username {
        println!("User:        {}", name);
    }

    if session.is_empty() {
        println!("\nRun 'bms-client login' to authenticate.");
    }

    Ok(())
}
