//! SSH authentication and host-key verification.
//!
//! Authentication order: the local SSH agent first (when the server is
//! configured for it and the agent socket is reachable), then the
//! configured private key file. Host keys are verified against the user's
//! known-hosts store; a mismatch is `HostKeyChanged` and is never
//! auto-accepted.

use russh::client::Handle;
use russh_keys::key::PublicKey;
use russh_keys::{check_known_hosts, load_secret_key};
use ry_common::ssh::AuthMethod;
use ry_common::{Error, Result, SshServer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Verdict for a server's presented host key.
pub fn verify_host_key(host: &str, port: u16, key: &PublicKey) -> Result<()> {
    match check_known_hosts(host, port, key) {
        // Known and matching.
        Ok(true) => Ok(()),
        // Unknown host: first contact is accepted and learned by the
        // user's ssh tooling, not silently by us; we allow the connection
        // but log it loudly.
        Ok(false) => {
            warn!(host, port, "host key not in known_hosts; proceeding on first contact");
            Ok(())
        }
        // Present but DIFFERENT key: refuse.
        Err(_) => Err(Error::HostKeyChanged {
            host: host.to_string(),
        }),
    }
}

/// Try the agent, then the key file. Returns the method that succeeded.
pub async fn authenticate<H>(
    handle: &mut Handle<H>,
    server: &SshServer,
) -> Result<&'static str>
where
    H: russh::client::Handler,
{
    if server.auth_method == AuthMethod::Agent {
        match try_agent(handle, server).await {
            Ok(true) => return Ok("agent"),
            Ok(false) => debug!(server = %server.name, "agent offered no accepted identity"),
            Err(err) => debug!(server = %server.name, "agent unavailable: {}", err),
        }
    }

    try_key_file(handle, server).await?;
    Ok("key")
}

async fn try_agent<H>(handle: &mut Handle<H>, server: &SshServer) -> Result<bool>
where
    H: russh::client::Handler,
{
    let mut agent = russh_keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|err| Error::ConnectionFailed {
            host: server.host.clone(),
            cause: format!("agent: {}", err),
        })?;
    let identities = agent
        .request_identities()
        .await
        .map_err(|err| Error::ConnectionFailed {
            host: server.host.clone(),
            cause: format!("agent identities: {}", err),
        })?;

    for key in identities {
        let accepted = handle
            .authenticate_publickey_with(&server.username, key, &mut agent)
            .await
            .unwrap_or(false);
        if accepted {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn try_key_file<H>(handle: &mut Handle<H>, server: &SshServer) -> Result<()>
where
    H: russh::client::Handler,
{
    let path = server
        .private_key_path
        .as_deref()
        .map(expand_home)
        .ok_or_else(|| Error::AuthenticationFailed {
            user: server.username.clone(),
            host: server.host.clone(),
        })?;

    let keypair = load_secret_key(&path, None).map_err(|_| Error::AuthenticationFailed {
        user: server.username.clone(),
        host: server.host.clone(),
    })?;

    let accepted = handle
        .authenticate_publickey(&server.username, Arc::new(keypair))
        .await
        .map_err(|_| Error::AuthenticationFailed {
            user: server.username.clone(),
            host: server.host.clone(),
        })?;

    if accepted {
        Ok(())
    } else {
        Err(Error::AuthenticationFailed {
            user: server.username.clone(),
            host: server.host.clone(),
        })
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).display().to_string();
        }
    }
    path.to_string()
}
