//! File helpers and output waits built on [`Session::send`].
//!
//! Uploads go inline: the file is base64-encoded and appended to a
//! temporary remote file in chunks, decoded in place and size-checked.

use std::path::Path;
use std::time::Duration;

use data_encoding::BASE64;
use log::{debug, info};
use secrecy::SecretString;
use tokio::time::Instant;

use super::connection::Session;
use super::interactive::Challenge;
use super::result::{CommandResult, SendOptions};
use crate::channel::compile_prompt_pattern;
use crate::channel::patterns::{HOST_KEY_CONFIRM_PROMPT, PASSWORD_PATTERN};
use crate::error::{Result, SessionError};
use crate::tracker::{Poller, TrackSpec};
use crate::transport::SshConfig;

/// Base64 characters written per shell line.
const UPLOAD_CHUNK: usize = 3000;

impl Session {
    /// Whether `path` exists on the remote host.
    pub async fn file_exists(&mut self, path: &str, timeout: Duration) -> Result<bool> {
        let command = format!("test -e {}", shell_words::quote(path));
        let result = self.send(&command, &SendOptions::new(timeout)).await?;
        Ok(result.is_success())
    }

    /// Copy the local file at `local` to `remote`.
    pub async fn upload(&mut self, local: &Path, remote: &str, timeout: Duration) -> Result<()> {
        let data = tokio::fs::read(local).await.map_err(|e| SessionError::Transfer {
            path: local.display().to_string(),
            message: e.to_string(),
        })?;
        self.upload_bytes(&data, remote, timeout).await
    }

    /// Write `data` to `remote`, replacing it.
    ///
    /// `timeout` bounds the whole transfer; each shell round trip gets what
    /// is left of it.
    pub async fn upload_bytes(&mut self, data: &[u8], remote: &str, timeout: Duration) -> Result<()> {
        info!(
            "[{}] uploading {} bytes to {}",
            self.name(),
            data.len(),
            remote
        );
        let encoded = BASE64.encode(data);
        let staging = shell_words::quote(&format!("{remote}.b64.part")).into_owned();
        let target = shell_words::quote(remote).into_owned();
        let deadline = Instant::now() + timeout;

        self.transfer_step(&format!(": > {staging}"), remote, deadline, timeout)
            .await?;

        let mut offset = 0;
        while offset < encoded.len() {
            let end = (offset + UPLOAD_CHUNK).min(encoded.len());
            let chunk = &encoded[offset..end];
            self.transfer_step(
                &format!("printf '%s' '{chunk}' >> {staging}"),
                remote,
                deadline,
                timeout,
            )
            .await?;
            offset = end;
        }
        debug!("[{}] staged {} base64 chars", self.name(), encoded.len());

        self.transfer_step(
            &format!("base64 -d {staging} > {target} && rm -f {staging}"),
            remote,
            deadline,
            timeout,
        )
        .await?;

        let size = self
            .transfer_step(&format!("wc -c < {target}"), remote, deadline, timeout)
            .await?;
        let written: Option<usize> = size.lines.iter().find_map(|l| l.trim().parse().ok());
        if written != Some(data.len()) {
            return Err(SessionError::Transfer {
                path: remote.to_string(),
                message: format!("expected {} bytes, remote has {:?}", data.len(), written),
            }
            .into());
        }
        Ok(())
    }

    /// Copy `source` on this host to `dest` on `peer` with `scp`.
    pub async fn scp_to(
        &mut self,
        peer: &SshConfig,
        source: &str,
        dest: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let target = format!("{}@{}:{}", peer.username, peer.host, dest);
        let command = format!(
            "scp -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -P {} {} {}",
            peer.port,
            shell_words::quote(source),
            shell_words::quote(&target),
        );
        self.scp(&command, peer, source, timeout).await
    }

    /// Copy `source` on `peer` to `dest` on this host with `scp`.
    pub async fn scp_from(
        &mut self,
        peer: &SshConfig,
        source: &str,
        dest: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let origin = format!("{}@{}:{}", peer.username, peer.host, source);
        let command = format!(
            "scp -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -P {} {} {}",
            peer.port,
            shell_words::quote(&origin),
            shell_words::quote(dest),
        );
        self.scp(&command, peer, source, timeout).await
    }

    /// Rerun `command` every `interval` until `content` shows up in its
    /// output (or, with `present = false`, until it is gone).
    ///
    /// Each run is bounded by what is left of `timeout`.
    pub async fn wait_for_output(
        &mut self,
        command: &str,
        content: &str,
        present: bool,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let spec = TrackSpec::new(
            format!("wait for '{content}' in output of '{command}'"),
            timeout,
            interval,
        )
        .expect(present);

        let mut poller = Poller::new(&spec);
        let mut last = None;
        loop {
            let budget = poller.remaining();
            if budget.is_zero() {
                return poller.expire(last).into_result().map(|_| ());
            }
            let opts = SendOptions::new(budget).without_exit_code();
            let seen = self.send(command, &opts).await?.contains(content);
            last = Some(seen);
            if let Some(report) = poller.observe(seen).await? {
                return report.into_result().map(|_| ());
            }
        }
    }

    async fn scp(
        &mut self,
        command: &str,
        peer: &SshConfig,
        source: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let host_key = compile_prompt_pattern(HOST_KEY_CONFIRM_PROMPT)
            .map_err(SessionError::InvalidPrompt)?;
        let challenges = vec![
            Challenge::new(
                host_key,
                Some(SecretString::from("yes")),
                SessionError::Transfer {
                    path: source.to_string(),
                    message: "host key confirmation repeated".to_string(),
                },
            ),
            Challenge::new(
                PASSWORD_PATTERN.clone(),
                peer.password().cloned(),
                SessionError::Transfer {
                    path: source.to_string(),
                    message: format!("{}@{} rejected the password", peer.username, peer.host),
                },
            ),
        ];

        let result = self
            .send_with_challenges(command, challenges, &SendOptions::new(timeout))
            .await?;
        if !result.is_success() {
            return Err(SessionError::Transfer {
                path: source.to_string(),
                message: format!("scp exited with {}: {}", result.code(), result.output()),
            }
            .into());
        }
        Ok(result)
    }

    async fn transfer_step(
        &mut self,
        command: &str,
        remote: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SessionError::Timeout {
                command: command.to_string(),
                timeout,
            }
            .into());
        }
        let result = self.send(command, &SendOptions::new(remaining)).await?;
        if !result.is_success() {
            return Err(SessionError::Transfer {
                path: remote.to_string(),
                message: format!("'{}' exited with {}", command, result.code()),
            }
            .into());
        }
        Ok(result)
    }
}
