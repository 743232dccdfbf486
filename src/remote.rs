//! Remote command execution over SSH sessions cached per server alias.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::ChannelMsg;
use tokio::sync::Mutex;

use crate::config::{ServerTarget, SshTargets};
use crate::error::{McpOpsError, Result};

/// Extended-data stream id for stderr (RFC 4254 section 5.2).
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

const STDERR_PREFIX: &str = "ERROR: ";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Stdout with every stderr chunk inlined behind an `ERROR: ` prefix.
    pub output: String,
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    pub fn push_stdout(&mut self, chunk: &[u8]) {
        self.output.push_str(&String::from_utf8_lossy(chunk));
    }

    pub fn push_stderr(&mut self, chunk: &[u8]) {
        self.output.push_str(STDERR_PREFIX);
        self.output.push_str(&String::from_utf8_lossy(chunk));
    }

    /// Folds one channel message into the output. Extended data other than
    /// stderr and control messages are ignored.
    pub fn apply(&mut self, msg: &ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => self.push_stdout(data),
            ChannelMsg::ExtendedData { data, ext } if *ext == SSH_EXTENDED_DATA_STDERR => {
                self.push_stderr(data)
            }
            ChannelMsg::ExitStatus { exit_status } => self.exit_code = Some(*exit_status),
            _ => {}
        }
    }

    /// Completes the output once the channel has ended. Without an exit
    /// status a closed transport means the output was cut short.
    pub fn finish(self, alias: &str, transport_closed: bool) -> Result<Self> {
        if self.exit_code.is_none() && transport_closed {
            return Err(McpOpsError::Stream(format!(
                "connection to '{alias}' closed while reading output"
            )));
        }
        Ok(self)
    }
}

/// An established session able to run commands.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// True once the remote side or the transport has gone away.
    fn is_closed(&self) -> bool;
}

/// Opens sessions to configured targets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ServerTarget) -> Result<Arc<dyn RemoteSession>>;
}

type Slot = Arc<Mutex<Option<Arc<dyn RemoteSession>>>>;

/// Runs commands on named servers, keeping one session per alias.
///
/// Each alias has its own slot lock, held while connecting, so concurrent
/// first calls for the same alias share a single handshake.
pub struct SshExecutor {
    targets: Arc<SshTargets>,
    connector: Arc<dyn Connector>,
    sessions: Mutex<HashMap<String, Slot>>,
    timeout: Option<Duration>,
}

impl SshExecutor {
    pub fn new(targets: SshTargets, connector: Arc<dyn Connector>) -> Self {
        Self {
            targets: Arc::new(targets),
            connector,
            sessions: Mutex::new(HashMap::new()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn targets(&self) -> &SshTargets {
        &self.targets
    }

    pub async fn run(&self, alias: &str, command: &str) -> Result<CommandOutput> {
        let session = self.session(alias).await?;

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, session.exec(command)).await {
                Ok(result) => result,
                Err(_) => Err(McpOpsError::Timeout(limit)),
            },
            None => session.exec(command).await,
        };

        if let Err(e) = &result {
            tracing::warn!(server = alias, error = %e, "Remote command failed, dropping session");
            self.evict(alias, &session).await;
        }
        result
    }

    /// Returns the cached session for `alias`, connecting if there is none or
    /// the cached one has closed.
    async fn session(&self, alias: &str) -> Result<Arc<dyn RemoteSession>> {
        let target = self
            .targets
            .get(alias)
            .ok_or_else(|| McpOpsError::UnknownServer(alias.to_string()))?;

        let slot = {
            let mut sessions = self.sessions.lock().await;
            sessions.entry(alias.to_string()).or_default().clone()
        };

        let mut cached = slot.lock().await;
        if let Some(session) = cached.as_ref() {
            if !session.is_closed() {
                return Ok(session.clone());
            }
            tracing::info!(server = alias, "Cached SSH session closed, reconnecting");
            *cached = None;
        }

        tracing::info!(server = alias, address = %target.display_address(), "Opening SSH session");
        let session = self.connector.connect(target).await.map_err(|e| {
            tracing::warn!(server = alias, error = %e, "SSH connection failed");
            e
        })?;
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn evict(&self, alias: &str, failed: &Arc<dyn RemoteSession>) {
        let slot = match self.sessions.lock().await.get(alias) {
            Some(slot) => slot.clone(),
            None => return,
        };
        let mut cached = slot.lock().await;
        // Another caller may already have replaced it.
        if cached.as_ref().is_some_and(|s| Arc::ptr_eq(s, failed)) {
            *cached = None;
        }
    }

    /// Number of aliases with a live cached session. Slots that are busy
    /// connecting are not counted.
    pub async fn cached_sessions(&self) -> usize {
        let slots: Vec<Slot> = self.sessions.lock().await.values().cloned().collect();
        slots
            .iter()
            .filter(|slot| {
                slot.try_lock()
                    .is_ok_and(|cached| cached.as_ref().is_some_and(|s| !s.is_closed()))
            })
            .count()
    }
}

// -- russh-backed implementation --

struct AcceptAnyHostKey {
    alias: String,
}

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        tracing::debug!(
            server = %self.alias,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting server host key without verification"
        );
        Ok(true)
    }
}

/// Password-authenticated SSH connections via `russh`.
#[derive(Clone, Default)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl RusshConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, target: &ServerTarget) -> Result<Arc<dyn RemoteSession>> {
        let handler = AcceptAnyHostKey {
            alias: target.alias.clone(),
        };
        let mut handle = client::connect(
            self.config.clone(),
            (target.host.as_str(), target.port),
            handler,
        )
        .await
        .map_err(|e| McpOpsError::Connect(e.to_string()))?;

        let accepted = handle
            .authenticate_password(&target.username, &target.password)
            .await
            .map_err(|e| McpOpsError::Connect(e.to_string()))?;
        check_auth(accepted, &target.username)?;

        tracing::info!(server = %target.alias, "SSH session ready");
        Ok(Arc::new(RusshSession {
            alias: target.alias.clone(),
            handle,
        }))
    }
}

fn check_auth(accepted: bool, username: &str) -> Result<()> {
    if accepted {
        Ok(())
    } else {
        Err(McpOpsError::AuthRejected(username.to_string()))
    }
}

struct RusshSession {
    alias: String,
    handle: client::Handle<AcceptAnyHostKey>,
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| McpOpsError::ChannelOpen(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| McpOpsError::ChannelOpen(e.to_string()))?;

        let mut out = CommandOutput::default();
        while let Some(msg) = channel.wait().await {
            out.apply(&msg);
        }
        let out = out.finish(&self.alias, self.handle.is_closed())?;

        tracing::debug!(server = %self.alias, exit_code = ?out.exit_code, "Remote command finished");
        Ok(out)
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}
