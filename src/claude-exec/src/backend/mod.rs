//! Isolation backends.
//!
//! Each backend translates a [`SandboxConfig`] into one native invocation
//! grammar and owns that invocation's lifecycle. The executor walks an
//! ordered chain of these, falling through on failure:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  IsolationBackend                     │
//! │                      (trait)                          │
//! ├────────────┬───────────┬─────────────┬───────────────┤
//! │ Bubblewrap │ Seatbelt  │  Container  │    Direct     │
//! │  (Linux)   │  (macOS)  │ (any host)  │ (no sandbox)  │
//! └────────────┴───────────┴─────────────┴───────────────┘
//! ```
//!
//! Every module compiles on every platform; availability is a runtime
//! answer from the capability probe, which is what lets the fallback
//! chain and the tests stay host-independent.

pub mod bubblewrap;
pub mod container;
pub mod seatbelt;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use claude_sandbox::{SandboxCapabilities, SandboxConfig, SandboxType};

use crate::error::Result;
use crate::limits::ResourceLimiter;
use crate::spawn::{self, NativeCommand, SpawnOutcome};

/// One concrete isolation mechanism.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// The mechanism this backend provides.
    fn kind(&self) -> SandboxType;

    /// Backend name for logs (e.g. "bubblewrap", "seatbelt").
    fn name(&self) -> &str;

    /// Whether the host can run this backend, per the probe's answer.
    fn available(&self, caps: &SandboxCapabilities) -> bool;

    /// Translate the command and config into this backend's native
    /// invocation.
    fn build_invocation(
        &self,
        command: &str,
        args: &[String],
        config: &SandboxConfig,
        workdir: &Path,
    ) -> Result<NativeCommand>;

    /// Run a built invocation. The default is the shared spawn path;
    /// backends with extra lifecycle (image pulls) layer on top.
    async fn execute(
        &self,
        invocation: NativeCommand,
        timeout: Option<Duration>,
        limiter: Option<&ResourceLimiter>,
    ) -> Result<SpawnOutcome> {
        spawn::run(&invocation, timeout, limiter).await
    }
}

/// Direct execution, the terminal link of the fallback chain. Always
/// available; provides no isolation and says so.
pub struct DirectBackend;

#[async_trait]
impl IsolationBackend for DirectBackend {
    fn kind(&self) -> SandboxType {
        SandboxType::None
    }

    fn name(&self) -> &str {
        "none"
    }

    fn available(&self, _caps: &SandboxCapabilities) -> bool {
        true
    }

    fn build_invocation(
        &self,
        command: &str,
        args: &[String],
        config: &SandboxConfig,
        workdir: &Path,
    ) -> Result<NativeCommand> {
        let mut invocation = NativeCommand::passthrough(command, args);
        invocation.cwd = Some(workdir.to_path_buf());
        if let Some(env) = &config.env {
            for (key, value) in env {
                invocation.env.push((key.clone(), value.clone()));
            }
        }
        Ok(invocation)
    }
}

/// The full backend chain in fallback priority order: namespace (Linux),
/// profile (macOS), container, then direct execution.
pub fn backend_chain() -> Vec<Box<dyn IsolationBackend>> {
    vec![
        Box::new(bubblewrap::BubblewrapBackend::new()),
        Box::new(seatbelt::SeatbeltBackend::new()),
        Box::new(container::ContainerBackend::new()),
        Box::new(DirectBackend),
    ]
}
