//! The entrypoint sequence.
//!
//! ```text
//! Init → PermissionsFixed → TokenMinted → ConfigsPropagated
//!      → SupervisorLaunched → Probing → SignalWritten → Waiting → Terminated
//! ```
//!
//! Only a minting failure (or a supervisor that cannot be spawned at all)
//! jumps straight to `Terminated(1)`. Every other step logs its problem and
//! lets the sequence continue.

use crate::config::Config;
use crate::credential::{Token, TokenSource, ZellijMinter};
use crate::permissions::{self, ServiceUser};
use crate::propagate::{self, MergeOutcome};
use crate::readiness::{self, HttpProbe, Probe, RetryPolicy, Sleeper, TokioSleeper};
use crate::sentinel;
use crate::supervisor::{self, SupervisorHandle};

/// Exit code used when the bootstrap itself gives up.
pub const EXIT_BOOTSTRAP_FAILED: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    PermissionsFixed,
    TokenMinted,
    ConfigsPropagated,
    SupervisorLaunched,
    Probing,
    SignalWritten,
    Waiting,
    Terminated(i32),
}

pub struct Bootstrap {
    config: Config,
    user: Option<ServiceUser>,
    token_source: Box<dyn TokenSource>,
    probe: Box<dyn Probe>,
    sleeper: Box<dyn Sleeper>,
    stages: Vec<Stage>,
}

impl Bootstrap {
    /// Production wiring: zellij for the token, HTTP probes, real sleeps.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let user = match ServiceUser::lookup(&config.service_user) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(
                    user = %config.service_user,
                    "Service user unavailable, ownership will not be changed: {}",
                    e
                );
                None
            }
        };

        let token_source = ZellijMinter::new(config.minter.clone(), user.clone());
        let probe = HttpProbe::new(config.readiness.request_timeout)?;

        Ok(Self::with_parts(
            config,
            user,
            Box::new(token_source),
            Box::new(probe),
            Box::new(TokioSleeper),
        ))
    }

    pub fn with_parts(
        config: Config,
        user: Option<ServiceUser>,
        token_source: Box<dyn TokenSource>,
        probe: Box<dyn Probe>,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            config,
            user,
            token_source,
            probe,
            sleeper,
            stages: Vec::new(),
        }
    }

    /// Stages entered so far, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(?stage, "Bootstrap stage");
        self.stages.push(stage);
    }

    fn terminate(&mut self, code: i32) -> i32 {
        self.enter(Stage::Terminated(code));
        code
    }

    /// Run the whole sequence and return the process exit code.
    pub async fn run(&mut self) -> i32 {
        self.enter(Stage::Init);

        self.fix_permissions().await;
        self.enter(Stage::PermissionsFixed);

        let token = match self.token_source.mint().await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Could not obtain session token: {}", e);
                if let Some(output) = e.captured_output() {
                    tracing::error!("Token minter output:\n{}", output);
                }
                return self.terminate(EXIT_BOOTSTRAP_FAILED);
            }
        };
        tracing::info!("Session token minted");
        self.enter(Stage::TokenMinted);

        self.propagate(&token);
        self.enter(Stage::ConfigsPropagated);

        if let Err(e) = sentinel::clear_stale(&self.config.sentinel_path) {
            tracing::warn!(
                path = %self.config.sentinel_path.display(),
                "Could not remove stale sentinel: {}",
                e
            );
        }

        let mut handle = match supervisor::launch(&self.config.supervisor, &token) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("{}", e);
                return self.terminate(EXIT_BOOTSTRAP_FAILED);
            }
        };
        self.enter(Stage::SupervisorLaunched);

        self.enter(Stage::Probing);
        self.await_services(&mut handle).await;

        if let Err(e) = sentinel::write_sentinel(
            &self.config.sentinel_path,
            &token,
            self.user.as_ref(),
        ) {
            tracing::warn!("Could not write readiness sentinel: {}", e);
        }
        self.enter(Stage::SignalWritten);

        self.enter(Stage::Waiting);
        let code = match handle.wait().await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!("{}", e);
                EXIT_BOOTSTRAP_FAILED
            }
        };
        self.terminate(code)
    }

    async fn fix_permissions(&self) {
        let mounts = self.config.mounts.clone();
        let user = self.user.clone();
        let result = tokio::task::spawn_blocking(move || {
            permissions::normalize_mounts(&mounts, user.as_ref())
        })
        .await;

        match result {
            Ok(report) if report.failures.is_empty() => {
                tracing::info!(mounts = report.paths, changed = report.changed, "Mounts ready");
            }
            Ok(report) => {
                tracing::warn!(
                    mounts = report.paths,
                    failed = report.failures.len(),
                    "Some mounts could not be normalized"
                );
            }
            Err(e) => tracing::warn!("Permission fix-up task failed: {}", e),
        }
    }

    fn propagate(&self, token: &Token) {
        let owner = self.user.as_ref();

        if let Err(e) = propagate::render_sidecar_config(&self.config.sidecar, token, owner) {
            tracing::warn!("Could not render sidecar config: {}", e);
        }

        match propagate::merge_agent_config(&self.config.agent, token, owner) {
            Ok(MergeOutcome::Written) | Ok(MergeOutcome::SkippedUnauthenticated) => {}
            Ok(MergeOutcome::Unchanged) => {
                tracing::info!("Agent config already has the current token");
            }
            Err(e) => tracing::warn!("Could not update agent config: {}", e),
        }
    }

    async fn await_services(&self, handle: &mut SupervisorHandle) {
        let policy = RetryPolicy {
            interval: self.config.readiness.interval,
            max_attempts: self.config.readiness.max_attempts,
        };

        let report = readiness::wait_until_ready(
            &self.config.readiness.endpoints,
            self.probe.as_ref(),
            self.sleeper.as_ref(),
            policy,
            || match handle.try_exit_code() {
                Some(code) => {
                    tracing::error!(code, "Supervisor exited while services were starting");
                    false
                }
                None => true,
            },
        )
        .await;

        tracing::debug!(
            state = ?report.state,
            attempts = report.attempts,
            ready = report.is_ready(),
            "Readiness pass finished"
        );
    }
}
