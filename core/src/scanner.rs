//! Spider and active-scan orchestration.
//!
//! The daemon offers no completion events, so every phase is driven by polling
//! its status views on a fixed interval. A spider is only considered finished
//! once the passive-scan backlog has drained as well, since the node list is
//! not authoritative before that.
//!
//! The full pass is strictly sequential: the anonymous spider, the anonymous
//! scan, then for every user of the context (in creation order) an optional
//! forced-user switch, that user's spider and that user's scan.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use zapper_common::Config;

use crate::api::{ApiError, ControlApi};
use crate::context::Context;

/// Interval between two status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

const COMPLETE: i64 = 100;

/// A step of the scan pass, used to tag failures and progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AnonymousSpider,
    AnonymousScan,
    ForcedUser,
    UserSpider,
    UserScan,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::AnonymousSpider => "anonymous spider",
            Phase::AnonymousScan => "anonymous active scan",
            Phase::ForcedUser => "forced user switch",
            Phase::UserSpider => "user spider",
            Phase::UserScan => "user active scan",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{phase} failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: ApiError,
    },

    #[error("no nodes were added by any spider, check the target URL")]
    NoNodes,
}

impl ScanError {
    fn at(phase: Phase) -> impl FnOnce(ApiError) -> Self {
        move |source| ScanError::Phase { phase, source }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            ScanError::Phase { phase, .. } => Some(*phase),
            ScanError::NoNodes => None,
        }
    }
}

type ProgressFn = Box<dyn Fn(Phase, i64) + Send + Sync>;

/// Drives spiders and active scans against one target.
pub struct Orchestrator {
    target: String,
    interval: Duration,
    on_progress: Option<ProgressFn>,
}

impl Orchestrator {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            interval: POLL_INTERVAL,
            on_progress: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Registers a callback receiving every polled percentage.
    pub fn with_progress(mut self, on_progress: impl Fn(Phase, i64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    fn report(&self, phase: Phase, percent: i64) {
        if let Some(cb) = &self.on_progress {
            cb(phase, percent);
        }
    }

    /// Crawls the target without a user and returns the number of added nodes.
    pub async fn spider_anonymous<C>(&self, client: &C, context_name: &str) -> Result<usize, ApiError>
    where
        C: ControlApi + ?Sized,
    {
        let scan_id = client.spider_scan(&self.target, context_name).await?;
        info!("Spidering {} anonymously (scan {scan_id})", self.target);
        self.finish_spider(client, &scan_id, Phase::AnonymousSpider).await
    }

    pub async fn spider_as_user<C>(
        &self,
        client: &C,
        context_id: &str,
        user_id: &str,
    ) -> Result<usize, ApiError>
    where
        C: ControlApi + ?Sized,
    {
        let scan_id = client
            .spider_scan_as_user(context_id, user_id, &self.target)
            .await?;
        info!("Spidering {} as user {user_id} (scan {scan_id})", self.target);
        self.finish_spider(client, &scan_id, Phase::UserSpider).await
    }

    pub async fn scan_anonymous<C>(&self, client: &C, context_id: &str) -> Result<(), ApiError>
    where
        C: ControlApi + ?Sized,
    {
        let scan_id = client.active_scan(&self.target, context_id).await?;
        info!("Active scanning {} anonymously (scan {scan_id})", self.target);
        self.wait_for_active_scan(client, &scan_id, Phase::AnonymousScan)
            .await
    }

    pub async fn scan_as_user<C>(
        &self,
        client: &C,
        context_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError>
    where
        C: ControlApi + ?Sized,
    {
        let scan_id = client
            .active_scan_as_user(&self.target, context_id, user_id)
            .await?;
        info!("Active scanning {} as user {user_id} (scan {scan_id})", self.target);
        self.wait_for_active_scan(client, &scan_id, Phase::UserScan)
            .await
    }

    /// Runs the complete anonymous then per-user pass and returns the total
    /// number of added nodes. A total of zero is an error.
    pub async fn run<C>(&self, client: &C, cfg: &Config, ctx: &Context<'_>) -> Result<usize, ScanError>
    where
        C: ControlApi + ?Sized,
    {
        let active = cfg.scan_options.run_active_scan;
        let forced = cfg.authentication.forced_user_mode;

        let mut nodes = self
            .spider_anonymous(client, &ctx.name)
            .await
            .map_err(ScanError::at(Phase::AnonymousSpider))?;

        if active {
            self.scan_anonymous(client, &ctx.id)
                .await
                .map_err(ScanError::at(Phase::AnonymousScan))?;
        }

        for user in &ctx.users {
            if forced {
                force_user(client, &ctx.id, Some(&user.id))
                    .await
                    .map_err(ScanError::at(Phase::ForcedUser))?;
            }

            nodes += self
                .spider_as_user(client, &ctx.id, &user.id)
                .await
                .map_err(ScanError::at(Phase::UserSpider))?;

            if active {
                self.scan_as_user(client, &ctx.id, &user.id)
                    .await
                    .map_err(ScanError::at(Phase::UserScan))?;
            }
        }

        if forced && !ctx.users.is_empty() {
            force_user(client, &ctx.id, None)
                .await
                .map_err(ScanError::at(Phase::ForcedUser))?;
        }

        if nodes == 0 {
            return Err(ScanError::NoNodes);
        }
        info!("Spiders added {nodes} nodes");
        Ok(nodes)
    }

    async fn finish_spider<C>(&self, client: &C, scan_id: &str, phase: Phase) -> Result<usize, ApiError>
    where
        C: ControlApi + ?Sized,
    {
        loop {
            let status = client.spider_status(scan_id).await?;
            self.report(phase, status);
            debug!("Spider {scan_id} progress: {status}%");
            if status >= COMPLETE {
                break;
            }
            tokio::time::sleep(self.interval).await;
        }

        loop {
            let backlog = client.passive_records_to_scan().await?;
            debug!("Passive scan records left: {backlog}");
            if backlog <= 0 {
                break;
            }
            tokio::time::sleep(self.interval).await;
        }

        let added = client.spider_added_nodes(scan_id).await?;
        info!("Spider {scan_id} added {added} nodes");
        Ok(added)
    }

    async fn wait_for_active_scan<C>(&self, client: &C, scan_id: &str, phase: Phase) -> Result<(), ApiError>
    where
        C: ControlApi + ?Sized,
    {
        loop {
            let status = client.active_scan_status(scan_id).await?;
            self.report(phase, status);
            debug!("Active scan {scan_id} progress: {status}%");
            if status >= COMPLETE {
                return Ok(());
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Makes every following request run as `user_id`, or turns forced-user mode
/// off when no user is given.
pub async fn force_user<C>(client: &C, context_id: &str, user_id: Option<&str>) -> Result<(), ApiError>
where
    C: ControlApi + ?Sized,
{
    match user_id {
        Some(user_id) => {
            client.set_forced_user_mode_enabled(true).await?;
            client.set_forced_user(context_id, user_id).await
        }
        None => client.set_forced_user_mode_enabled(false).await,
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
