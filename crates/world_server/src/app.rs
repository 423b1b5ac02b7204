//! Application lifecycle.
//!
//! The `Application` struct loads the world, opens the link for whichever
//! process role it runs as, drives the scheduled jobs, and shuts everything
//! down in order when a termination signal arrives.

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::logging::display_banner;
use crate::signals::{wait_for_signal, wait_for_signal_silent};
use anyhow::{anyhow, Context};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use sync_link::{create_ai_link, create_game_link, run_uplink, serve_game_link, LinkError, LoggingBrain};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use world_core::scheduler::{GENERATOR_TICK, KEEPALIVE, ROLE_TICK, SPAWN_FLUSH};
use world_core::{
    JsonRepository, LoadSummary, ProcessSide, Scheduler, ShutdownState, SystemClock, World,
    WorldError,
};

const LINK_STOP_TIMEOUT: Duration = Duration::from_secs(8);

type LinkTask = JoinHandle<Result<(), LinkError>>;

/// One running world process, Game or AI.
pub struct Application {
    config: AppConfig,
    world: Arc<World>,
    repository: JsonRepository,
    summary: LoadSummary,
}

impl Application {
    /// Loads and validates configuration, then builds and loads the world.
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Load maps, templates and generators from the data directory
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .map_err(|e| anyhow!("failed to load {}: {e}", args.config_path.display()))?;
        config.apply_overrides(&args).map_err(anyhow::Error::msg)?;
        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;
        info!("✅ Configuration loaded and validated successfully");

        Self::from_config(config).await
    }

    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let side = config.server.role;
        display_banner(side);

        let world = Arc::new(World::new(
            config.world_config(),
            side,
            Arc::new(SystemClock::new()),
        ));
        let repository = JsonRepository::new(&config.server.data_dir);
        let summary = world
            .load(&repository)
            .await
            .with_context(|| format!("failed to load world data from {}", config.server.data_dir.display()))?;

        Ok(Self {
            config,
            world,
            repository,
            summary,
        })
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn summary(&self) -> LoadSummary {
        self.summary
    }

    /// Runs until a termination signal arrives or the link fails for good.
    pub async fn run(self) -> anyhow::Result<()> {
        let side = self.world.side();
        info!("🌟 Starting {} process", side);
        self.log_configuration_summary();

        self.world.start();
        let shutdown = ShutdownState::new();
        let scheduler = Scheduler::new(shutdown.clone());
        self.register_world_jobs(&scheduler);
        let mut link_task = self.start_link(&scheduler, &shutdown).await?;
        scheduler.start();

        info!("✅ {} process is now running", side);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let finished_early = tokio::select! {
            signal = wait_for_signal() => {
                signal.context("failed to install signal handlers")?;
                None
            }
            result = &mut link_task => Some(result),
        };

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("🛑 Beginning graceful shutdown...");
        scheduler.stop().await;

        let joined = match finished_early {
            Some(result) => Some(result),
            None => match tokio::time::timeout(LINK_STOP_TIMEOUT, &mut link_task).await {
                Ok(result) => Some(result),
                Err(_) => {
                    warn!("⏰ Link did not stop within {:?}, aborting it", LINK_STOP_TIMEOUT);
                    link_task.abort();
                    None
                }
            },
        };
        let link_outcome = match joined {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                error!("❌ Link task terminated abnormally: {}", e);
                Ok(())
            }
            None => Ok(()),
        };

        if side == ProcessSide::Game && self.config.server.save_on_shutdown {
            let saved = self.world.save_players(&self.repository).await;
            info!("💾 Saved {} players", saved);
        }

        info!("⏳ Draining partition queues...");
        self.world.shutdown().await;
        shutdown.complete_shutdown();

        link_outcome?;
        info!("👋 {} process shutdown complete", side);
        Ok(())
    }

    /// Jobs both processes run. Generator ticks only do anything where
    /// generators were loaded, which is the AI process.
    pub fn register_world_jobs(&self, scheduler: &Scheduler) {
        let world = self.world.clone();
        scheduler.register(ROLE_TICK, self.config.intervals.role_tick(), move || {
            let world = world.clone();
            async move {
                world.tick_roles();
                Ok(())
            }
            .boxed()
        });

        if self.world.side() == ProcessSide::Ai {
            let world = self.world.clone();
            scheduler.register(GENERATOR_TICK, self.config.intervals.generator_tick(), move || {
                let world = world.clone();
                async move {
                    world.tick_generators();
                    Ok(())
                }
                .boxed()
            });
        }
    }

    /// Opens the link for this process role and registers its jobs.
    /// The Game process listens; the AI process connects with retry.
    pub async fn start_link(&self, scheduler: &Scheduler, shutdown: &ShutdownState) -> anyhow::Result<LinkTask> {
        let link_config = self.config.link.clone();
        match self.world.side() {
            ProcessSide::Game => {
                let listener = TcpListener::bind(link_config.listen_address)
                    .await
                    .with_context(|| format!("failed to bind {}", link_config.listen_address))?;
                let ping_interval = link_config.ping_interval();
                let (link, connections) = create_game_link(self.world.clone(), link_config);

                let keepalive = link.clone();
                scheduler.register(KEEPALIVE, ping_interval, move || {
                    let link = keepalive.clone();
                    async move {
                        link.keepalive();
                        Ok(())
                    }
                    .boxed()
                });

                Ok(tokio::spawn(serve_game_link(link, listener, connections, shutdown.clone())))
            }
            ProcessSide::Ai => {
                let ping_interval = link_config.ping_interval();
                let flush_interval = link_config.spawn_flush_interval();
                let (link, connections) =
                    create_ai_link(self.world.clone(), link_config, Arc::new(LoggingBrain));

                let keepalive = link.clone();
                scheduler.register(KEEPALIVE, ping_interval, move || {
                    let link = keepalive.clone();
                    async move {
                        link.keepalive();
                        Ok(())
                    }
                    .boxed()
                });

                let flushing = link.clone();
                scheduler.register(SPAWN_FLUSH, flush_interval, move || {
                    let link = flushing.clone();
                    async move {
                        link.flush()
                            .map(|_| ())
                            .map_err(|e| WorldError::Internal(format!("spawn flush failed: {e}")))
                    }
                    .boxed()
                });

                Ok(tokio::spawn(run_uplink(link, connections, shutdown.clone())))
            }
        }
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🎭 Role: {}", self.config.server.role);
        info!("  📂 Data: {}", self.config.server.data_dir.display());
        match self.config.server.role {
            ProcessSide::Game => info!("  🌐 Link listen address: {}", self.config.link.listen_address),
            ProcessSide::Ai => info!("  🌐 Game process address: {}", self.config.link.peer_address),
        }
        info!(
            "  🗺️ {} maps | {} templates | {} generators ({} processable)",
            self.summary.maps,
            self.summary.templates,
            self.summary.generators,
            self.summary.processable_generators
        );
        info!(
            "  🧩 {} partitions | block size {}",
            self.world.processor().partition_count(),
            self.config.world.block_size
        );
    }
}
