//! Wiring: build every stage from a [`PipelineConfig`] and run them.
//!
//! Four activities run concurrently once [`Pipeline::start`] returns:
//!
//! | Task | Loop |
//! |------|------|
//! | router     | scan input every `scan_interval`, publish new files |
//! | dispatcher | consume the queue, filter, submit to the pool |
//! | pool       | up to `workers` conversions at once |
//! | monitor    | every `monitor_interval`, kill bloated converter processes |
//!
//! They share nothing but the store handle and the queue.
//! [`Pipeline::shutdown`] stops them in dependency order.

use crate::config::{PipelineConfig, QueueBackend};
use crate::converter::{Converter, LibreOfficeConverter};
use crate::error::PipelineError;
use crate::monitor::{ProcessInspector, ProcessMonitor, PsInspector};
use crate::pipeline::dispatch::{DispatchFilter, Dispatcher};
use crate::pipeline::ingest::{IngestionRouter, SeenFilter};
use crate::pipeline::queue::{LocalQueue, RedisQueue, WorkQueue};
use crate::pipeline::worker::{ConversionPool, ScratchDir};
use crate::store::{IdempotencyStore, RedisStore};
use crate::tracker::StateTracker;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// External collaborators a pipeline runs against.
pub struct Collaborators {
    pub store: Arc<dyn IdempotencyStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub converter: Arc<dyn Converter>,
    pub inspector: Arc<dyn ProcessInspector>,
}

impl Collaborators {
    /// Production collaborators: Redis store, configured queue backend,
    /// LibreOffice converter and `ps`-based inspector.
    pub async fn connect(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let store: Arc<dyn IdempotencyStore> = Arc::new(RedisStore::connect(&config.redis_url).await?);

        let queue: Arc<dyn WorkQueue> = match config.queue_backend {
            QueueBackend::Local => Arc::new(LocalQueue::new(&config.queue_name, config.queue_capacity)),
            QueueBackend::Redis => {
                Arc::new(RedisQueue::connect(&config.redis_url, &config.queue_name).await?)
            }
        };

        let program = match &config.soffice_path {
            Some(path) => path.clone(),
            None => soffice_locate::locate_soffice()
                .map_err(|e| PipelineError::ConverterUnavailable(e.to_string()))?,
        };
        info!(program = %program.display(), "Using LibreOffice");
        let converter = LibreOfficeConverter::new(
            program,
            soffice_locate::profile_root(),
            &config.target_extension,
        )
        .with_timeout(config.convert_timeout);

        Ok(Self {
            store,
            queue,
            converter: Arc::new(converter),
            inspector: Arc::new(PsInspector),
        })
    }
}

/// The Ingestion Router as `config` describes it.
///
/// The shared read filter is attached only when configured, which
/// [`PipelineConfigBuilder::build`](crate::PipelineConfigBuilder::build)
/// allows only for the Redis queue.
fn ingest_router(
    config: &PipelineConfig,
    store: Arc<dyn IdempotencyStore>,
    queue: Arc<dyn WorkQueue>,
) -> Result<IngestionRouter, PipelineError> {
    let seen = match &config.seen_file {
        Some(path) => SeenFilter::persistent(path, config.state_ttl)?,
        None => SeenFilter::in_memory(config.state_ttl),
    };
    let router = IngestionRouter::new(&config.input_dir, &config.include_suffix, seen, queue);
    Ok(if config.shared_read_filter {
        router.with_shared_filter(StateTracker::for_reading(
            store,
            config.read_namespace(),
            config.state_ttl,
        ))
    } else {
        router
    })
}

/// A running pipeline.
pub struct Pipeline {
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    pool: Arc<ConversionPool>,
    scratch: Arc<ScratchDir>,
    store: Arc<dyn IdempotencyStore>,
}

impl Pipeline {
    /// Connect the production collaborators and start.
    pub async fn connect(config: PipelineConfig) -> Result<Self, PipelineError> {
        let parts = Collaborators::connect(&config).await?;
        Self::start(config, parts).await
    }

    /// Start every activity against `parts`.
    ///
    /// Fails if the input directory is unreadable or the output or scratch
    /// directory cannot be created.
    pub async fn start(config: PipelineConfig, parts: Collaborators) -> Result<Self, PipelineError> {
        let Collaborators {
            store,
            queue,
            converter,
            inspector,
        } = parts;

        tokio::fs::read_dir(&config.input_dir)
            .await
            .map_err(|source| PipelineError::InputDir {
                path: config.input_dir.clone(),
                source,
            })?;
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(|source| PipelineError::OutputDir {
                path: config.output_dir.clone(),
                source,
            })?;
        let scratch = Arc::new(ScratchDir::create(config.scratch_dir()).await?);

        let processing =
            StateTracker::for_processing(store.clone(), config.state_namespace(), config.state_ttl);

        let router = ingest_router(&config, store.clone(), queue.clone())?;

        let pool = Arc::new(ConversionPool::new(
            config.workers,
            processing.clone(),
            converter,
            scratch.clone(),
            &config.output_dir,
            &config.target_extension,
        ));
        let dispatcher = Dispatcher::new(queue, DispatchFilter::new(processing), pool.clone());
        let monitor = ProcessMonitor::new(
            inspector,
            &config.process_name,
            config.memory_threshold_percent,
            config.monitor_interval,
        );

        let shutdown = CancellationToken::new();
        let tasks = vec![
            (
                "router",
                tokio::spawn(router.run(config.scan_interval, shutdown.child_token())),
            ),
            ("dispatcher", tokio::spawn(dispatcher.run(shutdown.child_token()))),
            ("monitor", tokio::spawn(monitor.run(shutdown.child_token()))),
        ];

        info!(
            input = %config.input_dir.display(),
            output = %config.output_dir.display(),
            workers = pool.size(),
            queue = %config.queue_backend,
            "Pipeline started"
        );

        Ok(Self {
            shutdown,
            tasks,
            pool,
            scratch,
            store,
        })
    }

    /// Token that stops the pipeline's loops when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Conversions submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Stop the loops, let running conversions finish, remove the scratch
    /// directory and close the store.
    pub async fn shutdown(self) -> Result<(), PipelineError> {
        info!("Shutting down pipeline");
        self.shutdown.cancel();

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                warn!(task = name, error = %e, "Pipeline task ended abnormally");
            }
        }
        self.pool.shutdown().await;

        let removed = self.scratch.remove().await;
        self.store.close().await;
        removed?;
        info!("Pipeline stopped");
        Ok(())
    }
}
