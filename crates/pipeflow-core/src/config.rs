//! Pipeline configuration that downstream crates can serialize/deserialize.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on concurrent workers for parallel evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parallelism {
    /// Let the runtime pick (available hardware threads).
    #[default]
    Unbounded,
    Bounded(NonZeroUsize),
}

impl Parallelism {
    pub fn bounded(workers: usize) -> Result<Self> {
        NonZeroUsize::new(workers)
            .map(Parallelism::Bounded)
            .ok_or_else(|| Error::precondition("worker bound must be greater than zero"))
    }

    /// Signed degree: negative means unbounded, zero is rejected.
    pub fn from_degree(degree: i64) -> Result<Self> {
        match degree {
            d if d < 0 => Ok(Parallelism::Unbounded),
            d => Self::bounded(usize::try_from(d).map_err(|_| {
                Error::precondition(format!("worker bound {d} does not fit in usize"))
            })?),
        }
    }

    pub fn sequential() -> Self {
        Parallelism::Bounded(NonZeroUsize::MIN)
    }

    /// A bound of one worker is plain sequential evaluation.
    pub fn is_sequential(&self) -> bool {
        matches!(self, Parallelism::Bounded(n) if n.get() == 1)
    }

    pub fn bound(&self) -> Option<usize> {
        match self {
            Parallelism::Unbounded => None,
            Parallelism::Bounded(n) => Some(n.get()),
        }
    }

    /// Concrete worker count; unbounded resolves to the hardware default.
    pub fn resolve(&self) -> usize {
        match self {
            Parallelism::Bounded(n) => n.get(),
            Parallelism::Unbounded => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Items handed to a worker per scheduling unit in parallel stages.
    pub batch_size: usize,

    /// Evaluate filter/map stages through the worker pool.
    pub parallel: bool,

    /// Worker bound used when `parallel` is set and by the parallel decorator.
    pub max_parallelism: Parallelism,

    /// Items requested per remote page fetch.
    pub page_size: usize,

    /// Buffered items between a blocking producer and an async consumer.
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            parallel: false,
            max_parallelism: Parallelism::Unbounded,
            page_size: 1000,
            channel_capacity: 64,
        }
    }
}

impl PipelineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `PIPEFLOW_BATCH_SIZE`: items per parallel work unit
    /// - `PIPEFLOW_PARALLEL`: `true`/`1` enables parallel stages
    /// - `PIPEFLOW_MAX_PARALLELISM`: worker bound (negative = unbounded)
    /// - `PIPEFLOW_PAGE_SIZE`: remote page size
    /// - `PIPEFLOW_CHANNEL_CAPACITY`: async bridge buffer
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("PIPEFLOW_BATCH_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.batch_size = v;
            }
        }

        if let Ok(s) = std::env::var("PIPEFLOW_PARALLEL") {
            cfg.parallel = matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(s) = std::env::var("PIPEFLOW_MAX_PARALLELISM") {
            if let Some(p) = s.parse::<i64>().ok().and_then(|d| Parallelism::from_degree(d).ok()) {
                cfg.max_parallelism = p;
            }
        }

        if let Ok(s) = std::env::var("PIPEFLOW_PAGE_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.page_size = v;
            }
        }

        if let Ok(s) = std::env::var("PIPEFLOW_CHANNEL_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.channel_capacity = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::precondition("batch size must be greater than zero"));
        }
        if self.page_size == 0 {
            return Err(Error::precondition("page size must be greater than zero"));
        }
        if self.channel_capacity == 0 {
            return Err(Error::precondition(
                "channel capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}
