//! Resolve [`ActionTarget`]s to live elements.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};

use super::target::{ActionTarget, LocatorStrategy, StrategyKind};
use crate::driver::{ElementHandle, PageDriver};
use crate::error::{ActionError, ActionErrorKind};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a single interaction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionResult<S> {
    pub succeeded: bool,
    pub strategy_used: Option<S>,
    pub error: Option<ActionErrorKind>,
}

impl<S> InteractionResult<S> {
    pub fn success(strategy: S) -> Self {
        InteractionResult {
            succeeded: true,
            strategy_used: Some(strategy),
            error: None,
        }
    }

    pub fn failure(error: &ActionError) -> Self {
        InteractionResult {
            succeeded: false,
            strategy_used: None,
            error: Some(error.kind()),
        }
    }

    pub fn from_result(result: &Result<S, ActionError>) -> Self
    where
        S: Clone,
    {
        match result {
            Ok(strategy) => InteractionResult::success(strategy.clone()),
            Err(err) => InteractionResult::failure(err),
        }
    }
}

/// An element found for a target, with the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub element: ElementHandle,
    pub strategy: StrategyKind,
    /// Position of the winning strategy in the target's ordered list.
    pub index: usize,
}

/// Walks a target's strategies in precedence order, giving each its own
/// window, all within the target's overall budget.
pub struct LocatorResolver<'p> {
    page: &'p dyn PageDriver,
    poll_interval: Duration,
}

impl<'p> LocatorResolver<'p> {
    pub fn new(page: &'p dyn PageDriver) -> Self {
        LocatorResolver {
            page,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub async fn resolve(&self, target: &ActionTarget) -> Result<Resolved, ActionError> {
        let deadline = Instant::now() + target.budget();
        if let Some(found) = self.probe(target).await {
            return Ok(found);
        }

        for (index, entry) in target.strategies().iter().enumerate() {
            let started = Instant::now();
            if started >= deadline {
                break;
            }
            let window_end = (started + entry.timeout).min(deadline);
            loop {
                // Earlier strategies stay in play so a late higher-priority
                // match still wins.
                if let Some(found) = self.probe_through(target, index).await {
                    log::debug!(
                        "resolved '{}' via {:?} strategy #{} in window #{index}",
                        target.description(),
                        found.strategy,
                        found.index
                    );
                    return Ok(found);
                }
                let now = Instant::now();
                if now >= window_end {
                    break;
                }
                sleep(self.poll_interval.min(window_end - now)).await;
            }
            log::debug!(
                "'{}' missed {:?} strategy #{index} after {:?}",
                target.description(),
                entry.strategy.kind(),
                started.elapsed()
            );
        }

        loop {
            if let Some(found) = self.probe(target).await {
                return Ok(found);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }

        Err(ActionError::ElementNotFound {
            target: target.description().to_string(),
            strategies: target.strategies().len(),
            budget: target.budget(),
        })
    }

    /// One instant pass over every strategy, in order.
    pub async fn probe(&self, target: &ActionTarget) -> Option<Resolved> {
        self.probe_through(target, usize::MAX).await
    }

    /// One instant pass over strategies `0..=last`, in order.
    async fn probe_through(&self, target: &ActionTarget, last: usize) -> Option<Resolved> {
        for (index, entry) in target.strategies().iter().enumerate() {
            if index > last {
                break;
            }
            if let Some(element) = self.first_match(&entry.strategy).await {
                return Some(Resolved {
                    element,
                    strategy: entry.strategy.kind(),
                    index,
                });
            }
        }
        None
    }

    /// Poll several targets until one resolves; returns its position.
    pub async fn wait_for_any(
        &self,
        targets: &[&ActionTarget],
        timeout: Duration,
    ) -> Option<(usize, Resolved)> {
        let deadline = Instant::now() + timeout;
        loop {
            for (position, target) in targets.iter().enumerate() {
                if let Some(found) = self.probe(target).await {
                    return Some((position, found));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Every element matched by the first strategy with any match.
    pub async fn resolve_all(&self, target: &ActionTarget) -> Vec<ElementHandle> {
        for entry in target.strategies() {
            match self.page.query(&entry.strategy).await {
                Ok(found) if !found.is_empty() => return found,
                Ok(_) => {}
                Err(err) => log::debug!("query for '{}' failed: {err}", target.description()),
            }
        }
        Vec::new()
    }

    async fn first_match(&self, strategy: &LocatorStrategy) -> Option<ElementHandle> {
        match self.page.query(strategy).await {
            Ok(found) => found.into_iter().next(),
            Err(err) => {
                log::debug!("locator query {strategy:?} failed: {err}");
                None
            }
        }
    }
}
