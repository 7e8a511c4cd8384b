//! Facet lifecycle states
//!
//! Every independently tracked dimension of a session (stream, camera,
//! screen-share, recording, failover) carries a [`FacetState`]: the current
//! and previous [`ExecutableState`]. Transitions are validated against a
//! fixed graph so that no combination of `start`/`stop`/`suspend` calls can
//! leave a facet in an undefined state.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle state of a facet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutableState {
    Created,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
    Suspended,
    Error,
}

impl ExecutableState {
    /// Check whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: ExecutableState) -> bool {
        use ExecutableState::*;

        match self {
            Created => matches!(next, Initialized | Error),
            Initialized => matches!(next, Starting),
            Starting => matches!(next, Started | Error),
            Started => matches!(next, Suspended | Stopping | Error),
            Suspended => matches!(next, Starting | Stopping),
            Stopping => matches!(next, Stopped | Error),
            Stopped => matches!(next, Starting),
            // Leaving an error always goes through an explicit stop.
            Error => matches!(next, Stopping | Stopped),
        }
    }
}

/// Current/previous state pair of one facet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacetState {
    current: ExecutableState,
    previous: ExecutableState,
}

impl Default for FacetState {
    fn default() -> Self {
        Self::new(ExecutableState::Created)
    }
}

impl FacetState {
    pub fn new(initial: ExecutableState) -> Self {
        Self {
            current: initial,
            previous: initial,
        }
    }

    pub fn current(&self) -> ExecutableState {
        self.current
    }

    pub fn previous(&self) -> ExecutableState {
        self.previous
    }

    pub fn is(&self, state: ExecutableState) -> bool {
        self.current == state
    }

    /// Move to `next`, rejecting edges outside the lifecycle graph.
    ///
    /// Returns `Ok(false)` when the facet is already in `next`.
    pub fn transition(&mut self, next: ExecutableState) -> Result<bool> {
        if self.current == next {
            return Ok(false);
        }

        if !self.current.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.current,
                to: next,
            });
        }

        debug!("Facet state transition: {:?} -> {:?}", self.current, next);

        self.previous = self.current;
        self.current = next;

        Ok(true)
    }

    /// Force a nested facet to `Stopped` because its parent left `Started`.
    ///
    /// Returns true if the state changed.
    pub fn reset(&mut self) -> bool {
        if self.current == ExecutableState::Stopped {
            return false;
        }

        self.previous = self.current;
        self.current = ExecutableState::Stopped;

        true
    }
}

/// Lifecycle hooks of a stateful session component.
///
/// Implementors provide the `*_internal` hooks; the provided methods drive
/// the facet through its transient states and demote it to `Error` when a
/// hook fails.
#[async_trait]
pub trait Executable: Send {
    fn facet(&self) -> &FacetState;

    fn facet_mut(&mut self) -> &mut FacetState;

    /// Called after every successful transition
    fn state_changed(&mut self, _state: ExecutableState) {}

    async fn init_internal(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start_internal(&mut self) -> Result<()>;

    async fn suspend_internal(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stop_internal(&mut self) -> Result<()>;

    async fn destroy_internal(&mut self) -> Result<()> {
        Ok(())
    }

    fn state(&self) -> ExecutableState {
        self.facet().current()
    }

    fn previous_state(&self) -> ExecutableState {
        self.facet().previous()
    }

    fn started(&self) -> bool {
        self.state() == ExecutableState::Started
    }

    fn set_state(&mut self, state: ExecutableState) -> Result<()> {
        if self.facet_mut().transition(state)? {
            self.state_changed(state);
        }
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        if let Err(e) = self.init_internal().await {
            self.set_state(ExecutableState::Error)?;
            return Err(e);
        }
        self.set_state(ExecutableState::Initialized)
    }

    async fn start(&mut self) -> Result<()> {
        if self.state() == ExecutableState::Created {
            self.init().await?;
        }

        self.set_state(ExecutableState::Starting)?;

        if let Err(e) = self.start_internal().await {
            self.set_state(ExecutableState::Error)?;
            return Err(e);
        }

        self.set_state(ExecutableState::Started)
    }

    async fn suspend(&mut self) -> Result<()> {
        if self.state() != ExecutableState::Started {
            return Ok(());
        }

        self.set_state(ExecutableState::Suspended)?;
        self.suspend_internal().await
    }

    async fn stop(&mut self) -> Result<()> {
        match self.state() {
            ExecutableState::Started | ExecutableState::Suspended | ExecutableState::Error => {}
            _ => return Ok(()),
        }

        self.set_state(ExecutableState::Stopping)?;

        if let Err(e) = self.stop_internal().await {
            self.set_state(ExecutableState::Error)?;
            return Err(e);
        }

        self.set_state(ExecutableState::Stopped)
    }

    async fn destroy(&mut self) -> Result<()> {
        if matches!(
            self.state(),
            ExecutableState::Started | ExecutableState::Suspended
        ) {
            self.stop().await?;
        }
        self.destroy_internal().await
    }
}
