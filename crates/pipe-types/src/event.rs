//! Phase event model.
//!
//! The engine drives every component through the same lifecycle: an event
//! announces entry into a phase, completion of the transition by all
//! components, or an abort of the attempt. `ClientConfig` doubles as the
//! config-phase event so components receive the emitted snapshot directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::ProfilingMode;
use crate::error::{Error, Result};

/// Sentinel for "not selected".
pub const INVALID_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Entry,
    TransitionComplete,
    Aborted,
}

/// Phases announced through [`RunnerEvent`]. Config has its own event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Reset,
    Run,
    StopWithFlush,
    StopImmediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerEvent {
    pub phase: EventPhase,
    pub state: PhaseState,
}

impl RunnerEvent {
    pub fn entry(phase: EventPhase) -> Self {
        Self {
            phase,
            state: PhaseState::Entry,
        }
    }

    pub fn transition_complete(phase: EventPhase) -> Self {
        Self {
            phase,
            state: PhaseState::TransitionComplete,
        }
    }

    pub fn abort(phase: EventPhase) -> Self {
        Self {
            phase,
            state: PhaseState::Aborted,
        }
    }

    pub fn is_phase_entry(&self) -> bool {
        self.state == PhaseState::Entry
    }

    pub fn is_transition_complete(&self) -> bool {
        self.state == PhaseState::TransitionComplete
    }

    pub fn is_aborted(&self) -> bool {
        self.state == PhaseState::Aborted
    }
}

/// Immutable client configuration snapshot emitted at the end of the config
/// accumulation round. Consumed once per transition, discarded on reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    input_config_id: i32,
    offload_id: i32,
    termination_id: i32,
    output_configs: BTreeMap<i32, u32>,
    profiling: ProfilingMode,
    optional_config: Option<Vec<u8>>,
    #[serde(skip, default = "default_phase_state")]
    state: PhaseState,
}

fn default_phase_state() -> PhaseState {
    PhaseState::Entry
}

impl ClientConfig {
    pub fn new(
        input_config_id: i32,
        offload_id: i32,
        termination_id: i32,
        output_configs: BTreeMap<i32, u32>,
        profiling: ProfilingMode,
        optional_config: Option<Vec<u8>>,
    ) -> Self {
        Self {
            input_config_id,
            offload_id,
            termination_id,
            output_configs,
            profiling,
            optional_config,
            state: PhaseState::Entry,
        }
    }

    pub fn set_phase_state(&mut self, state: PhaseState) {
        self.state = state;
    }

    pub fn is_phase_entry(&self) -> bool {
        self.state == PhaseState::Entry
    }

    pub fn is_transition_complete(&self) -> bool {
        self.state == PhaseState::TransitionComplete
    }

    pub fn is_aborted(&self) -> bool {
        self.state == PhaseState::Aborted
    }

    pub fn input_config_id(&self) -> Result<i32> {
        if self.input_config_id == INVALID_ID {
            return Err(Error::IllegalState);
        }
        Ok(self.input_config_id)
    }

    pub fn offload_id(&self) -> Result<i32> {
        if self.offload_id == INVALID_ID {
            return Err(Error::IllegalState);
        }
        Ok(self.offload_id)
    }

    pub fn termination_id(&self) -> Result<i32> {
        if self.termination_id == INVALID_ID {
            return Err(Error::IllegalState);
        }
        Ok(self.termination_id)
    }

    pub fn output_stream_configs(&self) -> Result<&BTreeMap<i32, u32>> {
        if self.output_configs.is_empty() {
            return Err(Error::IllegalState);
        }
        Ok(&self.output_configs)
    }

    pub fn profiling(&self) -> ProfilingMode {
        self.profiling
    }

    pub fn optional_config(&self) -> Option<&[u8]> {
        self.optional_config.as_deref()
    }

    /// Opaque serialized form handed to graph adapters.
    pub fn serialized(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::Internal)
    }

    pub fn from_serialized(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|_| Error::InvalidArgument)
    }
}

/// Client-facing lifecycle states derived from phase events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Reset,
    ConfigDone,
    Running,
    Done,
    ErrHalt,
}

/// Implemented by every component the engine broadcasts phase events to.
/// Default handlers acknowledge without acting; a component that reports an
/// error will be skipped by the subsequent abort broadcast.
pub trait RunnerComponent: Send + Sync {
    fn handle_config_phase(&self, _config: &ClientConfig) -> Result {
        Ok(())
    }

    fn handle_execution_phase(&self, _event: &RunnerEvent) -> Result {
        Ok(())
    }

    fn handle_stop_with_flush_phase(&self, _event: &RunnerEvent) -> Result {
        Ok(())
    }

    fn handle_stop_immediate_phase(&self, _event: &RunnerEvent) -> Result {
        Ok(())
    }

    fn handle_reset_phase(&self, _event: &RunnerEvent) -> Result {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_streams() -> ClientConfig {
        let mut outputs = BTreeMap::new();
        outputs.insert(7, 2u32);
        outputs.insert(3, 4u32);
        ClientConfig::new(1, INVALID_ID, 2, outputs, ProfilingMode::Latency, None)
    }

    #[test]
    fn unset_ids_report_illegal_state() {
        let config = config_with_streams();
        assert_eq!(config.input_config_id().unwrap(), 1);
        assert_eq!(config.offload_id().unwrap_err(), Error::IllegalState);
        assert_eq!(config.termination_id().unwrap(), 2);
    }

    #[test]
    fn empty_output_set_reports_illegal_state() {
        let config = ClientConfig::new(
            INVALID_ID,
            INVALID_ID,
            INVALID_ID,
            BTreeMap::new(),
            ProfilingMode::Disabled,
            None,
        );
        assert_eq!(
            config.output_stream_configs().unwrap_err(),
            Error::IllegalState
        );
    }

    #[test]
    fn serialized_snapshot_round_trips_without_phase_state() {
        let mut config = config_with_streams();
        config.set_phase_state(PhaseState::TransitionComplete);
        let decoded = ClientConfig::from_serialized(&config.serialized().unwrap()).unwrap();
        assert_eq!(decoded.input_config_id().unwrap(), 1);
        assert_eq!(decoded.output_stream_configs().unwrap().len(), 2);
        // Phase state is transport-local, not part of the payload.
        assert!(decoded.is_phase_entry());
    }

    #[test]
    fn runner_event_constructors_tag_state() {
        assert!(RunnerEvent::entry(EventPhase::Run).is_phase_entry());
        assert!(RunnerEvent::transition_complete(EventPhase::StopWithFlush)
            .is_transition_complete());
        assert!(RunnerEvent::abort(EventPhase::StopImmediate).is_aborted());
    }
}
