//! Incremental client configuration.
//!
//! The builder accumulates partial choices while the runner is in the reset
//! phase and emits an immutable snapshot when the client applies them. The
//! reserved debug-display stream is runner-owned: it survives `reset()` and
//! is re-added with a single in-flight packet.

use std::collections::BTreeMap;

use pipe_types::{ClientConfig, ProfilingMode, INVALID_ID};

#[derive(Clone)]
pub struct ConfigBuilder {
    display_stream_id: i32,
    input_config_id: i32,
    offload_id: i32,
    termination_id: i32,
    profiling: ProfilingMode,
    config_has_display_stream: bool,
    output_configs: BTreeMap<i32, u32>,
    optional_config: Option<Vec<u8>>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            display_stream_id: INVALID_ID,
            input_config_id: INVALID_ID,
            offload_id: INVALID_ID,
            termination_id: INVALID_ID,
            profiling: ProfilingMode::Disabled,
            config_has_display_stream: false,
            output_configs: BTreeMap::new(),
            optional_config: None,
        }
    }

    /// Reserves a display stream the runner always subscribes to.
    pub fn set_debug_display_stream(&mut self, stream_id: i32) {
        self.display_stream_id = stream_id;
        self.output_configs.insert(stream_id, 1);
    }

    pub fn display_stream_id(&self) -> i32 {
        self.display_stream_id
    }

    /// True once the client itself asked for the display stream.
    pub fn client_enables_display_stream(&self) -> bool {
        self.config_has_display_stream
    }

    pub fn update_input_config(&mut self, config_id: i32) -> &mut Self {
        self.input_config_id = config_id;
        self
    }

    pub fn update_output_stream(&mut self, stream_id: i32, max_in_flight: u32) -> &mut Self {
        if stream_id == self.display_stream_id {
            self.config_has_display_stream = true;
        }
        self.output_configs.insert(stream_id, max_in_flight);
        self
    }

    pub fn update_termination(&mut self, termination_id: i32) -> &mut Self {
        self.termination_id = termination_id;
        self
    }

    pub fn update_offload(&mut self, offload_id: i32) -> &mut Self {
        self.offload_id = offload_id;
        self
    }

    pub fn update_profiling(&mut self, profiling: ProfilingMode) -> &mut Self {
        self.profiling = profiling;
        self
    }

    pub fn update_optional_config(&mut self, payload: Vec<u8>) -> &mut Self {
        self.optional_config = Some(payload);
        self
    }

    pub fn emit(&self) -> ClientConfig {
        ClientConfig::new(
            self.input_config_id,
            self.offload_id,
            self.termination_id,
            self.output_configs.clone(),
            self.profiling,
            self.optional_config.clone(),
        )
    }

    pub fn reset(&mut self) -> &mut Self {
        self.input_config_id = INVALID_ID;
        self.offload_id = INVALID_ID;
        self.termination_id = INVALID_ID;
        self.profiling = ProfilingMode::Disabled;
        self.output_configs.clear();
        self.optional_config = None;
        if self.display_stream_id != INVALID_ID {
            self.output_configs.insert(self.display_stream_id, 1);
        }
        self.config_has_display_stream = false;
        self
    }
}
