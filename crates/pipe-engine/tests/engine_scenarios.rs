//! End-to-end engine behavior against scripted components.

mod common;

use common::{
    recording_display, Harness, QUIET_TIMEOUT, RECV_TIMEOUT,
};
use pipe_engine::{ClientEngineInterface, EnginePhase, EngineSettings, ErrorSource};
use pipe_types::{ClientState, ConfigurationCommand, ControlCommand, Error, PacketType};

#[test]
fn happy_path_pixel_stream_drops_over_limit() {
    let harness = Harness::start(EngineSettings::default());
    harness.configure_stream(7, 2);
    harness.apply_configs();
    harness.start_graph();

    harness.graph.emit_pixel(7, 100, 16, 16);
    harness.graph.emit_pixel(7, 200, 16, 16);
    // Two packets in flight and never freed: the third is dropped silently.
    harness.graph.emit_pixel(7, 300, 16, 16);

    let mut timestamps = vec![
        harness
            .probe
            .packets
            .recv_timeout(RECV_TIMEOUT)
            .unwrap()
            .1
            .timestamp_us(),
        harness
            .probe
            .packets
            .recv_timeout(RECV_TIMEOUT)
            .unwrap()
            .1
            .timestamp_us(),
    ];
    timestamps.sort_unstable();
    assert_eq!(timestamps, vec![100, 200]);
    assert!(harness.probe.packets.recv_timeout(QUIET_TIMEOUT).is_err());

    harness
        .engine
        .process_client_command(&ControlCommand::StopGraph)
        .unwrap();
    assert_eq!(
        harness.probe.states.recv_timeout(RECV_TIMEOUT).unwrap(),
        ClientState::Done
    );
    // Exactly one terminal state: the graph's own termination during the
    // stop phase must not produce a second transition.
    assert!(harness.probe.states.recv_timeout(QUIET_TIMEOUT).is_err());
    assert_eq!(harness.engine.current_phase(), EnginePhase::Config);
}

#[test]
fn semantic_packet_round_trips_bytes_and_timestamp() {
    let harness = Harness::start(EngineSettings::default());
    harness.configure_stream(3, 4);
    harness.apply_configs();
    harness.start_graph();

    harness.graph.emit_semantic(3, 42, b"hello");
    let (stream_id, packet) = harness.probe.packets.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(stream_id, 3);
    assert_eq!(packet.timestamp_us(), 42);
    assert_eq!(packet.semantic_data(), Some(&b"hello"[..]));
    assert_eq!(packet.packet_type(), PacketType::Semantic);
}

#[test]
fn display_stream_not_requested_by_client_goes_to_display_only() {
    let engine_settings = EngineSettings {
        display_stream_id: 5,
        ..EngineSettings::default()
    };
    let harness = Harness::start(engine_settings);
    let (display, display_frames) = recording_display();
    harness.engine.set_display(display);

    // The client never asks for stream 5; the runner subscribes on its own.
    harness.apply_configs();
    harness.start_graph();

    harness.graph.emit_pixel(5, 10, 8, 8);
    let frame = display_frames.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(frame.stream_id(), 5);
    assert_eq!(frame.timestamp_us(), 10);
    assert!(
        harness.probe.packets.recv_timeout(QUIET_TIMEOUT).is_err(),
        "client must not receive the unrequested display stream"
    );

    // The display released its reference, so the pool (max 1) can take the
    // next frame.
    harness.graph.emit_pixel(5, 20, 8, 8);
    let frame = display_frames.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(frame.timestamp_us(), 20);
}

#[test]
fn display_stream_requested_by_client_is_duplicated() {
    let engine_settings = EngineSettings {
        display_stream_id: 5,
        ..EngineSettings::default()
    };
    let harness = Harness::start(engine_settings);
    let (display, display_frames) = recording_display();
    harness.engine.set_display(display);

    harness.configure_stream(5, 2);
    harness.apply_configs();
    harness.start_graph();

    harness.graph.emit_pixel(5, 11, 8, 8);
    let display_frame = display_frames.recv_timeout(RECV_TIMEOUT).unwrap();
    let (stream_id, client_packet) = harness.probe.packets.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(stream_id, 5);
    assert_eq!(client_packet.buffer_id(), display_frame.buffer_id());
    assert_eq!(client_packet.timestamp_us(), 11);
}

#[test]
fn stream_error_in_run_halts_all_but_the_source() {
    let harness = Harness::start(EngineSettings::default());
    harness.configure_stream(7, 2);
    harness.configure_stream(3, 4);
    harness.apply_configs();
    harness.start_graph();

    harness
        .engine
        .notify_component_error(ErrorSource::Stream(3), "simulated failure".to_string(), false);

    assert_eq!(
        harness.probe.states.recv_timeout(RECV_TIMEOUT).unwrap(),
        ClientState::ErrHalt
    );
    assert_eq!(harness.engine.current_phase(), EnginePhase::Config);
    assert!(harness
        .graph
        .events()
        .contains(&"stop_immediate_entry".to_string()));

    // The erroring stream was skipped by the halt broadcast and is still
    // running; the stopped pixel stream no longer forwards anything.
    harness.graph.emit_semantic(3, 50, b"late");
    let (stream_id, _) = harness.probe.packets.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(stream_id, 3);
    harness.graph.emit_pixel(7, 60, 16, 16);
    assert!(harness.probe.packets.recv_timeout(QUIET_TIMEOUT).is_err());
}

#[test]
fn client_death_in_run_forces_reset() {
    let harness = Harness::start(EngineSettings::default());
    harness.configure_stream(7, 2);
    harness.apply_configs();
    harness.start_graph();

    harness
        .engine
        .process_client_command(&ControlCommand::DeathNotification)
        .unwrap();

    // Halt skips the client, so the only state it observes is the reset.
    assert_eq!(
        harness.probe.states.recv_timeout(RECV_TIMEOUT).unwrap(),
        ClientState::Reset
    );
    assert_eq!(harness.engine.current_phase(), EnginePhase::Reset);
    let events = harness.graph.events();
    assert!(events.contains(&"stop_immediate_entry".to_string()));
    assert!(events.contains(&"reset_entry".to_string()));
}

#[test]
fn commands_are_checked_against_the_current_phase() {
    let harness = Harness::start(EngineSettings::default());
    assert_eq!(
        harness
            .engine
            .process_client_command(&ControlCommand::StartGraph)
            .unwrap_err(),
        Error::IllegalState
    );
    assert_eq!(
        harness
            .engine
            .process_client_command(&ControlCommand::StopGraph)
            .unwrap_err(),
        Error::IllegalState
    );

    harness.configure_stream(3, 1);
    harness.apply_configs();

    // Config updates are only legal before configs are applied.
    assert_eq!(
        harness
            .engine
            .process_client_config_update(&ConfigurationCommand::SetOutputStream {
                stream_id: 7,
                max_in_flight: 1,
            })
            .unwrap_err(),
        Error::IllegalState
    );
    assert_eq!(
        harness
            .engine
            .process_client_command(&ControlCommand::ApplyConfigs)
            .unwrap_err(),
        Error::IllegalState
    );
}

#[test]
fn unknown_output_stream_keeps_runner_in_reset() {
    let harness = Harness::start(EngineSettings::default());
    harness.configure_stream(99, 1);
    harness
        .engine
        .process_client_command(&ControlCommand::ApplyConfigs)
        .unwrap();

    assert!(
        harness.probe.states.recv_timeout(QUIET_TIMEOUT).is_err(),
        "no transition may be announced for a rejected config"
    );
    assert_eq!(harness.engine.current_phase(), EnginePhase::Reset);
}

#[test]
fn reset_configs_returns_to_reset_phase() {
    let harness = Harness::start(EngineSettings::default());
    harness.configure_stream(3, 1);
    harness.apply_configs();

    harness
        .engine
        .process_client_command(&ControlCommand::ResetConfigs)
        .unwrap();
    assert_eq!(
        harness.probe.states.recv_timeout(RECV_TIMEOUT).unwrap(),
        ClientState::Reset
    );
    assert_eq!(harness.engine.current_phase(), EnginePhase::Reset);
    assert!(harness
        .graph
        .events()
        .contains(&"reset_entry".to_string()));
}

#[test]
fn read_debug_data_delivers_graph_blob() {
    let harness = Harness::start(EngineSettings::default());
    harness.configure_stream(3, 1);
    harness.apply_configs();

    harness
        .engine
        .process_client_command(&ControlCommand::ReadDebugData)
        .unwrap();
    assert_eq!(
        harness.probe.debug.recv_timeout(RECV_TIMEOUT).unwrap(),
        "fake-debug"
    );
}

#[test]
fn stop_and_restart_cycle_reuses_configuration() {
    let harness = Harness::start(EngineSettings::default());
    harness.configure_stream(3, 2);
    harness.apply_configs();
    harness.start_graph();

    harness
        .engine
        .process_client_command(&ControlCommand::StopGraph)
        .unwrap();
    assert_eq!(
        harness.probe.states.recv_timeout(RECV_TIMEOUT).unwrap(),
        ClientState::Done
    );

    // CONFIG again: the same managers accept a fresh run.
    harness.start_graph();
    harness.graph.emit_semantic(3, 9, b"second-run");
    let (stream_id, packet) = harness.probe.packets.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(stream_id, 3);
    assert_eq!(packet.semantic_data(), Some(&b"second-run"[..]));
}
