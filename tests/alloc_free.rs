//! Allocation-free audio callback tests.
//!
//! Every render below runs inside `assert_no_alloc`, which aborts the test
//! binary on any heap allocation in debug builds. Setup happens outside the
//! guarded closures.

use assert_no_alloc::{assert_no_alloc, AllocDisabler};

#[cfg(debug_assertions)]
#[global_allocator]
static A: AllocDisabler = AllocDisabler;

mod common;

use chiproll::midi::{MidiEvent, MidiEventKind, MidiSequence, ToneSynth};
use chiproll::{AudioDispatcher, Player, PlayerConfig};
use common::{FakeEmulator, ScriptedLoader, TrackScript};
use std::sync::Arc;

/// Render `blocks` host buffers of 512 frames.
fn assert_render_alloc_free(dispatcher: &mut AudioDispatcher, blocks: usize) {
    let mut out = vec![0.0f32; 1024];
    assert_no_alloc(|| {
        for _ in 0..blocks {
            dispatcher.render(&mut out);
        }
    });
}

#[test]
fn test_chiptune_render_alloc_free() {
    let loader = Arc::new(ScriptedLoader::new(vec![TrackScript::tone(1000, 2000)]));
    let player = Player::builder(PlayerConfig::default())
        .chiptune_loader(loader)
        .build();
    player.load_chiptune(b"nsf").unwrap();
    player.start_track(0).unwrap();

    let mut dispatcher = player.dispatcher();
    // Two seconds, across the end of the tone.
    assert_render_alloc_free(&mut dispatcher, 172);
    assert!(player.is_playing());
}

#[test]
fn test_midi_render_alloc_free() {
    let mut events = Vec::new();
    for i in 0..32u8 {
        let start = f64::from(i) * 60.0;
        let key = 48 + (i % 24);
        let channel = if i % 8 == 7 { 9 } else { i % 4 };
        events.push(MidiEvent::new(
            start,
            MidiEventKind::NoteOn { channel, key, velocity: 100 },
        ));
        events.push(MidiEvent::new(
            start + 200.0,
            MidiEventKind::NoteOff { channel, key },
        ));
    }
    events.push(MidiEvent::new(500.0, MidiEventKind::Tempo(400_000)));
    events.push(MidiEvent::new(
        700.0,
        MidiEventKind::PitchBend { channel: 0, value: 10_000 },
    ));

    let player = Player::builder(PlayerConfig::default())
        .synth(Box::new(ToneSynth::new(44_100)))
        .build();
    player.load_midi(MidiSequence::from_events(events)).unwrap();
    player.midi_play().unwrap();

    let mut dispatcher = player.dispatcher();
    assert_render_alloc_free(&mut dispatcher, 250);
    assert!(!player.is_playing());
}

#[test]
fn test_hardware_render_alloc_free() {
    let player = Player::builder(PlayerConfig::default())
        .emulator(Box::new(FakeEmulator::new(735, 2000)))
        .build();
    player.load_rom(&common::rom(26)).unwrap();

    let mut dispatcher = player.dispatcher();
    for _ in 0..30 {
        player.run_emulator_frame().unwrap();
        assert_render_alloc_free(&mut dispatcher, 1);
    }
}
