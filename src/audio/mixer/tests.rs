// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    io::Cursor,
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use crossbeam_channel::Receiver;

use crate::audio::{
    clock::{ManualClock, SystemClock},
    filter::{BiquadFilter, FilterChain},
    format::SampleEncoding,
    source::{Decoder, DecodedSource, RawSource, SourceError, ToneGenerator},
    INFINITE,
};
use crate::testutil::{audio::s16_bytes, eventually};

use super::*;

const FRAMES: usize = 64;

fn stereo() -> AudioFormat {
    AudioFormat::new(22050, SampleEncoding::S16_NATIVE, 2).unwrap()
}

struct Fixture {
    mixer: Mixer,
    clock: Arc<ManualClock>,
    events: Receiver<MixerEvent>,
}

fn fixture(settings: MixerSettings) -> Fixture {
    let clock = Arc::new(ManualClock::new(0));
    let (sink, events) = EventSink::bounded(64);
    let mixer = Mixer::new(stereo(), 1024, &settings, clock.clone(), sink).unwrap();
    Fixture {
        mixer,
        clock,
        events,
    }
}

fn voices(count: usize) -> MixerSettings {
    MixerSettings {
        voices: count,
        ..Default::default()
    }
}

fn mix(mixer: &Mixer, frames: usize) -> Vec<i32> {
    let mut acc = vec![0; frames * 2];
    mixer.mix(&mut acc);
    acc
}

/// A seekable stereo source holding `frames` frames of a constant value.
fn constant(frames: usize, value: i16) -> Arc<AudioSource> {
    let raw = RawSource::seekable(
        Cursor::new(s16_bytes(&vec![value; frames * 2])),
        stereo(),
        0,
        None,
    )
    .unwrap();
    AudioSource::new(raw)
}

/// A forward-only stereo source holding `frames` frames of a constant value.
fn forward(frames: usize, value: i16) -> Arc<AudioSource> {
    let raw =
        RawSource::forward(Cursor::new(s16_bytes(&vec![value; frames * 2])), stereo(), None)
            .unwrap();
    AudioSource::new(raw)
}

fn finished(events: &Receiver<MixerEvent>) -> Vec<usize> {
    events
        .try_iter()
        .filter_map(|event| match event {
            MixerEvent::VoiceFinished { voice } => Some(voice),
            _ => None,
        })
        .collect()
}

#[test]
fn test_volume_round_trip() {
    let f = fixture(voices(1));
    let voice = f.mixer.voice(0).unwrap();
    for left in (0..=MAX_VOLUME).step_by(16) {
        for right in [0, 1, 128, 255, MAX_VOLUME] {
            voice.set_volume(left, right).unwrap();
            assert_eq!(voice.volume(), (left, right));
        }
    }

    voice.set_volume(10, 20).unwrap();
    assert!(matches!(
        voice.set_volume(257, 0),
        Err(MixerError::InvalidVolume(257))
    ));
    assert!(voice.set_volume(0, 300).is_err());
    assert_eq!(voice.volume(), (10, 20));

    voice.set_rate(2.0).unwrap();
    assert!(voice.set_rate(-0.5).is_err());
    assert!(voice.set_rate(f32::NAN).is_err());
    assert_eq!(voice.rate(), 2.0);

    assert!(f.mixer.set_master_volume(300).is_err());
    assert_eq!(f.mixer.master_volume(), MAX_VOLUME);
    assert!(matches!(f.mixer.voice(1), Err(MixerError::InvalidVoice(1))));
}

#[test]
fn test_forward_source_stops_at_end() {
    let f = fixture(voices(1));
    let source = forward(100, 1000);
    assert!(matches!(
        f.mixer.play(PlayTarget::Voice(0), &source, PlayOptions::looping(1)),
        Err(MixerError::CannotLoop)
    ));
    assert_eq!(source.voice_count(), 0);

    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(source.voice_count(), 1);

    let first = mix(&f.mixer, FRAMES);
    assert!(first.iter().all(|&s| s == 1000));
    assert_eq!(voice.status(), VoiceStatus::Playing);
    assert_eq!(voice.position(), 64);

    let second = mix(&f.mixer, FRAMES);
    assert!(second[..72].iter().all(|&s| s == 1000));
    assert!(second[72..].iter().all(|&s| s == 0));
    assert_eq!(voice.status(), VoiceStatus::Stopped);
    assert_eq!(source.voice_count(), 0);
    assert_eq!(finished(&f.events), vec![0]);

    assert!(mix(&f.mixer, FRAMES).iter().all(|&s| s == 0));
}

#[test]
fn test_loops_exactly_n_times() {
    let f = fixture(voices(1));
    let source = constant(10, 1000);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::looping(2))
        .unwrap()
        .unwrap();

    let acc = mix(&f.mixer, FRAMES);
    assert!(acc[..60].iter().all(|&s| s == 1000));
    assert!(acc[60..].iter().all(|&s| s == 0));
    assert_eq!(voice.status(), VoiceStatus::Stopped);
}

#[test]
fn test_infinite_loops() {
    let f = fixture(voices(1));
    let source = constant(10, 1000);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::looping(INFINITE))
        .unwrap()
        .unwrap();

    for _ in 0..20 {
        assert!(mix(&f.mixer, FRAMES).iter().all(|&s| s == 1000));
    }
    assert_eq!(voice.status(), VoiceStatus::Playing);
    voice.stop();
    assert_eq!(voice.status(), VoiceStatus::Stopped);
}

#[test]
fn test_invalid_play_arguments() {
    let f = fixture(voices(1));
    let source = constant(10, 1000);
    let options = PlayOptions {
        position: 11,
        ..Default::default()
    };
    assert!(matches!(
        f.mixer.play(PlayTarget::Voice(0), &source, options),
        Err(MixerError::Source(SourceError::OutOfRange { .. }))
    ));
    assert!(f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::looping(-2))
        .is_err());

    let options = PlayOptions {
        position: 1,
        ..Default::default()
    };
    assert!(matches!(
        f.mixer.play(PlayTarget::Voice(0), &forward(10, 0), options),
        Err(MixerError::Source(SourceError::NotSeekable))
    ));
    assert!(matches!(
        f.mixer
            .play(PlayTarget::Voice(3), &source, PlayOptions::default()),
        Err(MixerError::InvalidVoice(3))
    ));
    assert_eq!(f.mixer.voice(0).unwrap().status(), VoiceStatus::Stopped);
}

#[test]
fn test_fade_in() {
    let f = fixture(voices(1));
    let source = constant(10, 1000);
    let options = PlayOptions {
        loops: INFINITE,
        ..PlayOptions::fade_in(1000)
    };
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, options)
        .unwrap()
        .unwrap();
    voice.set_volume(200, 100).unwrap();

    assert_eq!(voice.sampled_volume(), (0, 0));
    f.clock.set(500);
    assert_eq!(voice.sampled_volume(), (100, 50));
    let acc = mix(&f.mixer, FRAMES);
    assert_eq!(acc[0], (1000 * 100) >> 8);
    assert_eq!(acc[1], (1000 * 50) >> 8);
    assert_eq!(voice.fade(), Fade::In);

    f.clock.set(1000);
    assert_eq!(voice.sampled_volume(), (200, 100));
    mix(&f.mixer, FRAMES);
    assert_eq!(voice.fade(), Fade::None);

    f.clock.set(5000);
    assert_eq!(voice.sampled_volume(), (200, 100));
}

#[test]
fn test_fade_out_stops() {
    let f = fixture(voices(1));
    let source = constant(10, 1000);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::looping(INFINITE))
        .unwrap()
        .unwrap();

    f.clock.set(100);
    voice.fade_out(1000);
    f.clock.set(600);
    assert_eq!(voice.sampled_volume(), (128, 128));
    mix(&f.mixer, FRAMES);
    assert_eq!(voice.status(), VoiceStatus::Playing);

    f.clock.set(1100);
    assert_eq!(voice.sampled_volume(), (0, 0));
    assert!(mix(&f.mixer, FRAMES).iter().all(|&s| s == 0));
    assert_eq!(voice.status(), VoiceStatus::Stopped);
    assert_eq!(finished(&f.events), vec![0]);
}

#[test]
fn test_source_volume_scales_voice_volume() {
    let f = fixture(voices(1));
    let source = constant(100, 1000);
    source.set_volume(128, 64).unwrap();
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap()
        .unwrap();
    voice.set_volume(128, 256).unwrap();

    assert_eq!(voice.sampled_volume(), (64, 64));
    let acc = mix(&f.mixer, 4);
    assert_eq!(&acc[..2], &[250, 250]);
}

#[test]
fn test_free_allocation_and_policies() {
    let f = fixture(voices(3));
    let source = constant(10, 1000);
    let play = |clock: u64| {
        f.clock.set(clock);
        f.mixer
            .play(PlayTarget::Free, &source, PlayOptions::looping(INFINITE))
            .unwrap()
            .map(|voice| voice.index())
    };

    assert_eq!(play(0), Some(0));
    assert_eq!(play(10), Some(1));
    assert_eq!(play(20), Some(2));
    assert_eq!(play(30), None);

    f.mixer.set_play_policy(PlayPolicy::Oldest);
    assert_eq!(play(30), Some(0));
    assert_eq!(play(40), Some(1));

    f.mixer.set_play_policy(PlayPolicy::Priority);
    f.mixer.voice(0).unwrap().set_priority(5);
    f.mixer.voice(1).unwrap().set_priority(3);
    f.mixer.voice(2).unwrap().set_priority(1);
    assert_eq!(play(50), Some(2));

    // Voices 1 and 2 tie on priority 1; voice 1 started earlier.
    f.mixer.set_play_policy(PlayPolicy::OldestPriority);
    f.mixer.voice(0).unwrap().set_priority(2);
    f.mixer.voice(1).unwrap().set_priority(1);
    f.mixer.voice(2).unwrap().set_priority(1);
    assert_eq!(f.mixer.oldest_voice(Scope::All, true).unwrap(), Some(0));
    assert_eq!(play(60), Some(1));

    // Restarting takes the source priority, so voices 0 and 1 now tie on 0.
    assert_eq!(f.mixer.voice(1).unwrap().priority(), 0);
    f.mixer.voice(0).unwrap().set_priority(0);
    assert_eq!(play(70), Some(0));
}

#[test]
fn test_reserved_voices() {
    let f = fixture(MixerSettings {
        voices: 3,
        reserved_voices: 1,
        play_policy: PlayPolicy::Oldest,
        ..Default::default()
    });
    assert_eq!(f.mixer.reserved_voices(), 1);
    let source = constant(10, 1000);
    let mut chosen = Vec::new();
    for clock in 0..5 {
        f.clock.set(clock * 10);
        let voice = f
            .mixer
            .play(PlayTarget::Free, &source, PlayOptions::looping(INFINITE))
            .unwrap()
            .unwrap();
        chosen.push(voice.index());
    }
    assert_eq!(chosen, vec![1, 2, 1, 2, 1]);

    f.mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::looping(INFINITE))
        .unwrap();
    f.clock.set(1000);
    assert_eq!(f.mixer.oldest_voice(Scope::All, false).unwrap(), Some(2));
    assert_eq!(f.mixer.oldest_voice(Scope::All, true).unwrap(), Some(2));
    assert_eq!(f.mixer.reserve_voices(10), 3);
}

#[test]
fn test_non_seekable_source_is_exclusive() {
    let f = fixture(voices(2));
    let source = forward(100, 1000);
    f.mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap();
    assert!(matches!(
        f.mixer
            .play(PlayTarget::Voice(1), &source, PlayOptions::default()),
        Err(MixerError::SourceBusy)
    ));
    assert_eq!(f.mixer.voice(1).unwrap().status(), VoiceStatus::Stopped);
    assert_eq!(f.mixer.voice(0).unwrap().status(), VoiceStatus::Playing);
    assert_eq!(source.voice_count(), 1);

    // Replaying on the voice that holds it is allowed.
    f.mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap();
    assert_eq!(source.voice_count(), 1);
}

#[test]
fn test_non_seekable_source_claim_is_atomic() {
    let f = fixture(voices(2));
    let first = f.mixer.voice(0).unwrap();
    let second = f.mixer.voice(1).unwrap();

    for _ in 0..500 {
        let source = forward(10, 1000);
        let barrier = Barrier::new(2);
        let play = |voice: &VoiceHandle| {
            barrier.wait();
            voice.play(&source, PlayOptions::default())
        };
        let results = thread::scope(|scope| {
            let a = scope.spawn(|| play(&first));
            let b = scope.spawn(|| play(&second));
            [a.join().unwrap(), b.join().unwrap()]
        });

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|result| matches!(result, Err(MixerError::SourceBusy))));
        assert_eq!(source.voice_count(), 1);
        f.mixer.stop(Scope::All).unwrap();
        assert_eq!(source.voice_count(), 0);
    }
}

#[test]
fn test_seekable_source_is_shared() {
    let f = fixture(voices(2));
    let samples: Vec<i16> = (0..200).map(|i| i as i16).collect();
    let raw = RawSource::seekable(Cursor::new(s16_bytes(&samples)), stereo(), 0, None).unwrap();
    let source = AudioSource::new(raw);

    let first = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap()
        .unwrap();
    mix(&f.mixer, 10);
    let second = f
        .mixer
        .play(PlayTarget::Voice(1), &source, PlayOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(source.voice_count(), 2);

    let acc = mix(&f.mixer, 2);
    // Voice 0 is at frame 10, voice 1 at frame 0.
    assert_eq!(acc, vec![20, 22, 24, 26]);
    assert_eq!(first.position(), 12);
    assert_eq!(second.position(), 2);
}

#[test]
fn test_tone_stops_after_one_second() {
    let f = fixture(voices(4));
    let tone = ToneGenerator::default().with_length(22050);
    assert_eq!(tone.sample_rate(), 22050);
    let source = AudioSource::new(tone);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap()
        .unwrap();

    for _ in 0..22 {
        mix(&f.mixer, 1000);
        assert_eq!(voice.status(), VoiceStatus::Playing);
    }
    let acc = mix(&f.mixer, 50);
    assert!(acc.iter().any(|&s| s != 0));
    assert_eq!(voice.position(), 22050);
    assert_eq!(voice.status(), VoiceStatus::Stopped);
}

#[test]
fn test_mono_source_fills_both_channels() {
    let f = fixture(voices(1));
    let mono = AudioFormat::new(22050, SampleEncoding::S16_NATIVE, 1).unwrap();
    let raw = RawSource::seekable(Cursor::new(s16_bytes(&[100, 200, 300])), mono, 0, None)
        .unwrap();
    let source = AudioSource::new(raw);
    f.mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap();
    let acc = mix(&f.mixer, 4);
    assert_eq!(acc, vec![100, 100, 200, 200, 300, 300, 0, 0]);
}

#[test]
fn test_rate_changes_consumption() {
    let f = fixture(voices(1));
    let source = constant(1000, 1000);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap()
        .unwrap();
    voice.set_rate(0.5).unwrap();
    let acc = mix(&f.mixer, 100);
    assert!(acc.iter().all(|&s| s == 1000));
    assert_eq!(voice.position(), 50);

    voice.set_rate(0.0).unwrap();
    assert!(mix(&f.mixer, 100).iter().all(|&s| s == 0));
    assert_eq!(voice.position(), 50);
    assert_eq!(voice.status(), VoiceStatus::Playing);
}

#[test]
fn test_set_position() {
    let f = fixture(voices(1));
    let samples: Vec<i16> = (0..200).map(|i| i as i16).collect();
    let raw = RawSource::seekable(Cursor::new(s16_bytes(&samples)), stereo(), 0, None).unwrap();
    let source = AudioSource::new(raw);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap()
        .unwrap();

    voice.set_position(50).unwrap();
    assert!(voice.set_position(101).is_err());
    let acc = mix(&f.mixer, 1);
    assert_eq!(acc, vec![100, 101]);
    assert_eq!(voice.position(), 51);
}

#[test]
fn test_mix_policy_and_master_volume() {
    let f = fixture(voices(2));
    let a = constant(100, 1000);
    let b = constant(100, 1000);
    f.mixer
        .play(PlayTarget::Voice(0), &a, PlayOptions::looping(INFINITE))
        .unwrap();
    f.mixer
        .play(PlayTarget::Voice(1), &b, PlayOptions::looping(INFINITE))
        .unwrap();

    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 2000));
    assert_eq!(f.mixer.active_voices(), 2);

    f.mixer.set_mix_policy(MixPolicy::Divide);
    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 1000));

    f.mixer.set_master_volume(128).unwrap();
    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 500));

    f.mixer.pause(Scope::Voice(1)).unwrap();
    assert_eq!(f.mixer.active_voices(), 1);
    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 500));
    f.mixer.resume(Scope::All).unwrap();
    assert_eq!(f.mixer.active_voices(), 2);
}

#[test]
fn test_pause_keeps_position() {
    let f = fixture(voices(1));
    let source = constant(100, 1000);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::default())
        .unwrap()
        .unwrap();
    mix(&f.mixer, 10);
    voice.pause();
    assert_eq!(voice.status(), VoiceStatus::Paused);
    assert!(mix(&f.mixer, 10).iter().all(|&s| s == 0));
    assert_eq!(voice.position(), 10);
    voice.resume();
    mix(&f.mixer, 10);
    assert_eq!(voice.position(), 20);
}

#[test]
fn test_timeout() {
    let f = fixture(voices(1));
    let source = constant(10, 1000);
    let options = PlayOptions {
        loops: INFINITE,
        timeout_ms: Some(100),
        ..Default::default()
    };
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, options)
        .unwrap()
        .unwrap();
    f.clock.set(99);
    mix(&f.mixer, FRAMES);
    assert_eq!(voice.status(), VoiceStatus::Playing);
    f.clock.set(100);
    assert!(mix(&f.mixer, FRAMES).iter().all(|&s| s == 0));
    assert_eq!(voice.status(), VoiceStatus::Stopped);
}

#[test]
fn test_groups() {
    let f = fixture(voices(4));
    let group = f.mixer.add_group();
    assert!(group.raw() <= -2);
    let other = f.mixer.add_group();
    assert_ne!(group, other);

    f.mixer.group_range(1, 2, group).unwrap();
    assert_eq!(f.mixer.group_size(group).unwrap(), 2);
    assert_eq!(f.mixer.group_voices(group).unwrap(), vec![1, 2]);

    f.mixer.group_voice(1, other).unwrap();
    assert_eq!(f.mixer.group_voices(other).unwrap(), vec![1]);
    f.mixer.ungroup_voice(1, group).unwrap();
    assert_eq!(f.mixer.group_voices(group).unwrap(), vec![2]);
    f.mixer.group_voice(3, group).unwrap();
    f.mixer.group_voice(3, group).unwrap();
    assert_eq!(f.mixer.group_voices(group).unwrap(), vec![2, 3]);

    let source = constant(10, 1000);
    let voice = f
        .mixer
        .play(PlayTarget::Group(group), &source, PlayOptions::looping(INFINITE))
        .unwrap()
        .unwrap();
    assert_eq!(voice.index(), 2);
    f.mixer
        .play(PlayTarget::Group(group), &source, PlayOptions::looping(INFINITE))
        .unwrap();
    assert!(f
        .mixer
        .play(PlayTarget::Group(group), &source, PlayOptions::default())
        .unwrap()
        .is_none());

    f.mixer.stop(Scope::Group(group)).unwrap();
    assert_eq!(f.mixer.active_voices(), 0);

    f.mixer.ungroup_voice(3, group).unwrap();
    assert_eq!(f.mixer.group_voices(group).unwrap(), vec![2]);
    assert!(matches!(
        f.mixer.ungroup_voice(4, group),
        Err(MixerError::InvalidVoice(4))
    ));
    assert!(matches!(
        f.mixer.group_voice(4, group),
        Err(MixerError::InvalidVoice(4))
    ));

    f.mixer.remove_group(group).unwrap();
    assert!(matches!(
        f.mixer.group_size(group),
        Err(MixerError::InvalidGroup(_))
    ));
    assert!(f
        .mixer
        .play(PlayTarget::Group(group), &source, PlayOptions::default())
        .is_err());
    assert!(f.mixer.remove_group(group).is_err());
    assert_eq!(f.mixer.add_group(), group);

    assert!(GroupId::from_raw(-1).is_err());
    assert!(GroupId::from_raw(0).is_err());
    assert_eq!(GroupId::from_raw(other.raw()).unwrap(), other);
}

#[test]
fn test_groups_overlap() {
    let f = fixture(voices(4));
    let drums = f.mixer.add_group();
    let loud = f.mixer.add_group();
    f.mixer.group_range(0, 3, drums).unwrap();
    f.mixer.group_voice(1, loud).unwrap();
    assert_eq!(f.mixer.group_voices(drums).unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(f.mixer.group_voices(loud).unwrap(), vec![1]);

    f.mixer.ungroup_voice(1, loud).unwrap();
    assert_eq!(f.mixer.group_voices(drums).unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(f.mixer.group_size(loud).unwrap(), 0);
}

#[test]
fn test_group_play_skips_reserved_voices() {
    let f = fixture(MixerSettings {
        voices: 3,
        reserved_voices: 1,
        play_policy: PlayPolicy::Oldest,
        ..Default::default()
    });
    let group = f.mixer.add_group();
    f.mixer.group_range(0, 2, group).unwrap();
    let source = constant(10, 1000);

    let mut chosen = Vec::new();
    for clock in 0..4 {
        f.clock.set(clock * 10);
        let voice = f
            .mixer
            .play(PlayTarget::Group(group), &source, PlayOptions::looping(INFINITE))
            .unwrap()
            .unwrap();
        chosen.push(voice.index());
    }
    assert_eq!(chosen, vec![1, 2, 1, 2]);
    assert_eq!(f.mixer.voice(0).unwrap().status(), VoiceStatus::Stopped);

    let only_reserved = f.mixer.add_group();
    f.mixer.group_voice(0, only_reserved).unwrap();
    assert!(f
        .mixer
        .play(PlayTarget::Group(only_reserved), &source, PlayOptions::default())
        .unwrap()
        .is_none());
}

#[test]
fn test_allocate_voices() {
    let f = fixture(voices(4));
    let group = f.mixer.add_group();
    f.mixer.group_range(0, 3, group).unwrap();
    let source = constant(10, 1000);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(3), &source, PlayOptions::looping(INFINITE))
        .unwrap()
        .unwrap();
    f.mixer.voice(0).unwrap().set_volume(10, 10).unwrap();
    assert_eq!(f.mixer.reserve_voices(3), 3);

    f.mixer.allocate_voices(2, false);
    assert_eq!(f.mixer.voice_count(), 2);
    assert_eq!(f.mixer.reserved_voices(), 2);
    assert_eq!(voice.status(), VoiceStatus::Stopped);
    assert_eq!(source.voice_count(), 0);
    assert_eq!(finished(&f.events), vec![3]);
    assert_eq!(f.mixer.group_voices(group).unwrap(), vec![0, 1]);
    assert_eq!(f.mixer.voice(0).unwrap().volume(), (10, 10));

    f.mixer.allocate_voices(3, true);
    assert_eq!(f.mixer.voice_count(), 3);
    assert_eq!(f.mixer.voice(0).unwrap().volume(), (MAX_VOLUME, MAX_VOLUME));
}

#[test]
fn test_filters() {
    let f = fixture(voices(1));
    let source = constant(100, 1000);
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::looping(INFINITE))
        .unwrap()
        .unwrap();

    let mut chain = voice.filters();
    chain.push(BiquadFilter::new([0.5, 0.0, 0.0, 0.0, 0.0]));
    assert!(voice.set_filters(chain).is_empty());
    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 500));
    assert_eq!(voice.filters().len(), 1);

    let mut chain = f.mixer.pre_filters();
    chain.push(BiquadFilter::new([0.5, 0.0, 0.0, 0.0, 0.0]));
    f.mixer.set_pre_filters(chain);
    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 250));

    let mut chain = f.mixer.post_filters();
    chain.push(BiquadFilter::new([2.0, 0.0, 0.0, 0.0, 0.0]));
    f.mixer.set_post_filters(chain);
    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 500));

    let previous = f.mixer.set_post_filters(FilterChain::default());
    assert_eq!(previous.len(), 1);
    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 250));
}

#[test]
fn test_filter_edits_do_not_hold_the_mixer() {
    let f = fixture(voices(1));
    let source = constant(100, 1000);
    f.mixer
        .play(PlayTarget::Voice(0), &source, PlayOptions::looping(INFINITE))
        .unwrap();

    // A chain being edited is a private copy; mixing carries on with the installed one.
    let mut pending = f.mixer.post_filters();
    pending.push(BiquadFilter::new([0.5, 0.0, 0.0, 0.0, 0.0]));
    let mixer = &f.mixer;
    thread::scope(|scope| {
        scope
            .spawn(|| assert!(mix(mixer, 8).iter().all(|&s| s == 1000)))
            .join()
            .unwrap();
    });

    f.mixer.set_post_filters(pending);
    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 500));
}

struct PanickingDecoder;

impl Decoder for PanickingDecoder {
    fn channels(&self) -> u8 {
        2
    }

    fn sample_rate(&self) -> u32 {
        22050
    }

    fn total_frames(&self) -> Option<u64> {
        None
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn seek(&mut self, _frame: u64) -> Result<(), SourceError> {
        Err(SourceError::NotSeekable)
    }

    fn read(&mut self, _out: &mut [i16]) -> Result<usize, SourceError> {
        panic!("decoder exploded");
    }
}

struct FailingDecoder;

impl Decoder for FailingDecoder {
    fn channels(&self) -> u8 {
        2
    }

    fn sample_rate(&self) -> u32 {
        22050
    }

    fn total_frames(&self) -> Option<u64> {
        None
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn seek(&mut self, _frame: u64) -> Result<(), SourceError> {
        Err(SourceError::NotSeekable)
    }

    fn read(&mut self, _out: &mut [i16]) -> Result<usize, SourceError> {
        Err(SourceError::Decoder("corrupt packet".to_string()))
    }
}

#[test]
fn test_panicking_voice_is_reported() {
    let f = fixture(voices(2));
    let broken = AudioSource::new(DecodedSource::new(PanickingDecoder).unwrap());
    let healthy = constant(100, 1000);
    f.mixer
        .play(PlayTarget::Voice(0), &broken, PlayOptions::default())
        .unwrap();
    f.mixer
        .play(PlayTarget::Voice(1), &healthy, PlayOptions::default())
        .unwrap();

    let acc = mix(&f.mixer, 8);
    assert!(acc.iter().all(|&s| s == 1000));
    let faults: Vec<MixerEvent> = f.events.try_iter().collect();
    assert_eq!(
        faults,
        vec![MixerEvent::Fault {
            voice: Some(0),
            message: "decoder exploded".to_string()
        }]
    );
}

#[test]
fn test_read_error_ends_voice() {
    let f = fixture(voices(1));
    let broken = AudioSource::new(DecodedSource::new(FailingDecoder).unwrap());
    let voice = f
        .mixer
        .play(PlayTarget::Voice(0), &broken, PlayOptions::default())
        .unwrap()
        .unwrap();

    assert!(mix(&f.mixer, 8).iter().all(|&s| s == 0));
    assert_eq!(voice.status(), VoiceStatus::Stopped);
    let events: Vec<MixerEvent> = f.events.try_iter().collect();
    assert!(matches!(
        events.as_slice(),
        [
            MixerEvent::SourceFault { voice: 0, .. },
            MixerEvent::VoiceFinished { voice: 0 }
        ]
    ));
}

#[test]
fn test_mixing_thread() {
    let (sink, _events) = EventSink::bounded(64);
    let mixer = Arc::new(
        Mixer::new(stereo(), 256, &voices(2), Arc::new(SystemClock::new()), sink).unwrap(),
    );
    let source = constant(2000, 1000);
    let voice = mixer
        .play(PlayTarget::Free, &source, PlayOptions::default())
        .unwrap()
        .unwrap();

    let pump = {
        let mixer = mixer.clone();
        thread::spawn(move || {
            let mut acc = Vec::new();
            let mut out = vec![0u8; 256 * 4];
            for _ in 0..100 {
                mixer.render_into(&mut acc, &mut out, 256);
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    eventually(
        || voice.status() == VoiceStatus::Stopped,
        "voice never finished",
    );
    pump.join().unwrap();
    assert_eq!(source.voice_count(), 0);
}
