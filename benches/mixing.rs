use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use voxmix::audio::{
    clock::ManualClock,
    filter::graphic,
    source::{ToneGenerator, ToneKind},
    AudioFormat, AudioSource, EventSink, Mixer, MixerSettings, PlayOptions, PlayTarget,
    SampleEncoding, INFINITE,
};

const FRAMES: usize = 1024;

fn mixer(voices: usize, tone_rate: u32) -> Mixer {
    let format = AudioFormat::new(44100, SampleEncoding::S16_NATIVE, 2).unwrap();
    let settings = MixerSettings {
        voices,
        ..Default::default()
    };
    let (sink, _events) = EventSink::bounded(16);
    let mixer = Mixer::new(
        format,
        FRAMES,
        &settings,
        Arc::new(ManualClock::new(0)),
        sink,
    )
    .unwrap();

    let kinds = [ToneKind::Sine, ToneKind::Square, ToneKind::Saw, ToneKind::Triangle];
    for voice in 0..voices {
        let tone = ToneGenerator::new(
            kinds[voice % kinds.len()],
            220.0 * (voice + 1) as f32,
            tone_rate,
        )
        .unwrap();
        mixer
            .play(
                PlayTarget::Voice(voice),
                &AudioSource::new(tone),
                PlayOptions::looping(INFINITE),
            )
            .unwrap();
    }
    mixer
}

fn benchmark_mix(c: &mut Criterion) {
    let mut group = c.benchmark_group("mix");

    for voices in [1, 4, 16] {
        for (name, rate) in [("native", 44100), ("converted", 22050)] {
            let mixer = mixer(voices, rate);
            let mut acc = vec![0i32; FRAMES * 2];
            group.bench_with_input(BenchmarkId::new(name, voices), &voices, |b, _| {
                b.iter(|| {
                    acc.fill(0);
                    mixer.mix(black_box(&mut acc));
                })
            });
        }
    }

    group.finish();
}

fn benchmark_filtered(c: &mut Criterion) {
    let mixer = mixer(4, 44100);
    let mut equalizer = graphic::equalizer(10).unwrap();
    for band in 0..10 {
        if let Some(eq) = equalizer.band_mut(band) {
            eq.set_gain(if band % 2 == 0 { 6.0 } else { -6.0 }).unwrap();
        }
    }
    mixer.set_post_filters(equalizer);

    let mut out = vec![0u8; FRAMES * 4];
    let mut acc = Vec::new();
    c.bench_function("render_with_equalizer", |b| {
        b.iter(|| black_box(mixer.render_into(&mut acc, &mut out, FRAMES)))
    });
}

criterion_group!(benches, benchmark_mix, benchmark_filtered);
criterion_main!(benches);
