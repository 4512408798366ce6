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
//! The voice pool and the real-time mixing callback.
//!
//! Each voice sits behind its own lock. The pool itself is an immutable snapshot that is
//! swapped out whole by [`Mixer::allocate_voices`], so the callback only clones an `Arc`
//! to walk it. Groups and the reserved count share one structural lock that the callback
//! never takes.

use std::{
    any::Any,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    str::FromStr,
    sync::{
        atomic::{AtomicU16, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::{
    clock::Clock,
    convert,
    error::MixerError,
    events::{EventSink, MixerEvent},
    filter::FilterChain,
    format::AudioFormat,
    source::AudioSource,
    voice::{Fade, PlayOptions, Voice, VoiceStatus},
    MAX_VOLUME,
};

#[cfg(test)]
mod tests;

/// What to do when no voice is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayPolicy {
    /// Refuse to play.
    #[default]
    Fail,
    /// Take the voice that has been playing the longest.
    Oldest,
    /// Take the voice with the lowest priority.
    Priority,
    /// Take the oldest voice among those with the lowest priority.
    OldestPriority,
}

impl FromStr for PlayPolicy {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fail" => Ok(PlayPolicy::Fail),
            "oldest" => Ok(PlayPolicy::Oldest),
            "priority" => Ok(PlayPolicy::Priority),
            "oldest_priority" => Ok(PlayPolicy::OldestPriority),
            _ => Err(MixerError::InvalidArgument {
                name: "play_policy",
                reason: "expected fail, oldest, priority or oldest_priority",
            }),
        }
    }
}

/// How the mixed voices are scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixPolicy {
    /// Sum the voices and clip.
    #[default]
    DontDivide,
    /// Divide the sum by the number of voices that played.
    Divide,
}

impl FromStr for MixPolicy {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "dont_divide" => Ok(MixPolicy::DontDivide),
            "divide" => Ok(MixPolicy::Divide),
            _ => Err(MixerError::InvalidArgument {
                name: "mix_policy",
                reason: "expected divide or dont_divide",
            }),
        }
    }
}

/// Identifies a group of voices. Always negative, so it can never be mistaken for a
/// voice index or for the free voice sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(i32);

impl GroupId {
    fn from_slot(slot: usize) -> GroupId {
        GroupId(-(slot as i32) - 2)
    }

    fn slot(self) -> Option<usize> {
        (self.0 <= -2).then(|| (-(self.0 + 2)) as usize)
    }

    /// Rebuilds a group id from its raw value.
    pub fn from_raw(raw: i32) -> Result<GroupId, MixerError> {
        if raw <= -2 {
            Ok(GroupId(raw))
        } else {
            Err(MixerError::InvalidGroup(raw))
        }
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where [`Mixer::play`] should put a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayTarget {
    /// Exactly this voice, stopping whatever it is playing.
    Voice(usize),
    /// Any unreserved voice, subject to the play policy.
    Free,
    /// Any voice of the group, subject to the play policy.
    Group(GroupId),
}

/// The voices a control operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Voice(usize),
    Group(GroupId),
}

/// Pool settings applied when a mixer is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerSettings {
    pub voices: usize,
    pub reserved_voices: usize,
    pub play_policy: PlayPolicy,
    pub mix_policy: MixPolicy,
    pub master_volume: u16,
}

impl Default for MixerSettings {
    fn default() -> Self {
        MixerSettings {
            voices: 8,
            reserved_voices: 0,
            play_policy: PlayPolicy::Fail,
            mix_policy: MixPolicy::DontDivide,
            master_volume: MAX_VOLUME,
        }
    }
}

type VoicePool = Arc<[Arc<Mutex<Voice>>]>;

struct Structure {
    groups: Vec<Option<Vec<usize>>>,
}

impl Structure {
    fn group(&self, group: GroupId) -> Result<&Vec<usize>, MixerError> {
        group
            .slot()
            .and_then(|slot| self.groups.get(slot))
            .and_then(Option::as_ref)
            .ok_or(MixerError::InvalidGroup(group.raw()))
    }

    fn group_mut(&mut self, group: GroupId) -> Result<&mut Vec<usize>, MixerError> {
        group
            .slot()
            .and_then(|slot| self.groups.get_mut(slot))
            .and_then(Option::as_mut)
            .ok_or(MixerError::InvalidGroup(group.raw()))
    }
}

/// The voice pool and mixing callback of an initialized engine.
pub struct Mixer {
    format: AudioFormat,
    max_frames: usize,
    clock: Arc<dyn Clock>,
    events: EventSink,
    voices: RwLock<VoicePool>,
    structure: Mutex<Structure>,
    reserved: AtomicUsize,
    play_policy: AtomicU8,
    mix_policy: AtomicU8,
    master_volume: AtomicU16,
    pre_filters: Mutex<FilterChain>,
    post_filters: Mutex<FilterChain>,
}

impl Mixer {
    /// Creates a mixer for the given output format. `max_frames` is the largest number of
    /// frames mixed in one pass; voice scratch space is sized from it.
    pub fn new(
        format: AudioFormat,
        max_frames: usize,
        settings: &MixerSettings,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Result<Mixer, MixerError> {
        format.validate()?;
        if max_frames == 0 {
            return Err(MixerError::InvalidArgument {
                name: "max_frames",
                reason: "must be positive",
            });
        }
        if settings.master_volume > MAX_VOLUME {
            return Err(MixerError::InvalidVolume(settings.master_volume));
        }

        let mixer = Mixer {
            format,
            max_frames,
            clock,
            events,
            voices: RwLock::new(Arc::from(Vec::new())),
            structure: Mutex::new(Structure { groups: Vec::new() }),
            reserved: AtomicUsize::new(0),
            play_policy: AtomicU8::new(settings.play_policy as u8),
            mix_policy: AtomicU8::new(settings.mix_policy as u8),
            master_volume: AtomicU16::new(settings.master_volume),
            pre_filters: Mutex::new(FilterChain::default()),
            post_filters: Mutex::new(FilterChain::default()),
        };
        mixer.allocate_voices(settings.voices, false);
        mixer.reserve_voices(settings.reserved_voices);
        Ok(mixer)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    fn pool(&self) -> VoicePool {
        self.voices.read().clone()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.read().len()
    }

    /// Resizes the pool to `count` voices. Voices past the new end are stopped and drop out
    /// of their groups. With `reset`, surviving voices are stopped and restored to defaults.
    pub fn allocate_voices(&self, count: usize, reset: bool) {
        let mut structure = self.structure.lock();
        let current = self.pool();

        for voice in current.iter().skip(count) {
            voice.lock().stop();
        }
        let mut voices: Vec<Arc<Mutex<Voice>>> = current.iter().take(count).cloned().collect();
        if reset {
            for voice in voices.iter() {
                voice.lock().reset();
            }
        }
        for index in voices.len()..count {
            voices.push(Arc::new(Mutex::new(Voice::new(
                index,
                self.format,
                self.max_frames,
                self.clock.clone(),
                self.events.clone(),
            ))));
        }

        for members in structure.groups.iter_mut().flatten() {
            members.retain(|&member| member < count);
        }
        let reserved = self.reserved.load(Ordering::Acquire);
        self.reserved.store(reserved.min(count), Ordering::Release);

        *self.voices.write() = Arc::from(voices);
        drop(structure);
        info!(voices = count, reset, "Allocated voices");
    }

    /// Keeps the first `count` voices out of free allocation. Returns the number reserved.
    pub fn reserve_voices(&self, count: usize) -> usize {
        let _structure = self.structure.lock();
        let count = count.min(self.voice_count());
        self.reserved.store(count, Ordering::Release);
        count
    }

    pub fn reserved_voices(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    pub fn play_policy(&self) -> PlayPolicy {
        match self.play_policy.load(Ordering::Acquire) {
            1 => PlayPolicy::Oldest,
            2 => PlayPolicy::Priority,
            3 => PlayPolicy::OldestPriority,
            _ => PlayPolicy::Fail,
        }
    }

    pub fn set_play_policy(&self, policy: PlayPolicy) {
        self.play_policy.store(policy as u8, Ordering::Release);
    }

    pub fn mix_policy(&self) -> MixPolicy {
        match self.mix_policy.load(Ordering::Acquire) {
            1 => MixPolicy::Divide,
            _ => MixPolicy::DontDivide,
        }
    }

    pub fn set_mix_policy(&self, policy: MixPolicy) {
        self.mix_policy.store(policy as u8, Ordering::Release);
    }

    pub fn master_volume(&self) -> u16 {
        self.master_volume.load(Ordering::Acquire)
    }

    pub fn set_master_volume(&self, volume: u16) -> Result<(), MixerError> {
        if volume > MAX_VOLUME {
            return Err(MixerError::InvalidVolume(volume));
        }
        self.master_volume.store(volume, Ordering::Release);
        Ok(())
    }

    /// A copy of the filters applied to each voice after its own filters.
    pub fn pre_filters(&self) -> FilterChain {
        self.pre_filters.lock().clone()
    }

    /// Swaps in `chain` as the voice pre-filters and returns the previous chain. The
    /// callback only waits for the swap itself.
    pub fn set_pre_filters(&self, chain: FilterChain) -> FilterChain {
        mem::replace(&mut *self.pre_filters.lock(), chain)
    }

    /// A copy of the filters applied to the mixed output.
    pub fn post_filters(&self) -> FilterChain {
        self.post_filters.lock().clone()
    }

    /// Swaps in `chain` as the output filters and returns the previous chain.
    pub fn set_post_filters(&self, chain: FilterChain) -> FilterChain {
        mem::replace(&mut *self.post_filters.lock(), chain)
    }

    pub fn voice(&self, index: usize) -> Result<VoiceHandle, MixerError> {
        self.pool()
            .get(index)
            .map(|voice| VoiceHandle {
                index,
                voice: voice.clone(),
            })
            .ok_or(MixerError::InvalidVoice(index))
    }

    /// Plays `source` on the voice chosen by `target`. Returns `Ok(None)` when no voice
    /// could be found under the current play policy.
    pub fn play(
        &self,
        target: PlayTarget,
        source: &Arc<AudioSource>,
        options: PlayOptions,
    ) -> Result<Option<VoiceHandle>, MixerError> {
        let structure = self.structure.lock();
        let pool = self.pool();
        let index = match target {
            PlayTarget::Voice(index) => {
                if index >= pool.len() {
                    return Err(MixerError::InvalidVoice(index));
                }
                Some(index)
            }
            PlayTarget::Free => {
                let reserved = self.reserved_voices();
                self.choose_voice(&pool, reserved..pool.len())
            }
            PlayTarget::Group(group) => {
                let reserved = self.reserved_voices();
                let members = structure.group(group)?;
                self.choose_voice(
                    &pool,
                    members.iter().copied().filter(move |&index| index >= reserved),
                )
            }
        };

        let Some(index) = index else {
            debug!(?target, "No voice available");
            return Ok(None);
        };
        let voice = pool[index].clone();
        voice.lock().start_playing(source.clone(), options)?;
        drop(structure);
        Ok(Some(VoiceHandle { index, voice }))
    }

    /// Picks the first stopped voice among `candidates`, falling back to the play policy.
    fn choose_voice<I>(&self, pool: &VoicePool, candidates: I) -> Option<usize>
    where
        I: Iterator<Item = usize> + Clone,
    {
        for index in candidates.clone() {
            if pool
                .get(index)
                .is_some_and(|voice| voice.lock().status() == VoiceStatus::Stopped)
            {
                return Some(index);
            }
        }

        let policy = self.play_policy();
        if policy == PlayPolicy::Fail {
            return None;
        }

        // (index, priority, age) of every candidate.
        let stats = candidates.filter_map(|index| {
            pool.get(index).map(|voice| {
                let voice = voice.lock();
                (index, voice.priority(), voice.age())
            })
        });
        let mut best: Option<(usize, i32, u64)> = None;
        for candidate in stats {
            let better = match best {
                None => true,
                Some((_, priority, age)) => match policy {
                    PlayPolicy::Oldest => candidate.2 > age,
                    PlayPolicy::Priority => candidate.1 < priority,
                    _ => candidate.1 < priority || (candidate.1 == priority && candidate.2 > age),
                },
            };
            if better {
                best = Some(candidate);
            }
        }
        best.map(|(index, _, _)| index)
    }

    /// Creates an empty group.
    pub fn add_group(&self) -> GroupId {
        let mut structure = self.structure.lock();
        let slot = match structure.groups.iter().position(Option::is_none) {
            Some(slot) => {
                structure.groups[slot] = Some(Vec::new());
                slot
            }
            None => {
                structure.groups.push(Some(Vec::new()));
                structure.groups.len() - 1
            }
        };
        GroupId::from_slot(slot)
    }

    pub fn remove_group(&self, group: GroupId) -> Result<(), MixerError> {
        let mut structure = self.structure.lock();
        structure.group(group)?;
        if let Some(slot) = group.slot() {
            structure.groups[slot] = None;
        }
        Ok(())
    }

    /// Adds `voice` to `group`. Membership in other groups is unaffected.
    pub fn group_voice(&self, voice: usize, group: GroupId) -> Result<(), MixerError> {
        self.group_range(voice, voice, group)
    }

    /// Adds voices `from..=to` to `group`.
    pub fn group_range(&self, from: usize, to: usize, group: GroupId) -> Result<(), MixerError> {
        let mut structure = self.structure.lock();
        let count = self.voice_count();
        if from > to {
            return Err(MixerError::InvalidArgument {
                name: "from",
                reason: "must not be greater than to",
            });
        }
        if to >= count {
            return Err(MixerError::InvalidVoice(to));
        }
        let members = structure.group_mut(group)?;
        members.extend(from..=to);
        members.sort_unstable();
        members.dedup();
        Ok(())
    }

    /// Removes `voice` from `group`, leaving its other groups alone.
    pub fn ungroup_voice(&self, voice: usize, group: GroupId) -> Result<(), MixerError> {
        let mut structure = self.structure.lock();
        if voice >= self.voice_count() {
            return Err(MixerError::InvalidVoice(voice));
        }
        structure
            .group_mut(group)?
            .retain(|&member| member != voice);
        Ok(())
    }

    pub fn group_size(&self, group: GroupId) -> Result<usize, MixerError> {
        Ok(self.structure.lock().group(group)?.len())
    }

    pub fn group_voices(&self, group: GroupId) -> Result<Vec<usize>, MixerError> {
        Ok(self.structure.lock().group(group)?.clone())
    }

    fn scope_voices(&self, scope: Scope) -> Result<Vec<Arc<Mutex<Voice>>>, MixerError> {
        let pool = self.pool();
        match scope {
            Scope::All => Ok(pool.to_vec()),
            Scope::Voice(index) => pool
                .get(index)
                .map(|voice| vec![voice.clone()])
                .ok_or(MixerError::InvalidVoice(index)),
            Scope::Group(group) => Ok(self
                .group_voices(group)?
                .into_iter()
                .filter_map(|index| pool.get(index).cloned())
                .collect()),
        }
    }

    /// The playing voice with the greatest age in `scope`.
    pub fn oldest_voice(
        &self,
        scope: Scope,
        include_reserved: bool,
    ) -> Result<Option<usize>, MixerError> {
        let reserved = if include_reserved {
            0
        } else {
            self.reserved_voices()
        };
        let mut oldest: Option<(usize, u64)> = None;
        for voice in self.scope_voices(scope)? {
            let voice = voice.lock();
            if voice.status() == VoiceStatus::Stopped || voice.index() < reserved {
                continue;
            }
            let age = voice.age();
            if oldest.map_or(true, |(_, best)| age > best) {
                oldest = Some((voice.index(), age));
            }
        }
        Ok(oldest.map(|(index, _)| index))
    }

    pub fn fade_out(&self, scope: Scope, ms: u64) -> Result<(), MixerError> {
        for voice in self.scope_voices(scope)? {
            voice.lock().fade_out(ms);
        }
        Ok(())
    }

    pub fn pause(&self, scope: Scope) -> Result<(), MixerError> {
        for voice in self.scope_voices(scope)? {
            voice.lock().pause();
        }
        Ok(())
    }

    pub fn resume(&self, scope: Scope) -> Result<(), MixerError> {
        for voice in self.scope_voices(scope)? {
            voice.lock().resume();
        }
        Ok(())
    }

    pub fn stop(&self, scope: Scope) -> Result<(), MixerError> {
        for voice in self.scope_voices(scope)? {
            voice.lock().stop();
        }
        Ok(())
    }

    /// The number of voices currently playing.
    pub fn active_voices(&self) -> usize {
        self.pool()
            .iter()
            .filter(|voice| voice.lock().is_playing())
            .count()
    }

    /// The mixing callback. Adds every playing voice into `acc`, an interleaved accumulator
    /// in the output format, then applies post filters, the mix policy and the master volume.
    ///
    /// `acc` is expected to be zeroed by the caller. A panic is reported through the event
    /// sink instead of unwinding into the driver.
    pub fn mix(&self, acc: &mut [i32]) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let chunk = self.max_frames * usize::from(self.format.channels);
            for acc in acc.chunks_mut(chunk) {
                self.mix_chunk(acc);
            }
        }));
        if let Err(payload) = result {
            self.fault(None, payload.as_ref());
        }
    }

    fn mix_chunk(&self, acc: &mut [i32]) {
        let pool = self.pool();
        let mut pre_filters = self.pre_filters.lock();
        let mut active = 0;
        for (index, voice) in pool.iter().enumerate() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut voice = voice.lock();
                if !voice.is_playing() {
                    return false;
                }
                voice.mix(acc, &mut pre_filters);
                true
            }));
            match result {
                Ok(true) => active += 1,
                Ok(false) => {}
                Err(payload) => self.fault(Some(index), payload.as_ref()),
            }
        }
        drop(pre_filters);

        self.post_filters.lock().mix_filter(acc, &self.format);
        if self.mix_policy() == MixPolicy::Divide {
            convert::divide_accumulator(acc, active);
        }
        convert::volume_scale(acc, self.master_volume());
    }

    /// Mixes `frames` frames and writes them to `out` in the output encoding, using `acc`
    /// as scratch. Returns the bytes written.
    pub fn render_into(&self, acc: &mut Vec<i32>, out: &mut [u8], frames: usize) -> usize {
        let samples = frames * usize::from(self.format.channels);
        acc.clear();
        acc.resize(samples, 0);
        self.mix(acc);
        convert::convert_accumulator(out, acc, self.format.encoding)
    }

    /// Mixes `frames` frames into a new buffer in the output encoding.
    pub fn render(&self, frames: usize) -> Vec<u8> {
        let mut acc = Vec::new();
        let mut out = vec![0u8; frames * self.format.frame_size()];
        let written = self.render_into(&mut acc, &mut out, frames);
        out.truncate(written);
        out
    }

    fn fault(&self, voice: Option<usize>, payload: &(dyn Any + Send)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(?voice, panic = %message, "Panic in mixing callback");
        self.events.send(MixerEvent::Fault { voice, message });
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("format", &self.format)
            .field("max_frames", &self.max_frames)
            .field("voices", &self.voice_count())
            .field("reserved", &self.reserved_voices())
            .finish()
    }
}

/// A client handle to one voice of the pool.
#[derive(Clone)]
pub struct VoiceHandle {
    index: usize,
    voice: Arc<Mutex<Voice>>,
}

impl VoiceHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Plays `source` on this voice, replacing whatever it was playing.
    pub fn play(&self, source: &Arc<AudioSource>, options: PlayOptions) -> Result<(), MixerError> {
        self.voice.lock().start_playing(source.clone(), options)
    }

    pub fn stop(&self) {
        self.voice.lock().stop();
    }

    pub fn pause(&self) {
        self.voice.lock().pause();
    }

    pub fn resume(&self) {
        self.voice.lock().resume();
    }

    pub fn fade_out(&self, ms: u64) {
        self.voice.lock().fade_out(ms);
    }

    pub fn status(&self) -> VoiceStatus {
        self.voice.lock().status()
    }

    pub fn volume(&self) -> (u16, u16) {
        self.voice.lock().volume()
    }

    pub fn set_volume(&self, left: u16, right: u16) -> Result<(), MixerError> {
        self.voice.lock().set_volume(left, right)
    }

    pub fn rate(&self) -> f32 {
        self.voice.lock().rate()
    }

    pub fn set_rate(&self, rate: f32) -> Result<(), MixerError> {
        self.voice.lock().set_rate(rate)
    }

    pub fn position(&self) -> u64 {
        self.voice.lock().position()
    }

    pub fn set_position(&self, frame: u64) -> Result<(), MixerError> {
        self.voice.lock().set_position(frame)
    }

    pub fn fade(&self) -> Fade {
        self.voice.lock().fade()
    }

    pub fn age(&self) -> u64 {
        self.voice.lock().age()
    }

    pub fn priority(&self) -> i32 {
        self.voice.lock().priority()
    }

    pub fn set_priority(&self, priority: i32) {
        self.voice.lock().set_priority(priority);
    }

    pub fn source(&self) -> Option<Arc<AudioSource>> {
        self.voice.lock().source().cloned()
    }

    pub fn sampled_volume(&self) -> (u16, u16) {
        self.voice.lock().sampled_volume()
    }

    /// A copy of the voice's own filters.
    pub fn filters(&self) -> FilterChain {
        self.voice.lock().filters().clone()
    }

    /// Swaps in `chain` as the voice's own filters and returns the previous chain.
    pub fn set_filters(&self, chain: FilterChain) -> FilterChain {
        self.voice.lock().set_filters(chain)
    }
}

impl fmt::Debug for VoiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoiceHandle({})", self.index)
    }
}
