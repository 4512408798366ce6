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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the output callback thread when VOXMIX_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

/// Reads VOXMIX_THREAD_PRIORITY (0-99) once, before the stream is built, so the callback
/// never touches the environment.
pub fn callback_thread_priority() -> ThreadPriority {
    parse_priority(std::env::var("VOXMIX_THREAD_PRIORITY").ok().as_deref())
}

fn parse_priority(value: Option<&str>) -> ThreadPriority {
    value
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|&n| n < 100)
        .and_then(|n| ThreadPriorityValue::try_from(n).ok())
        .or_else(|| ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).ok())
        .map_or(ThreadPriority::Max, ThreadPriority::Crossplatform)
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Whether to attempt RT (SCHED_FIFO) scheduling for the output callback thread.
/// Enabled unless VOXMIX_DISABLE_RT_AUDIO is set.
pub fn rt_audio_enabled() -> bool {
    !env_flag("VOXMIX_DISABLE_RT_AUDIO")
}

/// Raises the priority of the calling thread once; later calls are no-ops.
pub fn configure_audio_thread_priority(
    tp: ThreadPriority,
    rt_audio: bool,
    priority_set: &mut bool,
) {
    if *priority_set {
        return;
    }
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        match set_thread_priority_and_policy(
            thread_native_id(),
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => info!("Enabled RT SCHED_FIFO for output callback thread"),
            Err(e) => warn!(err = %e, "Failed to set RT SCHED_FIFO for output callback thread"),
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;

    *priority_set = true;
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_parse_priority() {
        let default = ThreadPriority::Crossplatform(
            ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).unwrap(),
        );
        assert_eq!(parse_priority(None), default);
        assert_eq!(parse_priority(Some("junk")), default);
        assert_eq!(parse_priority(Some("100")), default);
        assert_eq!(
            parse_priority(Some(" 42 ")),
            ThreadPriority::Crossplatform(ThreadPriorityValue::try_from(42u8).unwrap())
        );
    }

    #[test]
    #[serial]
    fn test_rt_audio_flag() {
        std::env::remove_var("VOXMIX_DISABLE_RT_AUDIO");
        assert!(rt_audio_enabled());
        std::env::set_var("VOXMIX_DISABLE_RT_AUDIO", "yes");
        assert!(!rt_audio_enabled());
        std::env::set_var("VOXMIX_DISABLE_RT_AUDIO", "0");
        assert!(rt_audio_enabled());
        std::env::remove_var("VOXMIX_DISABLE_RT_AUDIO");
    }
}
