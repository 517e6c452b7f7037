//! Sliding-window rate limiting per (user, channel).
//!
//! One mutex guards the whole window map so the cap check and the increment
//! are a single critical section; concurrent `send_message` calls cannot slip
//! past a cap between test and record. The check is fail-closed across the
//! whole eligible channel set: any violated cap rejects the call before any
//! channel is recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use courier_contract::Channel;

/// Window length for every per-channel cap.
pub const RATE_LIMIT_WINDOW_MS: u64 = 60 * 60 * 1_000;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
/// Hourly per-channel dispatch caps for one user.
pub struct RateLimitCaps {
    pub email: u32,
    pub push: u32,
    pub whatsapp: u32,
    pub sms: u32,
    pub inapp: u32,
}

impl Default for RateLimitCaps {
    fn default() -> Self {
        Self {
            email: 50,
            push: 100,
            whatsapp: 10,
            sms: 20,
            inapp: 200,
        }
    }
}

impl RateLimitCaps {
    pub fn cap_for(&self, channel: Channel) -> u32 {
        match channel {
            Channel::Email => self.email,
            Channel::Push => self.push,
            Channel::Whatsapp => self.whatsapp,
            Channel::Sms => self.sms,
            Channel::Inapp => self.inapp,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Cap violation raised before any delivery record is created.
pub struct RateLimitExceeded {
    pub user_id: String,
    pub channel: Channel,
    pub cap_per_hour: u32,
}

impl std::fmt::Display for RateLimitExceeded {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "rate limit exceeded for user '{}' on channel {}: cap {} per hour",
            self.user_id,
            self.channel.as_str(),
            self.cap_per_hour
        )
    }
}

impl std::error::Error for RateLimitExceeded {}

#[derive(Debug, Default)]
/// Process-local sliding-window limiter keyed by (user, channel).
pub struct SlidingWindowRateLimiter {
    caps: RateLimitCaps,
    windows: Mutex<HashMap<(String, Channel), VecDeque<u64>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(caps: RateLimitCaps) -> Self {
        Self {
            caps,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically checks every channel's cap and records the send.
    ///
    /// Nothing is recorded when any channel is over cap, so a rejected call
    /// does not consume budget.
    pub fn check_and_record(
        &self,
        user_id: &str,
        channels: &[Channel],
        now_unix_ms: u64,
    ) -> Result<(), RateLimitExceeded> {
        let mut windows = match self.windows.lock() {
            Ok(windows) => windows,
            // A poisoned lock means a panic mid-check; failing closed keeps
            // caps enforceable.
            Err(_) => {
                return Err(RateLimitExceeded {
                    user_id: user_id.to_string(),
                    channel: channels.first().copied().unwrap_or(Channel::Inapp),
                    cap_per_hour: 0,
                })
            }
        };
        let floor = now_unix_ms.saturating_sub(RATE_LIMIT_WINDOW_MS);

        for &channel in channels {
            let key = (user_id.to_string(), channel);
            if let Some(window) = windows.get_mut(&key) {
                while window.front().is_some_and(|&stamp| stamp <= floor) {
                    window.pop_front();
                }
                if window.len() as u32 >= self.caps.cap_for(channel) {
                    return Err(RateLimitExceeded {
                        user_id: user_id.to_string(),
                        channel,
                        cap_per_hour: self.caps.cap_for(channel),
                    });
                }
            }
        }
        for &channel in channels {
            windows
                .entry((user_id.to_string(), channel))
                .or_default()
                .push_back(now_unix_ms);
        }
        Ok(())
    }

    /// Current in-window count, for diagnostics.
    pub fn window_depth(&self, user_id: &str, channel: Channel, now_unix_ms: u64) -> usize {
        let floor = now_unix_ms.saturating_sub(RATE_LIMIT_WINDOW_MS);
        self.windows
            .lock()
            .ok()
            .and_then(|windows| {
                windows
                    .get(&(user_id.to_string(), channel))
                    .map(|window| window.iter().filter(|&&stamp| stamp > floor).count())
            })
            .unwrap_or(0)
    }
}
