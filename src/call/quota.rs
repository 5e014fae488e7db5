//! Credential selection and usage accounting.
//!
//! The call layer never decides on its own which key to use. It asks a
//! [`QuotaTracker`] before each request and reports usage after each success.

use crate::call::transport::ApiKey;
use std::sync::{Mutex, PoisonError};

/// Chooses credentials under quota pressure and records what was spent.
pub trait QuotaTracker: Send + Sync {
    /// Picks a key with at least `char_count` characters of allowance left
    /// for `voice`, or `None` if every key is exhausted.
    fn select_key(&self, voice: &str, char_count: usize) -> Option<ApiKey>;

    /// Records `char_count` characters spent on `voice` with `key`.
    fn record_usage(&self, key: &ApiKey, voice: &str, char_count: usize);
}

/// Pricing tier of a voice. Premium voices usually have a smaller allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceTier {
    Standard,
    Premium,
}

impl VoiceTier {
    /// Name markers of premium voice families.
    const PREMIUM_MARKERS: [&'static str; 5] =
        ["wavenet", "neural", "studio", "polyglot", "journey"];

    /// Derives the tier from a voice name such as `en-US-Wavenet-D`.
    pub fn of(voice: &str) -> Self {
        let voice = voice.to_ascii_lowercase();
        if Self::PREMIUM_MARKERS.iter().any(|m| voice.contains(m)) {
            Self::Premium
        } else {
            Self::Standard
        }
    }
}

/// Always hands out the same key and keeps no accounting.
#[derive(Debug, Clone)]
pub struct SingleKey {
    key: ApiKey,
}

impl SingleKey {
    pub fn new(key: ApiKey) -> Self {
        Self { key }
    }
}

impl QuotaTracker for SingleKey {
    fn select_key(&self, _voice: &str, _char_count: usize) -> Option<ApiKey> {
        Some(self.key.clone())
    }

    fn record_usage(&self, _key: &ApiKey, _voice: &str, _char_count: usize) {}
}

/// Character allowance of one key. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Allowance {
    pub standard: Option<usize>,
    pub premium: Option<usize>,
}

impl Allowance {
    pub fn unlimited() -> Self {
        Self::default()
    }

    fn limit(&self, tier: VoiceTier) -> Option<usize> {
        match tier {
            VoiceTier::Standard => self.standard,
            VoiceTier::Premium => self.premium,
        }
    }
}

#[derive(Debug)]
struct PoolEntry {
    key: ApiKey,
    allowance: Allowance,
    used_standard: usize,
    used_premium: usize,
}

impl PoolEntry {
    fn used(&self, tier: VoiceTier) -> usize {
        match tier {
            VoiceTier::Standard => self.used_standard,
            VoiceTier::Premium => self.used_premium,
        }
    }

    fn remaining(&self, tier: VoiceTier) -> Option<usize> {
        self.allowance
            .limit(tier)
            .map(|limit| limit.saturating_sub(self.used(tier)))
    }

    fn can_take(&self, tier: VoiceTier, char_count: usize) -> bool {
        self.remaining(tier).is_none_or(|left| left >= char_count)
    }
}

/// Rotates among several keys, moving on once a key's allowance is spent.
///
/// Keys are tried in insertion order, so the first key is drained before the
/// second one is touched.
#[derive(Debug, Default)]
pub struct KeyPool {
    entries: Mutex<Vec<PoolEntry>>,
}

impl KeyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key with the given allowance.
    pub fn with_key(self, key: ApiKey, allowance: Allowance) -> Self {
        self.lock().push(PoolEntry {
            key,
            allowance,
            used_standard: 0,
            used_premium: 0,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Characters left on `key_name` for `tier`; `None` if unlimited or unknown.
    pub fn remaining(&self, key_name: &str, tier: VoiceTier) -> Option<usize> {
        self.lock()
            .iter()
            .find(|e| e.key.name() == key_name)
            .and_then(|e| e.remaining(tier))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PoolEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QuotaTracker for KeyPool {
    fn select_key(&self, voice: &str, char_count: usize) -> Option<ApiKey> {
        let tier = VoiceTier::of(voice);
        self.lock()
            .iter()
            .find(|e| e.can_take(tier, char_count))
            .map(|e| e.key.clone())
    }

    fn record_usage(&self, key: &ApiKey, voice: &str, char_count: usize) {
        let tier = VoiceTier::of(voice);
        let mut entries = self.lock();
        let Some(entry) = entries.iter_mut().find(|e| e.key.name() == key.name()) else {
            tracing::warn!(key = key.name(), "usage recorded for unknown key");
            return;
        };
        match tier {
            VoiceTier::Standard => {
                entry.used_standard = entry.used_standard.saturating_add(char_count);
            }
            VoiceTier::Premium => {
                entry.used_premium = entry.used_premium.saturating_add(char_count);
            }
        }
    }
}
