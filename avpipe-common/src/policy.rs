//! Policy identifiers and values
//!
//! Policies are small integer knobs set at global, playback or stream level.
//! The most specific level that holds a value wins; otherwise the policy's
//! default applies.

use serde::{Deserialize, Serialize};

/// Value type stored for every policy
pub type PolicyValue = u8;

pub const POLICY_VALUE_DISAPPLY: PolicyValue = 0;
pub const POLICY_VALUE_APPLY: PolicyValue = 1;

/// Playout policies use these values
pub const POLICY_VALUE_PLAYOUT: PolicyValue = 0;
pub const POLICY_VALUE_DISCARD: PolicyValue = 1;

/// Known policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Policy {
    /// Play out or discard queued data when a stream is removed
    PlayoutOnTerminate,
    /// Play out or discard queued data when collaborators are switched
    PlayoutOnSwitch,
    /// Play out or discard queued data on an explicit drain
    PlayoutOnDrain,
    /// Pseudo policy: always resolves to playout
    PlayoutAlwaysPlayout,
    /// Pseudo policy: always resolves to discard
    PlayoutAlwaysDiscard,
    /// Ignore collaborator requests to mark a stream unplayable
    IgnoreStreamUnPlayableCalls,
    /// Synchronise audio and video outputs
    AvdSynchronization,
    /// Show the first decoded frame before timing is established
    ManifestFirstFrameEarly,
    /// Release decoded frames immediately instead of reordering them
    DisableReordering,
    /// Apply the forward-play limit on out-of-order decodes
    LimitOutOfOrderDecodes,
}

impl Policy {
    pub const ALL: [Policy; 10] = [
        Policy::PlayoutOnTerminate,
        Policy::PlayoutOnSwitch,
        Policy::PlayoutOnDrain,
        Policy::PlayoutAlwaysPlayout,
        Policy::PlayoutAlwaysDiscard,
        Policy::IgnoreStreamUnPlayableCalls,
        Policy::AvdSynchronization,
        Policy::ManifestFirstFrameEarly,
        Policy::DisableReordering,
        Policy::LimitOutOfOrderDecodes,
    ];

    /// Value used when no level overrides the policy
    pub const fn default_value(self) -> PolicyValue {
        match self {
            Policy::PlayoutOnTerminate => POLICY_VALUE_DISCARD,
            Policy::PlayoutOnSwitch => POLICY_VALUE_DISCARD,
            Policy::PlayoutOnDrain => POLICY_VALUE_PLAYOUT,
            Policy::PlayoutAlwaysPlayout => POLICY_VALUE_PLAYOUT,
            Policy::PlayoutAlwaysDiscard => POLICY_VALUE_DISCARD,
            Policy::IgnoreStreamUnPlayableCalls => POLICY_VALUE_DISAPPLY,
            Policy::AvdSynchronization => POLICY_VALUE_APPLY,
            Policy::ManifestFirstFrameEarly => POLICY_VALUE_DISAPPLY,
            Policy::DisableReordering => POLICY_VALUE_DISAPPLY,
            Policy::LimitOutOfOrderDecodes => POLICY_VALUE_APPLY,
        }
    }

    /// Pseudo policies have a fixed value and cannot be set
    pub const fn is_fixed(self) -> bool {
        matches!(self, Policy::PlayoutAlwaysPlayout | Policy::PlayoutAlwaysDiscard)
    }

    /// Index into a dense per-policy table
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Outcome of resolving a playout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutMode {
    Playout,
    Discard,
}

impl PlayoutMode {
    pub fn from_value(value: PolicyValue) -> Self {
        if value == POLICY_VALUE_DISCARD {
            PlayoutMode::Discard
        } else {
            PlayoutMode::Playout
        }
    }
}
