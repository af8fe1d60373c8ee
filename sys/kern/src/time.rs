// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

use crate::config::TICK_US;

/// In-kernel timestamp representation.
///
/// Measured in ticks of `TICK_US` microseconds since the counter started.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The timestamp `ticks` after this one, saturating at the end of time.
    pub fn after(self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

/// Number of ticks a sleep of `us` microseconds lasts: rounded up, and never
/// less than one tick for a nonzero duration.
pub fn ticks_for_micros(us: u64) -> u64 {
    if us == 0 {
        0
    } else {
        us.div_ceil(TICK_US).max(1)
    }
}
