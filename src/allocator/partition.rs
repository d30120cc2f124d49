//! Prefix-space partitioning across zones.
//!
//! The seed prefix holds `2^(allocPrefixLen - seedLen)` node prefixes. This
//! module splits that count among zones as sums of power-of-two blocks so
//! every zone gets at least its allocation size and the whole space is
//! handed out. Each step grants one block per needy zone, then recurses on
//! the remainder; when the remainder cannot be split, the step is retried
//! with blocks half the size.

use std::collections::BTreeMap;

use log::trace;

use super::zone::PrefixZone;

/// Zones keyed by POP site name
pub type PrefixZones = BTreeMap<String, PrefixZone>;

/// Distribute `prefix_space` node prefixes among `zones`.
///
/// Existing prefix spaces on the zones are kept and added to. Returns the
/// zones with their granted spaces, or None when no partition satisfies
/// every zone.
pub fn partition_prefix_space(zones: &PrefixZones, prefix_space: u128) -> Option<PrefixZones> {
    if zones.is_empty() {
        return None;
    }

    let (needy_zones, total_remaining) = zones
        .values()
        .map(PrefixZone::remaining)
        .filter(|remaining| *remaining > 0)
        .fold((0u128, 0u128), |(count, total), remaining| {
            (count + 1, total.saturating_add(remaining.unsigned_abs()))
        });

    if prefix_space < total_remaining {
        return None;
    }
    if prefix_space == 0 {
        return (total_remaining == 0).then(|| zones.clone());
    }

    let mut num_segments = needy_zones.max(1).checked_next_power_of_two()?;
    loop {
        let per_zone = floor_power_of_two(prefix_space / num_segments).max(1);
        trace!(
            "Splitting {} prefixes into {} segments of {}",
            prefix_space,
            num_segments,
            per_zone
        );

        let mut space_left = prefix_space;
        let mut branch = zones.clone();
        for zone in branch.values_mut() {
            if zone.remaining() <= 0 && total_remaining != 0 {
                continue;
            }
            if per_zone > space_left {
                break;
            }
            zone.add_to_prefix_space(per_zone);
            space_left -= per_zone;
            if space_left == 0 {
                break;
            }
        }

        if let Some(solution) = partition_prefix_space(&branch, space_left) {
            return Some(solution);
        }

        num_segments = num_segments.checked_mul(2)?;
        if num_segments > prefix_space {
            return None;
        }
    }
}

/// Largest power of two not above `value`, or 0 for 0
fn floor_power_of_two(value: u128) -> u128 {
    if value == 0 {
        0
    } else {
        1u128 << (127 - value.leading_zeros())
    }
}
