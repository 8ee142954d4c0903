// m4b-merge - Audiobook MP3 to M4B merger
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Output bitrate selection
//!
//! The AAC encoder only accepts a fixed set of bitrates at the output sample
//! rate and channel count. The selected bitrate is the closest supported
//! value that does not fall below the source quality where possible:
//!
//! 1. exact match → use it
//! 2. above the largest supported value → clamp to the largest
//! 3. below the smallest supported value → clamp to the smallest
//! 4. otherwise → smallest supported value strictly greater (round up)

/// Bitrates (bits/sec) used when the encoder advertises none
pub const FALLBACK_BITRATES: [u32; 4] = [96_000, 128_000, 160_000, 192_000];

/// Pick the output bitrate for a source bitrate (both in bits/sec)
///
/// `supported` may be unsorted or contain duplicates; an empty set is
/// replaced by [`FALLBACK_BITRATES`].
pub fn select_bitrate(supported: &[u32], source_bitrate: u32) -> u32 {
    let mut bitrates: Vec<u32> = if supported.is_empty() {
        FALLBACK_BITRATES.to_vec()
    } else {
        supported.to_vec()
    };
    bitrates.sort_unstable();
    bitrates.dedup();

    // Both non-empty after the fallback substitution
    let smallest = bitrates[0];
    let largest = bitrates[bitrates.len() - 1];

    if bitrates.binary_search(&source_bitrate).is_ok() {
        source_bitrate
    } else if source_bitrate > largest {
        largest
    } else if source_bitrate < smallest {
        smallest
    } else {
        bitrates
            .into_iter()
            .find(|&b| b > source_bitrate)
            .unwrap_or(largest)
    }
}

/// Convert a kbps source bitrate to bits/sec
pub fn kbps_to_bps(kbps: u32) -> u32 {
    kbps.saturating_mul(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SET: [u32; 4] = [96_000, 128_000, 160_000, 192_000];

    #[test]
    fn test_exact_match() {
        assert_eq!(select_bitrate(&SET, 128_000), 128_000);
        assert_eq!(select_bitrate(&SET, 96_000), 96_000);
        assert_eq!(select_bitrate(&SET, 192_000), 192_000);
    }

    #[test]
    fn test_clamps_below_minimum() {
        assert_eq!(select_bitrate(&SET, 64_000), 96_000);
        assert_eq!(select_bitrate(&SET, 0), 96_000);
    }

    #[test]
    fn test_clamps_above_maximum() {
        assert_eq!(select_bitrate(&SET, 256_000), 192_000);
        assert_eq!(select_bitrate(&SET, 320_000), 192_000);
    }

    #[test]
    fn test_rounds_up_between_values() {
        assert_eq!(select_bitrate(&SET, 100_000), 128_000);
        assert_eq!(select_bitrate(&SET, 128_001), 160_000);
        assert_eq!(select_bitrate(&SET, 191_999), 192_000);
    }

    #[test]
    fn test_empty_set_uses_fallback() {
        assert_eq!(select_bitrate(&[], 128_000), 128_000);
        assert_eq!(select_bitrate(&[], 64_000), 96_000);
        assert_eq!(select_bitrate(&[], 256_000), 192_000);
        assert_eq!(select_bitrate(&[], 100_000), 128_000);
    }

    #[test]
    fn test_unsorted_advertised_set() {
        let set = [192_000, 64_000, 128_000, 64_000];
        assert_eq!(select_bitrate(&set, 100_000), 128_000);
        assert_eq!(select_bitrate(&set, 32_000), 64_000);
    }

    #[test]
    fn test_single_value_set() {
        assert_eq!(select_bitrate(&[128_000], 64_000), 128_000);
        assert_eq!(select_bitrate(&[128_000], 320_000), 128_000);
    }

    #[test]
    fn test_kbps_to_bps() {
        assert_eq!(kbps_to_bps(128), 128_000);
        assert_eq!(kbps_to_bps(u32::MAX), u32::MAX);
    }
}
