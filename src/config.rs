//! Mixer configuration and preset parsing.

use std::fmt;

use tracing::warn;

use crate::{MixerError, notify_warning};

/// Lowest accepted output rate.
pub const MIN_RATE_HZ: u32 = 8_000;
/// Highest accepted output rate.
pub const MAX_RATE_HZ: u32 = 96_000;
/// Smallest accepted block size.
pub const MIN_BLOCKSIZE: u32 = 64;
/// Largest accepted block size.
pub const MAX_BLOCKSIZE: u32 = 8_192;
/// Largest accepted prebuffer.
pub const MAX_PREBUFFER_MS: u32 = 100;

/// Settings consumed by the mixer at start-up and at runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct MixerConfig {
    /// Run without opening a host device.
    pub nosound: bool,
    /// Requested output rate in Hz.
    pub rate: u32,
    /// Requested frames per block.
    pub blocksize: u32,
    /// Milliseconds of audio buffered ahead of the host.
    pub prebuffer_ms: u32,
    /// Let the host pick a different rate or block size.
    pub negotiate: bool,
    /// Master compressor on or off.
    pub compressor: bool,
    /// Crossfeed preset name.
    pub crossfeed: String,
    /// Reverb preset name.
    pub reverb: String,
    /// Chorus preset name.
    pub chorus: String,
    /// Noise gate on channels that support it.
    pub denoiser: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            nosound: false,
            rate: 48_000,
            blocksize: 512,
            prebuffer_ms: 20,
            negotiate: true,
            compressor: true,
            crossfeed: "off".to_string(),
            reverb: "off".to_string(),
            chorus: "off".to_string(),
            denoiser: true,
        }
    }
}

impl MixerConfig {
    /// Copy with numeric fields clamped to their ranges.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        let clamp = |name: &str, value: u32, min: u32, max: u32| {
            let clamped = value.clamp(min, max);
            if clamped != value {
                warn!("MIXER: {name} {value} out of range, using {clamped}");
            }
            clamped
        };
        config.rate = clamp("rate", self.rate, MIN_RATE_HZ, MAX_RATE_HZ);
        config.blocksize = clamp("blocksize", self.blocksize, MIN_BLOCKSIZE, MAX_BLOCKSIZE);
        config.prebuffer_ms = clamp("prebuffer", self.prebuffer_ms, 0, MAX_PREBUFFER_MS);
        config
    }
}

/// Parse a boolean-ish preference; `None` when it is neither true nor false.
pub fn parse_bool_setting(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" | "enabled" => Some(true),
        "off" | "false" | "no" | "0" | "disabled" | "none" => Some(false),
        _ => None,
    }
}

macro_rules! preset_enum {
    (
        $(#[$doc:meta])*
        $name:ident, $setting:literal, default_on = $on:ident,
        [$($(#[$vdoc:meta])* $variant:ident => $label:literal),+ $(,)?]
    ) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub enum $name {
            /// Effect off.
            #[default]
            None,
            $($(#[$vdoc])* $variant,)+
        }

        impl $name {
            /// Every preset in cycling order.
            pub const ALL: &'static [$name] = &[$name::None, $($name::$variant),+];

            /// Preference string for this preset.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $name::None => "off",
                    $($name::$variant => $label,)+
                }
            }

            /// Parse a preference string.
            pub fn parse(value: &str) -> Result<Self, MixerError> {
                if let Some(enabled) = parse_bool_setting(value) {
                    return Ok(if enabled { $name::$on } else { $name::None });
                }
                let lowered = value.trim().to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|preset| preset.as_str() == lowered)
                    .ok_or_else(|| MixerError::InvalidPreset {
                        setting: $setting.to_string(),
                        value: value.to_string(),
                    })
            }

            /// Parse a preference string, warning and falling back to `None` on error.
            pub fn from_setting(value: &str) -> Self {
                Self::parse(value).unwrap_or_else(|err| {
                    notify_warning("MIXER", format!("{err}; using 'off'"));
                    $name::None
                })
            }

            /// The preset after this one, wrapping around.
            pub fn next(&self) -> Self {
                let index = Self::ALL.iter().position(|p| p == self).unwrap_or(0);
                Self::ALL[(index + 1) % Self::ALL.len()]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

preset_enum!(
    /// Crossfeed strength tiers.
    CrossfeedPreset, "crossfeed", default_on = Normal,
    [
        /// Subtle crossfeed.
        Light => "light",
        /// Moderate crossfeed.
        Normal => "normal",
        /// Heavy crossfeed.
        Strong => "strong",
    ]
);

preset_enum!(
    /// Reverb room tiers.
    ReverbPreset, "reverb", default_on = Medium,
    [
        /// Very small room.
        Tiny => "tiny",
        /// Small room.
        Small => "small",
        /// Medium room.
        Medium => "medium",
        /// Large hall.
        Large => "large",
        /// Large hall with heavy synth send.
        Huge => "huge",
    ]
);

preset_enum!(
    /// Chorus depth tiers.
    ChorusPreset, "chorus", default_on = Normal,
    [
        /// Light chorus.
        Light => "light",
        /// Moderate chorus.
        Normal => "normal",
        /// Strong chorus.
        Strong => "strong",
    ]
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_clamps_numeric_ranges() {
        let config = MixerConfig {
            rate: 4_000,
            blocksize: 100_000,
            prebuffer_ms: 500,
            ..MixerConfig::default()
        }
        .sanitized();
        assert_eq!((config.rate, config.blocksize, config.prebuffer_ms), (8_000, 8_192, 100));
    }

    #[test]
    fn presets_parse_on_off_and_names() {
        assert_eq!(ReverbPreset::parse("on").expect("on"), ReverbPreset::Medium);
        assert_eq!(ReverbPreset::parse("HUGE").expect("huge"), ReverbPreset::Huge);
        assert_eq!(CrossfeedPreset::parse("off").expect("off"), CrossfeedPreset::None);
        assert_eq!(ChorusPreset::parse("yes").expect("yes"), ChorusPreset::Normal);
        assert!(ChorusPreset::parse("loud").is_err());
        assert_eq!(CrossfeedPreset::from_setting("sideways"), CrossfeedPreset::None);
        assert_eq!(ReverbPreset::Huge.next(), ReverbPreset::None);
    }

    #[test]
    fn bool_settings_accept_common_spellings() {
        for on in ["on", "TRUE", "yes", "1"] {
            assert_eq!(parse_bool_setting(on), Some(true), "{on}");
        }
        for off in ["off", "False", "no", "0"] {
            assert_eq!(parse_bool_setting(off), Some(false), "{off}");
        }
        assert_eq!(parse_bool_setting("maybe"), None);
        assert_eq!(parse_bool_setting(""), None);
    }
}
