//! Render-path configuration (spec §6).
//!
//! A small key/value document the caller constructs (typically parsed from
//! JSON by the caller — the core performs no file I/O, see spec §1) and
//! passes into [`crate::controller::PlaybackController::open`]. Resolution
//! of `render_mode`/`prefer_hardware_acceleration` into an actual
//! [`RenderPath`] is the one piece of logic worth unit testing in isolation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZenPlayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Auto,
    Hardware,
    Software,
}

impl Default for RenderMode {
    fn default() -> Self {
        RenderMode::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub allow_fallback: bool,
    pub zero_copy: bool,
    pub allow_d3d11va: bool,
    pub allow_dxva2: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            allow_fallback: true,
            zero_copy: true,
            allow_d3d11va: true,
            allow_dxva2: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderPathConfig {
    pub prefer_hardware_acceleration: bool,
    pub render_mode: RenderMode,
    pub hardware: HardwareConfig,
    pub vsync: bool,
    pub max_fps: u32,
}

impl Default for RenderPathConfig {
    fn default() -> Self {
        Self {
            prefer_hardware_acceleration: true,
            render_mode: RenderMode::Auto,
            hardware: HardwareConfig::default(),
            vsync: true,
            max_fps: 60,
        }
    }
}

/// The render path chosen for a given open, after resolving configuration
/// against what the platform actually detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPath {
    Hardware,
    Software,
}

impl RenderPathConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ZenPlayError::config(format!("invalid render-path config: {e}")))
    }

    /// Implements the resolution rule of spec §6 verbatim:
    ///
    /// - `render_mode == software` -> software path.
    /// - `render_mode == hardware` -> hardware path, fail closed unless
    ///   `hardware.allow_fallback`.
    /// - `auto` and `prefer_hardware_acceleration` and hardware detected ->
    ///   hardware path, else software.
    pub fn resolve(&self, hw_available: bool) -> Result<RenderPath> {
        match self.render_mode {
            RenderMode::Software => Ok(RenderPath::Software),
            RenderMode::Hardware => {
                if hw_available {
                    Ok(RenderPath::Hardware)
                } else if self.hardware.allow_fallback {
                    Ok(RenderPath::Software)
                } else {
                    Err(ZenPlayError::hardware(
                        "hardware render path requested but unavailable, and allow_fallback is false",
                    ))
                }
            }
            RenderMode::Auto => {
                if self.prefer_hardware_acceleration && hw_available {
                    Ok(RenderPath::Hardware)
                } else {
                    Ok(RenderPath::Software)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RenderPathConfig::default();
        assert!(cfg.prefer_hardware_acceleration);
        assert_eq!(cfg.render_mode, RenderMode::Auto);
        assert!(cfg.hardware.allow_fallback);
        assert!(cfg.hardware.zero_copy);
        assert!(cfg.vsync);
        assert_eq!(cfg.max_fps, 60);
    }

    #[test]
    fn software_mode_always_resolves_software() {
        let cfg = RenderPathConfig {
            render_mode: RenderMode::Software,
            ..Default::default()
        };
        assert_eq!(cfg.resolve(true).unwrap(), RenderPath::Software);
        assert_eq!(cfg.resolve(false).unwrap(), RenderPath::Software);
    }

    #[test]
    fn hardware_mode_fails_closed_without_fallback() {
        let cfg = RenderPathConfig {
            render_mode: RenderMode::Hardware,
            hardware: HardwareConfig {
                allow_fallback: false,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cfg.resolve(false).is_err());
        assert_eq!(cfg.resolve(true).unwrap(), RenderPath::Hardware);
    }

    #[test]
    fn hardware_mode_falls_back_when_allowed() {
        let cfg = RenderPathConfig {
            render_mode: RenderMode::Hardware,
            ..Default::default()
        };
        assert_eq!(cfg.resolve(false).unwrap(), RenderPath::Software);
    }

    #[test]
    fn auto_mode_prefers_hardware_when_detected() {
        let cfg = RenderPathConfig::default();
        assert_eq!(cfg.resolve(true).unwrap(), RenderPath::Hardware);
        assert_eq!(cfg.resolve(false).unwrap(), RenderPath::Software);
    }

    #[test]
    fn auto_mode_without_preference_stays_software() {
        let cfg = RenderPathConfig {
            prefer_hardware_acceleration: false,
            ..Default::default()
        };
        assert_eq!(cfg.resolve(true).unwrap(), RenderPath::Software);
    }

    #[test]
    fn from_json_parses_partial_document() {
        let cfg = RenderPathConfig::from_json(r#"{"render_mode": "hardware"}"#).unwrap();
        assert_eq!(cfg.render_mode, RenderMode::Hardware);
        assert!(cfg.prefer_hardware_acceleration);
    }
}
