// ============================================================================
// BLEND MODES — per-pixel rules combining a layer with the composite below
// ============================================================================
//
// All math runs on straight (non-premultiplied) normalized RGBA.  The mode
// function picks the blended colour, then the result is alpha-composited
// over the base with `top_a = alpha * opacity`.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Additive,
    Reflect,
    Glow,
    ColorBurn,
    ColorDodge,
    Overlay,
    Difference,
    Negation,
    Lighten,
    Darken,
    Xor,
    Overwrite,
    HardLight,
    SoftLight,
    Exclusion,
    Subtract,
    Divide,
    LinearBurn,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Additive,
            BlendMode::Overlay,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Lighten,
            BlendMode::Darken,
            BlendMode::ColorBurn,
            BlendMode::ColorDodge,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Negation,
            BlendMode::Reflect,
            BlendMode::Glow,
            BlendMode::Subtract,
            BlendMode::Divide,
            BlendMode::LinearBurn,
            BlendMode::VividLight,
            BlendMode::LinearLight,
            BlendMode::PinLight,
            BlendMode::HardMix,
            BlendMode::Xor,
            BlendMode::Overwrite,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Additive => "Additive",
            BlendMode::Reflect => "Reflect",
            BlendMode::Glow => "Glow",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::Overlay => "Overlay",
            BlendMode::Difference => "Difference",
            BlendMode::Negation => "Negation",
            BlendMode::Lighten => "Lighten",
            BlendMode::Darken => "Darken",
            BlendMode::Xor => "Xor",
            BlendMode::Overwrite => "Overwrite",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::Subtract => "Subtract",
            BlendMode::Divide => "Divide",
            BlendMode::LinearBurn => "Linear Burn",
            BlendMode::VividLight => "Vivid Light",
            BlendMode::LinearLight => "Linear Light",
            BlendMode::PinLight => "Pin Light",
            BlendMode::HardMix => "Hard Mix",
        }
    }

    /// Stable code written to project files.
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Additive => 3,
            BlendMode::Reflect => 4,
            BlendMode::Glow => 5,
            BlendMode::ColorBurn => 6,
            BlendMode::ColorDodge => 7,
            BlendMode::Overlay => 8,
            BlendMode::Difference => 9,
            BlendMode::Negation => 10,
            BlendMode::Lighten => 11,
            BlendMode::Darken => 12,
            BlendMode::Xor => 13,
            BlendMode::Overwrite => 14,
            BlendMode::HardLight => 15,
            BlendMode::SoftLight => 16,
            BlendMode::Exclusion => 17,
            BlendMode::Subtract => 18,
            BlendMode::Divide => 19,
            BlendMode::LinearBurn => 20,
            BlendMode::VividLight => 21,
            BlendMode::LinearLight => 22,
            BlendMode::PinLight => 23,
            BlendMode::HardMix => 24,
        }
    }

    /// Unknown codes decode as Normal.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Additive,
            4 => BlendMode::Reflect,
            5 => BlendMode::Glow,
            6 => BlendMode::ColorBurn,
            7 => BlendMode::ColorDodge,
            8 => BlendMode::Overlay,
            9 => BlendMode::Difference,
            10 => BlendMode::Negation,
            11 => BlendMode::Lighten,
            12 => BlendMode::Darken,
            13 => BlendMode::Xor,
            14 => BlendMode::Overwrite,
            15 => BlendMode::HardLight,
            16 => BlendMode::SoftLight,
            17 => BlendMode::Exclusion,
            18 => BlendMode::Subtract,
            19 => BlendMode::Divide,
            20 => BlendMode::LinearBurn,
            21 => BlendMode::VividLight,
            22 => BlendMode::LinearLight,
            23 => BlendMode::PinLight,
            24 => BlendMode::HardMix,
            _ => BlendMode::Normal,
        }
    }

    /// Case-insensitive lookup by display name, ignoring spaces.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name.chars().filter(|c| !c.is_whitespace()).collect();
        Self::all().iter().copied().find(|m| {
            m.name()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .eq_ignore_ascii_case(&wanted)
        })
    }

    fn channel(self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal | BlendMode::Xor | BlendMode::Overwrite => top,
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Additive => (base + top).min(1.0),
            BlendMode::Overlay => overlay(base, top),
            BlendMode::HardLight => overlay(top, base),
            BlendMode::SoftLight => soft_light(base, top),
            BlendMode::Lighten => base.max(top),
            BlendMode::Darken => base.min(top),
            BlendMode::Difference => (base - top).abs(),
            BlendMode::Negation => 1.0 - (1.0 - base - top).abs(),
            BlendMode::ColorBurn => color_burn(base, top),
            BlendMode::ColorDodge => color_dodge(base, top),
            BlendMode::Reflect => reflect(base, top),
            BlendMode::Glow => reflect(top, base),
            BlendMode::Exclusion => base + top - 2.0 * base * top,
            BlendMode::Subtract => (base - top).max(0.0),
            BlendMode::Divide => {
                if top <= 0.0 {
                    1.0
                } else {
                    (base / top).min(1.0)
                }
            }
            BlendMode::LinearBurn => (base + top - 1.0).max(0.0),
            BlendMode::VividLight => vivid_light(base, top),
            BlendMode::LinearLight => (base + 2.0 * top - 1.0).clamp(0.0, 1.0),
            BlendMode::PinLight => {
                if top <= 0.5 {
                    base.min(2.0 * top)
                } else {
                    base.max(2.0 * (top - 0.5))
                }
            }
            BlendMode::HardMix => {
                if base + top >= 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Blend `top` over `base` with the given mode and layer opacity.
pub fn blend_pixel(base: [f32; 4], top: [f32; 4], mode: BlendMode, opacity: f32) -> [f32; 4] {
    let opacity = opacity.clamp(0.0, 1.0);
    let top_a = top[3].clamp(0.0, 1.0) * opacity;
    let base_a = base[3].clamp(0.0, 1.0);

    if top_a <= 0.0 && mode != BlendMode::Overwrite {
        return base;
    }

    match mode {
        BlendMode::Overwrite => return [top[0], top[1], top[2], top_a],
        BlendMode::Xor => {
            let xor_a = base_a * (1.0 - top_a) + top_a * (1.0 - base_a);
            if xor_a <= 0.0 {
                return [0.0; 4];
            }
            let mix = |b: f32, t: f32| {
                ((b * base_a * (1.0 - top_a) + t * top_a * (1.0 - base_a)) / xor_a).clamp(0.0, 1.0)
            };
            return [mix(base[0], top[0]), mix(base[1], top[1]), mix(base[2], top[2]), xor_a];
        }
        _ => {}
    }

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return [0.0; 4];
    }
    let mut out = [0.0f32; 4];
    for c in 0..3 {
        // Where the backdrop is transparent the layer shows its own colour.
        let blended = mode.channel(base[c], top[c]) * base_a + top[c] * (1.0 - base_a);
        out[c] = ((blended * top_a + base[c] * base_a * (1.0 - top_a)) / out_a).clamp(0.0, 1.0);
    }
    out[3] = out_a.clamp(0.0, 1.0);
    out
}

fn overlay(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_burn(base: f32, top: f32) -> f32 {
    if top == 0.0 {
        0.0
    } else {
        (1.0 - (1.0 - base) / top).max(0.0)
    }
}

fn color_dodge(base: f32, top: f32) -> f32 {
    if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

fn reflect(base: f32, top: f32) -> f32 {
    if top >= 1.0 {
        1.0
    } else {
        (base * base / (1.0 - top)).min(1.0)
    }
}

/// W3C soft light.
fn soft_light(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

fn vivid_light(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        color_burn(base, 2.0 * top)
    } else {
        color_dodge(base, 2.0 * (top - 0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
    const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

    #[test]
    fn normal_half_opacity_mixes_evenly() {
        let out = blend_pixel(RED, BLUE, BlendMode::Normal, 0.5);
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn transparent_top_leaves_base() {
        assert_eq!(blend_pixel(RED, [0.3, 0.3, 0.3, 0.0], BlendMode::Screen, 1.0), RED);
        assert_eq!(blend_pixel(RED, BLUE, BlendMode::Multiply, 0.0), RED);
    }

    #[test]
    fn multiply_and_screen_against_grey() {
        let grey = [0.5, 0.5, 0.5, 1.0];
        let m = blend_pixel(grey, grey, BlendMode::Multiply, 1.0);
        assert!((m[0] - 0.25).abs() < 1e-6);
        let s = blend_pixel(grey, grey, BlendMode::Screen, 1.0);
        assert!((s[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn multiply_over_empty_backdrop_keeps_layer_colour() {
        let out = blend_pixel([0.0; 4], BLUE, BlendMode::Multiply, 1.0);
        assert_eq!(out, BLUE);
    }

    #[test]
    fn codes_are_stable() {
        for mode in BlendMode::all() {
            assert_eq!(BlendMode::from_u8(mode.to_u8()), *mode);
        }
        assert_eq!(BlendMode::from_u8(200), BlendMode::Normal);
        assert_eq!(BlendMode::from_name("soft light"), Some(BlendMode::SoftLight));
        assert_eq!(BlendMode::from_name("bogus"), None);
    }
}
