// ============================================================================
// GPU SHADERS — WGSL compute kernels, kept inline
// ============================================================================
//
// Every kernel reads an rgba8unorm input texture and writes an rgba8unorm
// storage texture of the same size.  Math matches the CPU kernels in
// ops::adjustments / ops::filters / ops::denoise on normalized values.

/// `out = clamp((in - 0.5) * contrast + 0.5 + brightness, 0, 1)` on RGB.
pub const BRIGHTNESS_CONTRAST_SHADER: &str = r#"
struct BcParams {
    width:      u32,
    height:     u32,
    brightness: f32,
    contrast:   f32,
};

@group(0) @binding(0) var input_tex:  texture_2d<f32>;
@group(0) @binding(1) var output_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: BcParams;

@compute @workgroup_size(16, 16)
fn cs_brightness_contrast(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let px = textureLoad(input_tex, vec2<u32>(gid.x, gid.y), 0);
    let rgb = clamp((px.rgb - vec3<f32>(0.5)) * params.contrast
                    + vec3<f32>(0.5 + params.brightness),
                    vec3<f32>(0.0), vec3<f32>(1.0));
    textureStore(output_tex, vec2<u32>(gid.x, gid.y), vec4<f32>(rgb, px.a));
}
"#;

/// Per-channel gains, then a red/blue bias compensated by its own luma.
pub const COLOR_BALANCE_SHADER: &str = r#"
struct BalanceParams {
    width:      u32,
    height:     u32,
    bias:       f32,
    luma_shift: f32,
    gains:      vec4<f32>,
};

@group(0) @binding(0) var input_tex:  texture_2d<f32>;
@group(0) @binding(1) var output_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: BalanceParams;

@compute @workgroup_size(16, 16)
fn cs_color_balance(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let px = textureLoad(input_tex, vec2<u32>(gid.x, gid.y), 0);
    let shifted = px.rgb * params.gains.rgb
        + vec3<f32>(params.bias, 0.0, -params.bias)
        - vec3<f32>(params.luma_shift);
    textureStore(output_tex, vec2<u32>(gid.x, gid.y),
                 vec4<f32>(clamp(shifted, vec3<f32>(0.0), vec3<f32>(1.0)), px.a));
}
"#;

/// One direction of a separable Gaussian.  `direction` 0 = horizontal,
/// 1 = vertical.  Edge samples are clamped.
pub const SEPARABLE_BLUR_SHADER: &str = r#"
struct BlurParams {
    width:     u32,
    height:    u32,
    radius:    u32,
    direction: u32,
};

@group(0) @binding(0) var input_tex:  texture_2d<f32>;
@group(0) @binding(1) var output_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: BlurParams;
@group(0) @binding(3) var<storage, read> weights: array<f32>;

@compute @workgroup_size(16, 16)
fn cs_blur(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let r = i32(params.radius);
    let max_x = i32(params.width) - 1;
    let max_y = i32(params.height) - 1;
    var acc = vec4<f32>(0.0);
    for (var k: i32 = -r; k <= r; k = k + 1) {
        var pos = vec2<i32>(i32(gid.x), i32(gid.y));
        if (params.direction == 0u) {
            pos.x = clamp(pos.x + k, 0, max_x);
        } else {
            pos.y = clamp(pos.y + k, 0, max_y);
        }
        acc = acc + textureLoad(input_tex, vec2<u32>(pos), 0) * weights[u32(k + r)];
    }
    textureStore(output_tex, vec2<u32>(gid.x, gid.y), acc);
}
"#;

/// Per-channel median over a square window of radius <= 7.
/// One scratch array is reused for each channel in turn.
pub const MEDIAN_SHADER: &str = r#"
struct MedianParams {
    width:  u32,
    height: u32,
    radius: u32,
    _pad:   u32,
};

@group(0) @binding(0) var input_tex:  texture_2d<f32>;
@group(0) @binding(1) var output_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(2) var<uniform> params: MedianParams;

@compute @workgroup_size(16, 16)
fn cs_median(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let r = i32(params.radius);
    let count = u32((2 * r + 1) * (2 * r + 1));
    var scratch: array<f32, 225>;
    var result = vec4<f32>(0.0);

    for (var c: i32 = 0; c < 4; c = c + 1) {
        var n: u32 = 0u;
        for (var dy: i32 = -r; dy <= r; dy = dy + 1) {
            let sy = clamp(i32(gid.y) + dy, 0, i32(params.height) - 1);
            for (var dx: i32 = -r; dx <= r; dx = dx + 1) {
                let sx = clamp(i32(gid.x) + dx, 0, i32(params.width) - 1);
                let v = textureLoad(input_tex, vec2<u32>(u32(sx), u32(sy)), 0)[c];
                // insertion into the sorted prefix
                var j: u32 = n;
                while (j > 0u && scratch[j - 1u] > v) {
                    scratch[j] = scratch[j - 1u];
                    j = j - 1u;
                }
                scratch[j] = v;
                n = n + 1u;
            }
        }
        result[c] = scratch[count / 2u];
    }
    textureStore(output_tex, vec2<u32>(gid.x, gid.y), result);
}
"#;
