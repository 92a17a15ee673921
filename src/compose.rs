//! WGSL generation for the particle passes.
//!
//! Both passes of a step share one binding layout:
//!
//! | Binding | Name | |
//! |---------|------|--|
//! | 0 | `frame` | [`FrameUniforms`](crate::gpu::FrameUniforms) |
//! | 1 | `params` | behavior uniforms |
//! | 2 | `position_tex` | previous positions |
//! | 3 | `velocity_tex` | previous velocities (velocity pass) or new velocities (position pass) |
//! | 4 | `seed_position_tex` | generator output |
//! | 5 | `seed_velocity_tex` | generator output |
//! | 6.. | `tex_{name}` | declared data textures, in declaration order |
//!
//! The fragment stage runs once per texel. Texels past `frame.count` write
//! zero; every other texel goes through the behavior body, then the rebirth
//! override, then [`clamp_finite`](crate::shader_utils::host::clamp_finite).

use crate::behavior::Behavior;
use crate::gpu::FRAME_WGSL;
use crate::shader_utils::{all_utils_wgsl, FULLSCREEN_WGSL};

/// Fixed particle state inputs, bound before any data texture.
pub const STATE_INPUTS: [&str; 4] = [
    "position_tex",
    "velocity_tex",
    "seed_position_tex",
    "seed_velocity_tex",
];

/// Binding names of every texture input, in binding order.
pub fn input_names(behavior: &Behavior) -> Vec<String> {
    STATE_INPUTS
        .iter()
        .map(|s| s.to_string())
        .chain(behavior.uniforms().textures().map(|(name, _)| format!("tex_{}", name)))
        .collect()
}

fn header(behavior: &Behavior) -> String {
    let mut code = String::new();
    code.push_str(FRAME_WGSL);
    code.push_str("\n\nstruct Params {\n");
    code.push_str(&behavior.uniforms().to_wgsl_fields());
    code.push_str("\n};\n\n");
    code.push_str("@group(0) @binding(0) var<uniform> frame: Frame;\n");
    code.push_str("@group(0) @binding(1) var<uniform> params: Params;\n");
    for (i, name) in input_names(behavior).iter().enumerate() {
        code.push_str(&format!(
            "@group(0) @binding({}) var {}: texture_2d<f32>;\n",
            i + 2,
            name
        ));
    }
    code.push('\n');
    code.push_str(&all_utils_wgsl());
    code.push_str(FULLSCREEN_WGSL);
    code
}

fn reborn_expr(behavior: &Behavior) -> &'static str {
    if behavior.has_lifetime() {
        "rebirth_due(pos.w, params.lifetime)"
    } else {
        "false"
    }
}

const PRELUDE: &str = r#"
@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = vec2<i32>(floor(frag_coord.xy));
    let index = texel_index(texel, u32(frame.resolution.x));
    if index >= frame.count {
        return vec4<f32>(0.0);
    }
    let pos = textureLoad(position_tex, texel, 0);
    let vel = textureLoad(velocity_tex, texel, 0);
    let seed_pos = textureLoad(seed_position_tex, texel, 0);
    let seed_vel = textureLoad(seed_velocity_tex, texel, 0);
"#;

/// Full WGSL module of the velocity pass.
pub fn velocity_pass(behavior: &Behavior) -> String {
    format!(
        r#"{header}{prelude}    let reborn = {reborn};
    var updated = vel;

    // {name} velocity
{body}

    if reborn {{
        updated = seed_vel;
    }}
    return clamp_finite(updated);
}}
"#,
        header = header(behavior),
        prelude = PRELUDE,
        reborn = reborn_expr(behavior),
        name = behavior.name(),
        body = behavior.velocity_shader(),
    )
}

/// Full WGSL module of the position pass. `velocity_tex` is bound to the
/// velocity written by this step's velocity pass.
pub fn position_pass(behavior: &Behavior) -> String {
    format!(
        r#"{header}{prelude}    let reborn = {reborn};
    var updated = vec4<f32>(pos.xyz + vel.xyz * frame.delta, pos.w + frame.delta);

    // {name} position
{body}

    if reborn {{
        updated = vec4<f32>(seed_pos.xyz, 0.0);
    }}
    return clamp_finite(updated);
}}
"#,
        header = header(behavior),
        prelude = PRELUDE,
        reborn = reborn_expr(behavior),
        name = behavior.name(),
        body = behavior.position_shader(),
    )
}
