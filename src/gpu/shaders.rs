// ============================================================================
// WGSL SHADERS — all shader source for the canvas renderer
// ============================================================================
//
// Scene-space passes share the `View` uniform at group 0:
//   clip.xy = scene.xy * transform.xy + transform.zw
// which is the GPU side of `screen = (scene + translate) * scale` followed by
// the pixel → NDC mapping (y flipped).
//
// Quads are expanded from `vertex_index` (two triangles, six vertices), so
// no vertex buffers are bound except for the stroke ribbon.

/// Analytic grid backdrop. Fullscreen triangle at far depth; the pattern is
/// box-filtered from screen-space derivatives so it stays crisp at any zoom.
pub const GRID_SHADER: &str = r#"
struct GridUniforms {
    // xy: screen → grid-cell scale, zw: grid-cell offset
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> grid: GridUniforms;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tc: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(2.0, 0.0),
        vec2<f32>(0.0, 2.0),
    );
    let tc = corners[vi];
    var out: VertexOutput;
    out.position = vec4<f32>(tc.x * 2.0 - 1.0, tc.y * -2.0 + 1.0, 1.0, 1.0);
    out.tc = tc;
    return out;
}

// https://iquilezles.org/articles/filterableprocedurals/
fn filtered_grid(p: vec2<f32>, ddx: vec2<f32>, ddy: vec2<f32>) -> f32 {
    let n = 64.0;
    let w = max(abs(ddx), abs(ddy));
    let a = p + 0.5 * w;
    let b = p - 0.5 * w;
    let i = (floor(a) + min(fract(a) * n, vec2<f32>(1.0))
           - floor(b) - min(fract(b) * n, vec2<f32>(1.0))) / (n * w);
    return (1.0 - i.x) * (1.0 - i.y);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let uv = in.tc * grid.params.xy + grid.params.zw;
    let g = filtered_grid(uv, dpdx(uv), dpdy(uv));
    return vec4<f32>(vec3<f32>(0.5) * (1.0 - g), 1.0);
}
"#;

/// Textured element quad. Used for loaded images and for the tiled
/// checkerboard placeholder (the `tc` transform tiles the 16px texture).
pub const IMAGE_SHADER: &str = r#"
struct View {
    transform: vec4<f32>,
    inv_scale: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

struct Quad {
    // (width, height, x, y) in scene units
    world: vec4<f32>,
    // uv = unit * tc.xy + tc.zw
    tc: vec4<f32>,
    depth: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> view: View;
@group(1) @binding(0) var<uniform> quad: Quad;
@group(2) @binding(0) var t_image: texture_2d<f32>;
@group(2) @binding(1) var s_image: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let unit = corners[vi];
    let scene = quad.world.zw + unit * quad.world.xy;
    var out: VertexOutput;
    out.position = vec4<f32>(scene * view.transform.xy + view.transform.zw, quad.depth, 1.0);
    out.uv = unit * quad.tc.xy + quad.tc.zw;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(t_image, s_image, in.uv);
}
"#;

/// Selection / hover outline. The quad is the element box inflated by the
/// border half-width; coverage of the border band is integrated over one
/// pixel footprint so the outline stays anti-aliased at every zoom.
pub const SELECTION_SHADER: &str = r#"
struct View {
    transform: vec4<f32>,
    inv_scale: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

struct Outline {
    world: vec4<f32>,
    tc: vec4<f32>,
    // (half width, half height, pixel size, border half-width)
    params: vec4<f32>,
    color: vec4<f32>,
};

@group(0) @binding(0) var<uniform> view: View;
@group(1) @binding(0) var<uniform> outline: Outline;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tc: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let unit = corners[vi];
    let scene = outline.world.zw + unit * outline.world.xy;
    var out: VertexOutput;
    out.position = vec4<f32>(scene * view.transform.xy + view.transform.zw, 0.0, 1.0);
    out.tc = unit * outline.tc.xy + outline.tc.zw;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    // pixel footprint, folded into the first quadrant
    let p0 = abs(in.tc);
    let p1 = p0 + vec2<f32>(outline.params.z);

    // border band
    let e0 = outline.params.xy - vec2<f32>(outline.params.w);
    let e1 = outline.params.xy + vec2<f32>(outline.params.w);

    let c = max(min(p1, e1) - max(p0, e0), vec2<f32>(0.0)) / vec2<f32>(outline.params.z);

    // pick the nearer side
    let s = p0 - e0;
    let x = select(c.x, c.y, s.x < s.y);
    return outline.color * x;
}
"#;

/// Brush cursor ring, 16x supersampled in the fragment shader.
pub const BRUSH_SHADER: &str = r#"
struct View {
    transform: vec4<f32>,
    inv_scale: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

struct Brush {
    world: vec4<f32>,
    tc: vec4<f32>,
    // (radius, radius, pixel size, ring half-width)
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> view: View;
@group(1) @binding(0) var<uniform> brush: Brush;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tc: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let unit = corners[vi];
    let scene = brush.world.zw + unit * brush.world.xy;
    var out: VertexOutput;
    out.position = vec4<f32>(scene * view.transform.xy + view.transform.zw, 0.0, 1.0);
    out.tc = unit * brush.tc.xy + brush.tc.zw;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let e0 = brush.params.x + brush.params.w;
    let e1 = brush.params.x - brush.params.w;

    var offsets = array<vec2<f32>, 16>(
        vec2<f32>( 1.0,  1.0),
        vec2<f32>(-1.0, -3.0),
        vec2<f32>(-3.0,  2.0),
        vec2<f32>( 4.0, -1.0),
        vec2<f32>(-5.0, -2.0),
        vec2<f32>( 2.0,  5.0),
        vec2<f32>( 5.0,  3.0),
        vec2<f32>( 3.0, -5.0),
        vec2<f32>(-2.0,  6.0),
        vec2<f32>( 0.0, -7.0),
        vec2<f32>(-4.0, -6.0),
        vec2<f32>(-6.0,  4.0),
        vec2<f32>(-8.0,  0.0),
        vec2<f32>( 7.0, -4.0),
        vec2<f32>( 6.0,  7.0),
        vec2<f32>(-7.0, -8.0),
    );

    var x = 0.0;
    for (var i = 0u; i < 16u; i = i + 1u) {
        let r = length(in.tc + offsets[i] * (brush.params.z / 8.0));
        x = x + step(r, e0) - step(r, e1);
    }
    x = x / 16.0;

    return vec4<f32>(x) * 0.5;
}
"#;

/// Instanced stroke ribbon. Per-vertex `pos` comes from the shared ribbon
/// mesh: xy is the offset in units of thickness along/across the segment,
/// z picks the segment endpoint. Each instance is one segment.
pub const STROKE_SHADER: &str = r#"
struct View {
    transform: vec4<f32>,
    inv_scale: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

struct StrokeStyle {
    color: vec4<f32>,
    thickness: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> view: View;
@group(1) @binding(0) var<uniform> style: StrokeStyle;

@vertex
fn vs_main(
    @location(0) pos: vec3<f32>,
    @location(1) point0: vec2<f32>,
    @location(2) point1: vec2<f32>,
) -> @builtin(position) vec4<f32> {
    let d = point1 - point0;
    let len = length(d);
    // repeated points still get round caps
    let x_basis = select(vec2<f32>(1.0, 0.0), d / len, len > 1e-6);
    let y_basis = vec2<f32>(-x_basis.y, x_basis.x);
    let offset = style.thickness * (pos.x * x_basis + pos.y * y_basis);
    let point = mix(point0 + offset, point1 + offset, pos.z);
    return vec4<f32>(point * view.transform.xy + view.transform.zw, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return style.color;
}
"#;

/// Darkens the scene where the mask target has been painted:
///   t = 1 - mask;  alpha = t.a * 0.5;  out = (t.rgb * alpha, alpha)
pub const MASK_COMPOSITE_SHADER: &str = r#"
@group(0) @binding(0) var t_mask: texture_2d<f32>;
@group(0) @binding(1) var s_mask: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(2.0, 0.0),
        vec2<f32>(0.0, 2.0),
    );
    let tc = corners[vi];
    var out: VertexOutput;
    out.position = vec4<f32>(tc.x * 2.0 - 1.0, tc.y * -2.0 + 1.0, 0.0, 1.0);
    out.uv = tc;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let t = vec4<f32>(1.0) - textureSample(t_mask, s_mask, in.uv);
    let a = t.w * 0.5;
    return vec4<f32>(t.xyz * a, a);
}
"#;

/// One mip level from the level above it: each output texel averages the
/// 2x2 footprint it covers, clamped at odd edges.
pub const MIPMAP_SHADER: &str = r#"
@group(0) @binding(0) var upper: texture_2d<f32>;
@group(0) @binding(1) var lower: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(8, 8)
fn cs_downsample(@builtin(global_invocation_id) id: vec3<u32>) {
    let out_size = textureDimensions(lower);
    if (any(id.xy >= out_size)) {
        return;
    }
    let last = textureDimensions(upper, 0) - vec2<u32>(1u);
    let base = id.xy * 2u;

    var sum = vec4<f32>(0.0);
    for (var k = 0u; k < 4u; k = k + 1u) {
        let texel = min(base + vec2<u32>(k & 1u, k >> 1u), last);
        sum = sum + textureLoad(upper, texel, 0);
    }
    textureStore(lower, id.xy, sum * 0.25);
}
"#;
