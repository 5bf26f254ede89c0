//! Column-major 4x4 matrix helpers and the preview camera.
//!
//! Matrices are `[f32; 16]` laid out to match WGSL `mat4x4f` constructed from
//! four column vectors, so `m * vec4f(p, 1.0)` in a shader applies them.

const EPSILON: f32 = 1e-6;

pub const IDENTITY_MAT4: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

pub fn mat4_mul(a: [f32; 16], b: [f32; 16]) -> [f32; 16] {
    // out[r,c] = sum_k a[r,k] * b[k,c], idx(r,c) = c*4 + r
    let mut out = [0.0f32; 16];
    for c in 0..4 {
        for r in 0..4 {
            out[c * 4 + r] = a[r] * b[c * 4]
                + a[4 + r] * b[c * 4 + 1]
                + a[8 + r] * b[c * 4 + 2]
                + a[12 + r] * b[c * 4 + 3];
        }
    }
    out
}

pub fn mat4_translate(tx: f32, ty: f32, tz: f32) -> [f32; 16] {
    [
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, tx, ty, tz, 1.0,
    ]
}

pub fn mat4_scale(sx: f32, sy: f32, sz: f32) -> [f32; 16] {
    [
        sx, 0.0, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 0.0, sz, 0.0, 0.0, 0.0, 0.0, 1.0,
    ]
}

pub fn mat4_rotate_z(rad: f32) -> [f32; 16] {
    let c = rad.cos();
    let s = rad.sin();
    [
        c, s, 0.0, 0.0, -s, c, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ]
}

/// Applies a column-major matrix to a point.
pub fn mat4_transform_point(m: &[f32; 16], p: [f32; 3]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (r, slot) in out.iter_mut().enumerate() {
        *slot = m[r] * p[0] + m[4 + r] * p[1] + m[8 + r] * p[2] + m[12 + r];
    }
    out
}

fn perspective_rh_zo_matrix(fovy_radians: f32, aspect: f32, near: f32, far: f32) -> [f32; 16] {
    let f = 1.0 / (0.5 * fovy_radians).tan();
    let z_scale = far / (near - far);
    let z_translate = (far * near) / (near - far);

    [
        f / aspect,
        0.0,
        0.0,
        0.0,
        0.0,
        f,
        0.0,
        0.0,
        0.0,
        0.0,
        z_scale,
        -1.0,
        0.0,
        0.0,
        z_translate,
        0.0,
    ]
}

fn vec3_sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn vec3_dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn vec3_cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn vec3_normalize(v: [f32; 3]) -> Option<[f32; 3]> {
    let len = vec3_dot(v, v).sqrt();
    if !(len > EPSILON) {
        return None;
    }
    Some([v[0] / len, v[1] / len, v[2] / len])
}

/// Right-handed view matrix. `None` when `position == target` or `up` is
/// parallel to the view direction.
pub fn look_at_view_matrix(position: [f32; 3], target: [f32; 3], up: [f32; 3]) -> Option<[f32; 16]> {
    let forward = vec3_normalize(vec3_sub(target, position))?;
    let up_norm = vec3_normalize(up)?;
    let right = vec3_normalize(vec3_cross(forward, up_norm))?;
    let true_up = vec3_cross(right, forward);

    Some([
        right[0],
        true_up[0],
        -forward[0],
        0.0,
        right[1],
        true_up[1],
        -forward[1],
        0.0,
        right[2],
        true_up[2],
        -forward[2],
        0.0,
        -vec3_dot(right, position),
        -vec3_dot(true_up, position),
        vec3_dot(forward, position),
        1.0,
    ])
}

/// View-projection used by the lit preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub view_proj: [f32; 16],
}

impl Camera {
    pub const FOVY_DEGREES: f32 = 45.0;

    pub fn from_matrix(view_proj: [f32; 16]) -> Self {
        Self { view_proj }
    }

    /// Orbits the origin of the ground plane. Angles are in degrees; pitch is
    /// clamped short of the poles.
    pub fn orbit(yaw_deg: f32, pitch_deg: f32, distance: f32, aspect: f32) -> Self {
        let yaw = yaw_deg.to_radians();
        let pitch = pitch_deg.clamp(-89.0, 89.0).to_radians();
        let distance = if distance.is_finite() && distance > EPSILON {
            distance
        } else {
            1.0
        };
        let aspect = if aspect.is_finite() && aspect > EPSILON {
            aspect
        } else {
            1.0
        };

        let position = [
            distance * pitch.cos() * yaw.sin(),
            distance * pitch.sin(),
            distance * pitch.cos() * yaw.cos(),
        ];
        let view = look_at_view_matrix(position, [0.0, 0.0, 0.0], [0.0, 1.0, 0.0])
            .unwrap_or(IDENTITY_MAT4);
        let proj = perspective_rh_zo_matrix(
            Self::FOVY_DEGREES.to_radians(),
            aspect,
            0.05,
            distance * 4.0 + 10.0,
        );
        Self {
            view_proj: mat4_mul(proj, view),
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Camera::orbit(30.0, 45.0, 2.6, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn trs_composes_right_to_left() {
        let m = mat4_mul(
            mat4_translate(1.0, 2.0, 0.0),
            mat4_mul(mat4_rotate_z(std::f32::consts::FRAC_PI_2), mat4_scale(2.0, 2.0, 1.0)),
        );
        let p = mat4_transform_point(&m, [1.0, 0.0, 0.0]);
        // scale -> (2,0), rotate 90deg -> (0,2), translate -> (1,4)
        assert!(approx(p[0], 1.0) && approx(p[1], 4.0), "{p:?}");
    }

    #[test]
    fn orbit_camera_projects_origin_to_screen_center() {
        let cam = Camera::orbit(30.0, 45.0, 3.0, 1.5);
        let clip = mat4_transform_point(&cam.view_proj, [0.0, 0.0, 0.0]);
        assert!(clip[3] > 0.0);
        assert!(approx(clip[0] / clip[3], 0.0));
        assert!(approx(clip[1] / clip[3], 0.0));
        let depth = clip[2] / clip[3];
        assert!((0.0..=1.0).contains(&depth), "depth {depth}");
    }

    #[test]
    fn orbit_straight_down_stays_finite() {
        let cam = Camera::orbit(0.0, 90.0, 2.0, 1.0);
        assert!(cam.view_proj.iter().all(|v| v.is_finite()));
        assert_ne!(cam.view_proj, IDENTITY_MAT4);
    }
}
