//! Instance placement for the scatter and tile painters.
//!
//! Positions are in clip space (`[-1, 1]` on both axes) and the instanced
//! quad spans `[-0.5, 0.5]`, so a scale of `2.0` covers the whole target.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::{
    material::{Node, json_count, json_seed},
    renderer::{
        blend::BlendMode,
        camera::{mat4_mul, mat4_rotate_z, mat4_scale, mat4_translate},
    },
    schema::NodeSpec,
};

/// Upper bound on instances per node; larger counts are clamped.
pub const MAX_INSTANCES: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceElement {
    /// Degrees, counter-clockwise.
    pub rotation: f32,
    pub translation: [f32; 2],
    pub scale: [f32; 2],
}

impl InstanceElement {
    /// Column-major `T * R * S`.
    pub fn matrix(&self) -> [f32; 16] {
        mat4_mul(
            mat4_translate(self.translation[0], self.translation[1], 0.0),
            mat4_mul(
                mat4_rotate_z(self.rotation.to_radians()),
                mat4_scale(self.scale[0], self.scale[1], 1.0),
            ),
        )
    }
}

fn param_count(spec: &NodeSpec, node: &Node, id: &str, default: u32) -> u32 {
    let count = spec
        .param_value(node, id)
        .and_then(json_count)
        .unwrap_or(default as u64);
    if count > MAX_INSTANCES as u64 {
        log::warn!(
            "node {}: '{id}' = {count} exceeds {MAX_INSTANCES}; clamping",
            node.id
        );
        return MAX_INSTANCES;
    }
    count as u32
}

fn param_blend(spec: &NodeSpec, node: &Node) -> BlendMode {
    match spec.param_str(node, "blendMode") {
        Some(s) => BlendMode::parse_or_none(s, &format!("node {} blendMode", node.id)),
        None => BlendMode::None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterParams {
    pub seed: u64,
    pub amount: u32,
    pub spread: [f32; 2],
    /// Maximum rotation in degrees.
    pub random_rotation: f32,
    pub random_scale: f32,
    pub size: f32,
    pub blend: BlendMode,
}

impl ScatterParams {
    pub fn from_node(spec: &NodeSpec, node: &Node) -> ScatterParams {
        ScatterParams {
            seed: spec
                .param_value(node, "seed")
                .and_then(json_seed)
                .unwrap_or(0),
            amount: param_count(spec, node, "amount", 0),
            spread: [
                spec.param_f32(node, "spreadX", 2.0),
                spec.param_f32(node, "spreadY", 2.0),
            ],
            random_rotation: spec.param_f32(node, "randomRotation", 0.0),
            random_scale: spec.param_f32(node, "randomScale", 0.0),
            size: spec.param_f32(node, "size", 0.2),
            blend: param_blend(spec, node),
        }
    }
}

/// Per instance the generator draws x, y, rotation, then scale.
pub fn scatter_elements(params: &ScatterParams) -> Vec<InstanceElement> {
    let mut rng = Pcg32::seed_from_u64(params.seed);
    let [spread_x, spread_y] = params.spread;
    (0..params.amount)
        .map(|_| {
            let x = rng.random::<f32>() * spread_x - spread_x / 2.0;
            let y = rng.random::<f32>() * spread_y - spread_y / 2.0;
            let rotation = rng.random::<f32>() * params.random_rotation;
            let scale = params.size + (2.0 * rng.random::<f32>() - 1.0) * params.random_scale;
            InstanceElement {
                rotation,
                translation: [x, y],
                scale: [scale, scale],
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileParams {
    pub amount: [u32; 2],
    pub offset: [f32; 2],
    pub size: f32,
    pub rotation: f32,
    pub blend: BlendMode,
}

impl TileParams {
    pub fn from_node(spec: &NodeSpec, node: &Node) -> TileParams {
        TileParams {
            amount: [
                param_count(spec, node, "amountX", 1),
                param_count(spec, node, "amountY", 1),
            ],
            offset: [
                spec.param_f32(node, "offsetX", 0.0),
                spec.param_f32(node, "offsetY", 0.0),
            ],
            size: spec.param_f32(node, "size", 1.0),
            rotation: spec.param_f32(node, "rotation", 0.0),
            blend: param_blend(spec, node),
        }
    }
}

/// Row-major grid of cell-centered instances covering clip space.
pub fn tile_elements(params: &TileParams) -> Vec<InstanceElement> {
    let [nx, ny] = params.amount;
    if nx == 0 || ny == 0 {
        return Vec::new();
    }
    let total = nx as u64 * ny as u64;
    if total > MAX_INSTANCES as u64 {
        log::warn!("tile grid {nx}x{ny} exceeds {MAX_INSTANCES} instances; truncating");
    }

    let cell = [2.0 / nx as f32, 2.0 / ny as f32];
    let mut out = Vec::with_capacity(total.min(MAX_INSTANCES as u64) as usize);
    'rows: for row in 0..ny {
        for col in 0..nx {
            if out.len() >= MAX_INSTANCES as usize {
                break 'rows;
            }
            out.push(InstanceElement {
                rotation: params.rotation,
                translation: [
                    -1.0 + (col as f32 + 0.5) * cell[0] + params.offset[0],
                    1.0 - (row as f32 + 0.5) * cell[1] + params.offset[1],
                ],
                scale: [params.size * cell[0], params.size * cell[1]],
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::camera::mat4_transform_point;

    fn scatter(seed: u64, amount: u32) -> ScatterParams {
        ScatterParams {
            seed,
            amount,
            spread: [2.0, 1.0],
            random_rotation: 90.0,
            random_scale: 0.1,
            size: 0.2,
            blend: BlendMode::None,
        }
    }

    #[test]
    fn scatter_consumes_rng_in_x_y_rotation_scale_order() {
        let params = scatter(42, 1);
        let mut rng = Pcg32::seed_from_u64(42);
        let (x, y, r, s): (f32, f32, f32, f32) =
            (rng.random(), rng.random(), rng.random(), rng.random());

        let e = scatter_elements(&params)[0];
        assert_eq!(e.translation, [x * 2.0 - 1.0, y - 0.5]);
        assert_eq!(e.rotation, r * 90.0);
        assert_eq!(e.scale[0], 0.2 + (2.0 * s - 1.0) * 0.1);
    }

    #[test]
    fn seeded_generator_sequence_is_pinned() {
        use rand::RngCore;

        let mut rng = Pcg32::seed_from_u64(42);
        assert_eq!(
            [rng.next_u32(), rng.next_u32(), rng.next_u32()],
            [3400036912, 3349765444, 515166382]
        );
    }

    #[test]
    fn scatter_stays_inside_spread() {
        for e in scatter_elements(&scatter(3, 500)) {
            assert!((-1.0..1.0).contains(&e.translation[0]));
            assert!((-0.5..0.5).contains(&e.translation[1]));
            assert!((0.0..90.0).contains(&e.rotation));
            assert!((0.1..=0.3).contains(&e.scale[0]));
        }
    }

    #[test]
    fn zero_amount_produces_no_instances() {
        assert!(scatter_elements(&scatter(1, 0)).is_empty());
        let tile = TileParams {
            amount: [0, 4],
            offset: [0.0, 0.0],
            size: 1.0,
            rotation: 0.0,
            blend: BlendMode::None,
        };
        assert!(tile_elements(&tile).is_empty());
    }

    #[test]
    fn tile_grid_is_cell_centered() {
        let params = TileParams {
            amount: [2, 2],
            offset: [0.1, 0.0],
            size: 0.5,
            rotation: 0.0,
            blend: BlendMode::Add,
        };
        let elements = tile_elements(&params);
        assert_eq!(elements.len(), 4);
        assert_eq!(elements[0].translation, [-0.5 + 0.1, 0.5]);
        assert_eq!(elements[3].translation, [0.5 + 0.1, -0.5]);
        assert_eq!(elements[0].scale, [0.5, 0.5]);

        // The quad corner (0.5, 0.5) lands a quarter cell from the center.
        let corner = mat4_transform_point(&elements[3].matrix(), [0.5, 0.5, 0.0]);
        assert!((corner[0] - 0.85).abs() < 1e-6);
        assert!((corner[1] - -0.25).abs() < 1e-6);
    }
}
