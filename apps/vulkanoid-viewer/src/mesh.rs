//! Built-in geometry and the fallback texture.

use glam::{Vec2, Vec3};
use vulkanoid_gpu::Vertex;

/// A unit cube centered on the origin with per-face normals and UVs.
///
/// Faces wind counter-clockwise seen from outside.
pub fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, tangent u, tangent v) per face; u x v == normal.
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(faces.len() * 4);
    let mut indices = Vec::with_capacity(faces.len() * 6);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        let center = normal * 0.5;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            vertices.push(Vertex::new(
                center + u * su + v * sv,
                normal,
                Vec2::new(su + 0.5, 0.5 - sv),
            ));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    (vertices, indices)
}

/// RGBA8 checkerboard of `cells` x `cells` squares.
pub fn checkerboard(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            if (x / cell + y / cell) % 2 == 0 {
                [230, 230, 230, 255]
            } else {
                [40, 40, 40, 255]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_outward() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));

        for tri in indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| vertices[tri[k] as usize]);
            let face_normal = (b.position - a.position).cross(c.position - a.position);
            assert!(face_normal.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn checkerboard_alternates() {
        let pixels = checkerboard(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        let texel = |x: usize, y: usize| pixels[(y * 4 + x) * 4];
        assert_eq!(texel(0, 0), 230);
        assert_eq!(texel(2, 0), 40);
        assert_eq!(texel(2, 2), 230);
    }
}
