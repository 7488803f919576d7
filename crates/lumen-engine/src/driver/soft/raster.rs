//! Triangle setup and scan conversion.

use std::collections::BTreeMap;

/// RGBA colour plus depth, row-major with the origin at the top-left.
#[derive(Debug, Clone, PartialEq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    color: Vec<[f32; 4]>,
    depth: Vec<f32>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![[0.0, 0.0, 0.0, 1.0]; len],
            depth: vec![1.0; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fills colour with `color` and depth with the far plane.
    pub fn clear(&mut self, color: [f32; 4]) {
        self.color.fill(color);
        self.depth.fill(1.0);
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        self.index(x, y).map(|i| self.color[i])
    }

    pub fn depth(&self, x: u32, y: u32) -> Option<f32> {
        self.index(x, y).map(|i| self.depth[i])
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.color
    }

    /// Colour quantised to 8-bit RGBA.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.color
            .iter()
            .flat_map(|px| px.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect()
    }
}

/// Vertex-stage output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClipVertex {
    pub position: [f32; 4],
    pub varyings: BTreeMap<u32, Vec<f32>>,
}

/// Interpolated input to one fragment invocation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fragment {
    /// Window-space `(x, y, depth, 1/w)` at the pixel centre.
    pub frag_coord: [f32; 4],
    pub front_facing: bool,
    pub varyings: BTreeMap<u32, Vec<f32>>,
}

struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// Scan-converts one triangle, calling `shade` for every covered pixel.
///
/// `shade` returns `None` for discarded fragments. Triangles with a vertex
/// behind the eye (`w <= 0`) or zero area are dropped. Returns the number of
/// fragments written.
pub(crate) fn rasterize<E>(
    target: &mut Framebuffer,
    triangle: &[ClipVertex; 3],
    depth_test: bool,
    mut shade: impl FnMut(&Fragment) -> Result<Option<[f32; 4]>, E>,
) -> Result<usize, E> {
    if triangle.iter().any(|v| v.position[3] <= 0.0) {
        return Ok(0);
    }

    let (w, h) = (target.width as f32, target.height as f32);
    let screen = triangle.each_ref().map(|v| {
        let inv_w = 1.0 / v.position[3];
        let ndc = [v.position[0] * inv_w, v.position[1] * inv_w, v.position[2] * inv_w];
        ScreenVertex {
            x: (ndc[0] * 0.5 + 0.5) * w,
            y: (1.0 - (ndc[1] * 0.5 + 0.5)) * h,
            z: ndc[2],
            inv_w,
        }
    });
    let [s0, s1, s2] = &screen;
    let (p0, p1, p2) = ((s0.x, s0.y), (s1.x, s1.y), (s2.x, s2.y));

    let area = edge(p0, p1, p2);
    if area == 0.0 {
        return Ok(0);
    }
    // Screen y points down, so counter-clockwise in NDC has negative area here.
    let front_facing = area < 0.0;

    let min_x = p0.0.min(p1.0).min(p2.0).floor().max(0.0) as u32;
    let min_y = p0.1.min(p1.1).min(p2.1).floor().max(0.0) as u32;
    let max_x = p0.0.max(p1.0).max(p2.0).ceil().min(w) as u32;
    let max_y = p0.1.max(p1.1).max(p2.1).ceil().min(h) as u32;

    let mut written = 0;
    for py in min_y..max_y {
        for px in min_x..max_x {
            let p = (px as f32 + 0.5, py as f32 + 0.5);
            let b = [edge(p1, p2, p) / area, edge(p2, p0, p) / area, edge(p0, p1, p) / area];
            if b.iter().any(|&b| b < 0.0) {
                continue;
            }

            let z = b[0] * s0.z + b[1] * s1.z + b[2] * s2.z;
            if !(0.0..=1.0).contains(&z) {
                continue;
            }

            let Some(index) = target.index(px, py) else { continue };
            if depth_test && z >= target.depth[index] {
                continue;
            }

            let inv_w = b[0] * s0.inv_w + b[1] * s1.inv_w + b[2] * s2.inv_w;
            let weights = [
                b[0] * s0.inv_w / inv_w,
                b[1] * s1.inv_w / inv_w,
                b[2] * s2.inv_w / inv_w,
            ];

            let fragment = Fragment {
                frag_coord: [p.0, p.1, z, inv_w],
                front_facing,
                varyings: interpolate(triangle, weights),
            };

            if let Some(color) = shade(&fragment)? {
                target.color[index] = color;
                if depth_test {
                    target.depth[index] = z;
                }
                written += 1;
            }
        }
    }

    Ok(written)
}

fn interpolate(triangle: &[ClipVertex; 3], weights: [f32; 3]) -> BTreeMap<u32, Vec<f32>> {
    triangle[0]
        .varyings
        .iter()
        .map(|(&location, first)| {
            let values = (0..first.len())
                .map(|i| {
                    triangle
                        .iter()
                        .zip(weights)
                        .map(|(v, w)| v.varyings.get(&location).and_then(|c| c.get(i)).unwrap_or(&0.0) * w)
                        .sum::<f32>()
                })
                .collect();
            (location, values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    fn vertex(x: f32, y: f32, z: f32, colour: f32) -> ClipVertex {
        ClipVertex {
            position: [x, y, z, 1.0],
            varyings: BTreeMap::from([(0, vec![colour])]),
        }
    }

    fn fill(
        fb: &mut Framebuffer,
        tri: &[ClipVertex; 3],
        depth_test: bool,
        colour: [f32; 4],
    ) -> usize {
        rasterize::<Infallible>(fb, tri, depth_test, |_| Ok(Some(colour))).unwrap()
    }

    #[test]
    fn covers_the_centre_in_both_windings() {
        let ccw = [vertex(-1.0, -1.0, 0.5, 0.0), vertex(1.0, -1.0, 0.5, 0.0), vertex(0.0, 1.0, 0.5, 0.0)];
        let cw = [ccw[0].clone(), ccw[2].clone(), ccw[1].clone()];

        for tri in [ccw, cw] {
            let mut fb = Framebuffer::new(8, 8);
            assert!(fill(&mut fb, &tri, false, [1.0, 0.0, 0.0, 1.0]) > 0);
            assert_eq!(fb.pixel(4, 4), Some([1.0, 0.0, 0.0, 1.0]));
            assert_eq!(fb.pixel(0, 0), Some([0.0, 0.0, 0.0, 1.0]));
        }
    }

    #[test]
    fn top_of_ndc_is_top_of_framebuffer() {
        // Triangle covering only the upper half of the screen.
        let tri = [vertex(-1.0, 0.0, 0.5, 0.0), vertex(1.0, 0.0, 0.5, 0.0), vertex(0.0, 1.0, 0.5, 0.0)];
        let mut fb = Framebuffer::new(8, 8);
        fill(&mut fb, &tri, false, [1.0; 4]);
        assert_eq!(fb.pixel(4, 2), Some([1.0; 4]));
        assert_eq!(fb.pixel(4, 6), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn front_facing_tracks_winding() {
        let ccw = [vertex(-1.0, -1.0, 0.5, 0.0), vertex(1.0, -1.0, 0.5, 0.0), vertex(0.0, 1.0, 0.5, 0.0)];
        let mut fb = Framebuffer::new(4, 4);
        let mut facing = None;
        rasterize::<Infallible>(&mut fb, &ccw, false, |f| {
            facing = Some(f.front_facing);
            Ok(Some([1.0; 4]))
        })
        .unwrap();
        assert_eq!(facing, Some(true));
    }

    #[test]
    fn depth_test_keeps_nearest() {
        let near = [vertex(-1.0, -1.0, 0.2, 0.0), vertex(3.0, -1.0, 0.2, 0.0), vertex(-1.0, 3.0, 0.2, 0.0)];
        let far = [vertex(-1.0, -1.0, 0.8, 0.0), vertex(3.0, -1.0, 0.8, 0.0), vertex(-1.0, 3.0, 0.8, 0.0)];

        let mut fb = Framebuffer::new(4, 4);
        fill(&mut fb, &near, true, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(fill(&mut fb, &far, true, [1.0, 0.0, 0.0, 1.0]), 0);
        assert_eq!(fb.pixel(1, 1), Some([0.0, 1.0, 0.0, 1.0]));
        assert!((fb.depth(1, 1).unwrap() - 0.2).abs() < 1e-6);

        fb.clear([0.0; 4]);
        assert_eq!(fb.depth(1, 1), Some(1.0));
    }

    #[test]
    fn behind_the_eye_is_dropped() {
        let mut tri = [vertex(-1.0, -1.0, 0.5, 0.0), vertex(1.0, -1.0, 0.5, 0.0), vertex(0.0, 1.0, 0.5, 0.0)];
        tri[1].position[3] = -1.0;
        let mut fb = Framebuffer::new(4, 4);
        assert_eq!(fill(&mut fb, &tri, false, [1.0; 4]), 0);
    }

    #[test]
    fn varyings_are_interpolated() {
        let tri = [vertex(-1.0, -1.0, 0.5, 0.0), vertex(3.0, -1.0, 0.5, 1.0), vertex(-1.0, 3.0, 0.5, 0.0)];
        let mut fb = Framebuffer::new(2, 2);
        let mut seen = Vec::new();
        rasterize::<Infallible>(&mut fb, &tri, false, |f| {
            seen.push((f.frag_coord[0], f.varyings[&0][0]));
            Ok(None)
        })
        .unwrap();

        // x = 0.5 maps to ndc -0.5, a quarter of the way along the 0..1 edge.
        let (_, value) = seen.iter().find(|(x, _)| *x == 0.5).unwrap();
        assert!((value - 0.125).abs() < 1e-5);
        assert_eq!(fb.pixel(0, 0), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn rgba8_quantises() {
        let mut fb = Framebuffer::new(1, 1);
        fb.clear([1.0, 0.5, 2.0, -1.0]);
        assert_eq!(fb.to_rgba8(), vec![255, 128, 255, 0]);
    }
}
