use nalgebra::{Point2, Vector2};
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryType {
    Inlet,
    Outlet,
    Wall,
}

/// Unstructured polygonal mesh in SoA layout.
///
/// Faces are stored once with an owner cell and an optional neighbour;
/// face normals point from owner to neighbour (outward of the owner for
/// boundary faces). Connectivity is flat: `cell_faces` holds the face ids
/// of cell `i` in `cell_face_offsets[i]..cell_face_offsets[i + 1]`.
#[derive(Default, Clone)]
pub struct Mesh {
    // Vertices
    pub vx: Vec<f64>,
    pub vy: Vec<f64>,

    // Faces
    pub face_v1: Vec<usize>,
    pub face_v2: Vec<usize>,
    pub face_owner: Vec<usize>,
    pub face_neighbor: Vec<Option<usize>>,
    pub face_boundary: Vec<Option<BoundaryType>>,
    pub face_nx: Vec<f64>,
    pub face_ny: Vec<f64>,
    pub face_area: Vec<f64>,
    pub face_cx: Vec<f64>,
    pub face_cy: Vec<f64>,

    // Cells
    pub cell_cx: Vec<f64>,
    pub cell_cy: Vec<f64>,
    pub cell_vol: Vec<f64>,

    // Connectivity
    pub cell_faces: Vec<usize>,
    pub cell_face_offsets: Vec<usize>,

    pub cell_vertices: Vec<usize>,
    pub cell_vertex_offsets: Vec<usize>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_cells(&self) -> usize {
        self.cell_cx.len()
    }

    pub fn num_faces(&self) -> usize {
        self.face_cx.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.vx.len()
    }

    /// Face area vector, oriented owner -> neighbour.
    pub fn face_sf(&self, f: usize) -> Vector2<f64> {
        Vector2::new(self.face_nx[f], self.face_ny[f]) * self.face_area[f]
    }

    /// Cell-to-cell vector across face `f`: owner centroid to neighbour
    /// centroid, or owner centroid to face centroid on the boundary.
    pub fn face_delta(&self, f: usize) -> Vector2<f64> {
        let o = self.face_owner[f];
        let from = Vector2::new(self.cell_cx[o], self.cell_cy[o]);
        let to = match self.face_neighbor[f] {
            Some(n) => Vector2::new(self.cell_cx[n], self.cell_cy[n]),
            None => Vector2::new(self.face_cx[f], self.face_cy[f]),
        };
        to - from
    }

    /// Linear interpolation factor of an interior face: the weight of the
    /// neighbour value, so `val_f = val_own + w * (val_neigh - val_own)`.
    pub fn interp_factor(&self, f: usize) -> f64 {
        let o = self.face_owner[f];
        let n = self.face_neighbor[f].expect("interior face");
        let fc = Point2::new(self.face_cx[f], self.face_cy[f]);
        let co = Point2::new(self.cell_cx[o], self.cell_cy[o]);
        let cn = Point2::new(self.cell_cx[n], self.cell_cy[n]);
        let d_own = (fc - co).norm();
        let d_neigh = (fc - cn).norm();
        d_own / (d_own + d_neigh)
    }

    /// Recompute face and cell geometry from vertex positions. Normal
    /// orientation (owner -> neighbour) is preserved.
    pub fn recalculate_geometry(&mut self) {
        let vx = &self.vx;
        let vy = &self.vy;
        let face_v1 = &self.face_v1;
        let face_v2 = &self.face_v2;

        self.face_cx
            .par_iter_mut()
            .zip(&mut self.face_cy)
            .zip(&mut self.face_area)
            .zip(&mut self.face_nx)
            .zip(&mut self.face_ny)
            .enumerate()
            .for_each(|(i, ((((cx, cy), area), nx), ny))| {
                let v0 = Point2::new(vx[face_v1[i]], vy[face_v1[i]]);
                let v1 = Point2::new(vx[face_v2[i]], vy[face_v2[i]]);

                let center = Point2::from((v0.coords + v1.coords) * 0.5);
                *cx = center.x;
                *cy = center.y;

                let edge = v1 - v0;
                *area = edge.norm();

                let tangent = edge.normalize();
                let mut normal = Vector2::new(tangent.y, -tangent.x);
                if normal.dot(&Vector2::new(*nx, *ny)) < 0.0 {
                    normal = -normal;
                }
                *nx = normal.x;
                *ny = normal.y;
            });

        let cell_vertex_offsets = &self.cell_vertex_offsets;
        let cell_vertices = &self.cell_vertices;

        self.cell_cx
            .par_iter_mut()
            .zip(&mut self.cell_cy)
            .zip(&mut self.cell_vol)
            .enumerate()
            .for_each(|(i, ((cx_out, cy_out), vol_out))| {
                let start = cell_vertex_offsets[i];
                let end = cell_vertex_offsets[i + 1];
                let n = end - start;

                // Shoelace area and centroid
                let mut signed_area = 0.0;
                let mut c_x = 0.0;
                let mut c_y = 0.0;
                for k in 0..n {
                    let i0 = cell_vertices[start + k];
                    let i1 = cell_vertices[start + (k + 1) % n];
                    let cross = vx[i0] * vy[i1] - vx[i1] * vy[i0];
                    signed_area += cross;
                    c_x += (vx[i0] + vx[i1]) * cross;
                    c_y += (vy[i0] + vy[i1]) * cross;
                }
                signed_area *= 0.5;
                let area = signed_area.abs();

                if area > 1e-12 {
                    *cx_out = c_x / (6.0 * signed_area);
                    *cy_out = c_y / (6.0 * signed_area);
                } else {
                    let mut sx = 0.0;
                    let mut sy = 0.0;
                    for k in 0..n {
                        sx += vx[cell_vertices[start + k]];
                        sy += vy[cell_vertices[start + k]];
                    }
                    *cx_out = sx / n as f64;
                    *cy_out = sy / n as f64;
                }
                *vol_out = area;
            });
    }

    /// Worst face skewness: 1 - |d_hat . n|, zero on an orthogonal mesh.
    pub fn max_skewness(&self) -> f64 {
        (0..self.num_faces())
            .into_par_iter()
            .map(|f| {
                let d = self.face_delta(f);
                if d.norm_squared() < 1e-12 {
                    return 0.0;
                }
                let n = Vector2::new(self.face_nx[f], self.face_ny[f]);
                1.0 - d.normalize().dot(&n).abs()
            })
            .reduce(|| 0.0, f64::max)
    }

    fn push_face(
        &mut self,
        v1: usize,
        v2: usize,
        owner: usize,
        neighbor: Option<usize>,
        boundary: Option<BoundaryType>,
        normal: Vector2<f64>,
        area: f64,
    ) {
        self.face_v1.push(v1);
        self.face_v2.push(v2);
        self.face_owner.push(owner);
        self.face_neighbor.push(neighbor);
        self.face_boundary.push(boundary);
        self.face_nx.push(normal.x);
        self.face_ny.push(normal.y);
        self.face_area.push(area);
        self.face_cx.push(0.5 * (self.vx[v1] + self.vx[v2]));
        self.face_cy.push(0.5 * (self.vy[v1] + self.vy[v2]));
    }

    fn rebuild_cell_faces(&mut self) {
        let n_cells = self.num_cells();
        let mut per_cell: Vec<Vec<usize>> = vec![Vec::new(); n_cells];
        for f in 0..self.num_faces() {
            per_cell[self.face_owner[f]].push(f);
            if let Some(n) = self.face_neighbor[f] {
                per_cell[n].push(f);
            }
        }
        self.cell_faces.clear();
        self.cell_face_offsets = vec![0; n_cells + 1];
        for (i, faces) in per_cell.iter().enumerate() {
            self.cell_faces.extend_from_slice(faces);
            self.cell_face_offsets[i + 1] = self.cell_faces.len();
        }
    }

    /// Uniform `nx` x `ny` quad mesh over `lx` x `ly` with per-side patch
    /// types `(left, right, bottom, top)`.
    pub fn rectangular(
        nx: usize,
        ny: usize,
        lx: f64,
        ly: f64,
        patches: (BoundaryType, BoundaryType, BoundaryType, BoundaryType),
    ) -> Self {
        assert!(nx > 0 && ny > 0);
        let (left, right, bottom, top) = patches;
        let dx = lx / nx as f64;
        let dy = ly / ny as f64;
        let vid = |i: usize, j: usize| j * (nx + 1) + i;
        let cid = |i: usize, j: usize| j * nx + i;

        let mut mesh = Mesh::new();
        for j in 0..=ny {
            for i in 0..=nx {
                mesh.vx.push(i as f64 * dx);
                mesh.vy.push(j as f64 * dy);
            }
        }

        for j in 0..ny {
            for i in 0..nx {
                mesh.cell_cx.push((i as f64 + 0.5) * dx);
                mesh.cell_cy.push((j as f64 + 0.5) * dy);
                mesh.cell_vol.push(dx * dy);
                mesh.cell_vertex_offsets.push(mesh.cell_vertices.len());
                mesh.cell_vertices.extend_from_slice(&[
                    vid(i, j),
                    vid(i + 1, j),
                    vid(i + 1, j + 1),
                    vid(i, j + 1),
                ]);
            }
        }
        mesh.cell_vertex_offsets.push(mesh.cell_vertices.len());

        // Vertical faces (normals along x)
        for j in 0..ny {
            for i in 0..=nx {
                let v1 = vid(i, j);
                let v2 = vid(i, j + 1);
                if i == 0 {
                    mesh.push_face(v1, v2, cid(0, j), None, Some(left), Vector2::new(-1.0, 0.0), dy);
                } else if i == nx {
                    mesh.push_face(v1, v2, cid(nx - 1, j), None, Some(right), Vector2::new(1.0, 0.0), dy);
                } else {
                    mesh.push_face(v1, v2, cid(i - 1, j), Some(cid(i, j)), None, Vector2::new(1.0, 0.0), dy);
                }
            }
        }

        // Horizontal faces (normals along y)
        for j in 0..=ny {
            for i in 0..nx {
                let v1 = vid(i, j);
                let v2 = vid(i + 1, j);
                if j == 0 {
                    mesh.push_face(v1, v2, cid(i, 0), None, Some(bottom), Vector2::new(0.0, -1.0), dx);
                } else if j == ny {
                    mesh.push_face(v1, v2, cid(i, ny - 1), None, Some(top), Vector2::new(0.0, 1.0), dx);
                } else {
                    mesh.push_face(v1, v2, cid(i, j - 1), Some(cid(i, j)), None, Vector2::new(0.0, 1.0), dx);
                }
            }
        }

        mesh.rebuild_cell_faces();
        mesh
    }

    /// Channel mesh: inlet on the left, outlet on the right, walls above
    /// and below.
    pub fn channel(nx: usize, ny: usize, lx: f64, ly: f64) -> Self {
        Self::rectangular(
            nx,
            ny,
            lx,
            ly,
            (
                BoundaryType::Inlet,
                BoundaryType::Outlet,
                BoundaryType::Wall,
                BoundaryType::Wall,
            ),
        )
    }

    /// Closed box: walls on every side.
    pub fn closed_box(nx: usize, ny: usize, lx: f64, ly: f64) -> Self {
        Self::rectangular(
            nx,
            ny,
            lx,
            ly,
            (
                BoundaryType::Wall,
                BoundaryType::Wall,
                BoundaryType::Wall,
                BoundaryType::Wall,
            ),
        )
    }

    /// Closed box with interior vertices displaced by a smooth, fully
    /// deterministic perturbation, producing non-orthogonal faces.
    /// `amplitude` is the displacement as a fraction of the cell size and
    /// should stay below ~0.25 to keep cells convex.
    pub fn skewed_box(nx: usize, ny: usize, lx: f64, ly: f64, amplitude: f64) -> Self {
        let mut mesh = Self::closed_box(nx, ny, lx, ly);
        let dx = lx / nx as f64;
        let dy = ly / ny as f64;
        for j in 1..ny {
            for i in 1..nx {
                let v = j * (nx + 1) + i;
                let x = mesh.vx[v];
                let y = mesh.vy[v];
                mesh.vx[v] = x + amplitude * dx * (2.0 * std::f64::consts::PI * y / ly).sin();
                mesh.vy[v] = y + amplitude * dy * (2.0 * std::f64::consts::PI * x / lx).sin();
            }
        }
        mesh.recalculate_geometry();
        mesh
    }
}
