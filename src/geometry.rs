//! Geometry module.
//! Maps the four board corners the user picked onto an (n+1) x (m+1) grid of
//! cell centers using bilinear interpolation, and resolves raw clicks to the
//! nearest grid node.
//! Everything here is pure: a `Grid` is immutable once built and can be
//! shared freely.

use std::fmt;

/// A point in screen pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance_sq(&self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Axis-aligned screen rectangle (origin may be negative on multi-monitor setups).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRect {
    pub const fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self { left, top, width, height }
    }

    /// Square of `side` pixels centered on `center`.
    /// Uses the integer half of `side`, so odd sides lean one pixel right/down.
    pub fn centered_square(center: Point, side: u32) -> Self {
        let half = f64::from(side / 2);
        Self {
            left: (center.x - half) as i32,
            top: (center.y - half) as i32,
            width: side,
            height: side,
        }
    }

    pub fn right(&self) -> i64 {
        i64::from(self.left) + i64::from(self.width)
    }

    pub fn bottom(&self) -> i64 {
        i64::from(self.top) + i64::from(self.height)
    }

    /// Overlapping area of two rects, if any.
    pub fn intersect(&self, other: &ScreenRect) -> Option<ScreenRect> {
        let left = i64::from(self.left.max(other.left));
        let top = i64::from(self.top.max(other.top));
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(ScreenRect::new(
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }

    /// Smallest rect covering both.
    pub fn union(&self, other: &ScreenRect) -> ScreenRect {
        let left = i64::from(self.left.min(other.left));
        let top = i64::from(self.top.min(other.top));
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        ScreenRect::new(left as i32, top as i32, (right - left) as u32, (bottom - top) as u32)
    }
}

/// (row, col) index of one grid node. Stable key for all per-node state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoardCoordinate {
    pub row: usize,
    pub col: usize,
}

impl BoardCoordinate {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for BoardCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// Four board corners in order: top-left, top-right, bottom-right, bottom-left
/// (as seen on the board, not necessarily on screen).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [Point; 4],
}

impl Quad {
    pub const fn new(c1: Point, c2: Point, c3: Point, c4: Point) -> Self {
        Self { corners: [c1, c2, c3, c4] }
    }

    /// Places the corners at fractional positions inside `area`, truncated to whole pixels.
    pub fn from_ratios(area: ScreenRect, ratios: &[(f64, f64); 4]) -> Self {
        let corners = ratios.map(|(rx, ry)| {
            Point::new(
                (f64::from(area.left) + rx * f64::from(area.width)).trunc(),
                (f64::from(area.top) + ry * f64::from(area.height)).trunc(),
            )
        });
        Self { corners }
    }

    /// Bilinear blend at (u, v), u along c1->c2, v along c1->c4.
    fn blend(&self, u: f64, v: f64) -> Point {
        let [c1, c2, c3, c4] = self.corners;
        let w1 = (1.0 - u) * (1.0 - v);
        let w2 = u * (1.0 - v);
        let w3 = u * v;
        let w4 = (1.0 - u) * v;
        Point::new(
            w1 * c1.x + w2 * c2.x + w3 * c3.x + w4 * c4.x,
            w1 * c1.y + w2 * c2.y + w3 * c3.y + w4 * c4.y,
        )
    }
}

/// Interpolated node positions, `rows + 1` by `cols + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    points: Vec<Vec<Point>>,
}

/// Builds the (n+1) x (m+1) node grid inside `quad`. `n` and `m` are clamped to at least 1.
pub fn build_grid(quad: &Quad, n: usize, m: usize) -> Grid {
    let n = n.max(1);
    let m = m.max(1);
    let points = (0..=n)
        .map(|j| {
            let v = j as f64 / n as f64;
            (0..=m).map(|i| quad.blend(i as f64 / m as f64, v)).collect()
        })
        .collect();
    Grid { rows: n, cols: m, points }
}

impl Grid {
    /// Cell counts `(n, m)` the grid was built with.
    pub fn cells(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Node counts `(n + 1, m + 1)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows + 1, self.cols + 1)
    }

    pub fn rows(&self) -> &[Vec<Point>] {
        &self.points
    }

    /// Grid node closest to `target`. Ties go to the first node in row-major order.
    pub fn nearest(&self, target: Point) -> (Point, BoardCoordinate) {
        let mut best = (self.points[0][0], BoardCoordinate::new(0, 0));
        let mut best_d2 = f64::INFINITY;
        for (j, row) in self.points.iter().enumerate() {
            for (i, p) in row.iter().enumerate() {
                let d2 = p.distance_sq(target);
                if d2 < best_d2 {
                    best_d2 = d2;
                    best = (*p, BoardCoordinate::new(j, i));
                }
            }
        }
        best
    }
}

/// Scales a logical (OS-reported) point to physical pixels, rounding to whole pixels.
pub fn logical_to_physical(point: Point, ratio: f64) -> Point {
    if ratio == 1.0 {
        return Point::new(point.x.round(), point.y.round());
    }
    Point::new((point.x * ratio).round(), (point.y * ratio).round())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_quad() -> Quad {
        Quad::new(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        )
    }

    fn node(grid: &Grid, (row, col): (usize, usize)) -> Option<Point> {
        grid.rows().get(row)?.get(col).copied()
    }

    fn skewed_quad() -> Quad {
        Quad::new(
            Point::new(1026.0, 310.0),
            Point::new(1495.0, 542.0),
            Point::new(1216.0, 687.0),
            Point::new(748.0, 447.0),
        )
    }

    #[test]
    fn test_grid_dimensions_and_corners() {
        let quad = skewed_quad();
        for (n, m) in [(1, 1), (3, 5), (4, 2)] {
            let grid = build_grid(&quad, n, m);
            assert_eq!(grid.dimensions(), (n + 1, m + 1));
            assert_eq!(grid.rows().len(), n + 1);
            assert!(grid.rows().iter().all(|row| row.len() == m + 1));
            assert_eq!(node(&grid, (0, 0)), Some(quad.corners[0]));
            assert_eq!(node(&grid, (0, m)), Some(quad.corners[1]));
            assert_eq!(node(&grid, (n, m)), Some(quad.corners[2]));
            assert_eq!(node(&grid, (n, 0)), Some(quad.corners[3]));
        }
    }

    #[test]
    fn test_zero_cells_clamped_to_one() {
        let grid = build_grid(&square_quad(), 0, 0);
        assert_eq!(grid.cells(), (1, 1));
        assert_eq!(grid.dimensions(), (2, 2));
    }

    #[test]
    fn test_square_quad_scenario() {
        let grid = build_grid(&square_quad(), 1, 1);
        assert_eq!(
            grid.rows(),
            &[
                vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)],
                vec![Point::new(0.0, 10.0), Point::new(10.0, 10.0)],
            ]
        );
        let (p, coord) = grid.nearest(Point::new(9.0, 1.0));
        assert_eq!(p, Point::new(10.0, 0.0));
        assert_eq!(coord, BoardCoordinate::new(0, 1));
    }

    #[test]
    fn test_nearest_on_existing_node_is_exact() {
        let grid = build_grid(&skewed_quad(), 3, 5);
        for (j, row) in grid.rows().iter().enumerate() {
            for (i, p) in row.iter().enumerate() {
                let (found, coord) = grid.nearest(*p);
                assert_eq!(found, *p);
                assert_eq!(coord, BoardCoordinate::new(j, i));
            }
        }
    }

    #[test]
    fn test_nearest_tie_prefers_row_major_first() {
        // (5, 5) is equidistant from all four nodes of the 1x1 square grid.
        let grid = build_grid(&square_quad(), 1, 1);
        let (p, coord) = grid.nearest(Point::new(5.0, 5.0));
        assert_eq!(coord, BoardCoordinate::new(0, 0));
        assert_eq!(p, Point::new(0.0, 0.0));
    }

    #[test]
    fn test_build_grid_is_deterministic() {
        let quad = skewed_quad();
        assert_eq!(build_grid(&quad, 3, 5), build_grid(&quad, 3, 5));
    }

    #[test]
    fn test_interior_node_is_bilinear_blend() {
        let grid = build_grid(&square_quad(), 2, 2);
        assert_eq!(node(&grid, (1, 1)), Some(Point::new(5.0, 5.0)));
        assert_eq!(node(&grid, (2, 1)), Some(Point::new(5.0, 10.0)));
        assert_eq!(node(&grid, (3, 0)), None);
    }

    #[test]
    fn test_logical_to_physical() {
        assert_eq!(logical_to_physical(Point::new(10.4, 3.6), 1.0), Point::new(10.0, 4.0));
        assert_eq!(logical_to_physical(Point::new(100.0, 50.25), 2.0), Point::new(200.0, 101.0));
    }

    #[test]
    fn test_quad_from_ratios_truncates() {
        let area = ScreenRect::new(100, 50, 1000, 500);
        let quad = Quad::from_ratios(area, &[(0.0, 0.0), (0.5346, 0.287), (1.0, 1.0), (0.25, 0.5)]);
        assert_eq!(quad.corners[0], Point::new(100.0, 50.0));
        assert_eq!(quad.corners[1], Point::new(634.0, 193.0));
        assert_eq!(quad.corners[2], Point::new(1100.0, 550.0));
        assert_eq!(quad.corners[3], Point::new(350.0, 300.0));
    }

    #[test]
    fn test_centered_square() {
        let rect = ScreenRect::centered_square(Point::new(500.0, 300.0), 200);
        assert_eq!(rect, ScreenRect::new(400, 200, 200, 200));
    }

    #[test]
    fn test_rect_intersect_and_union() {
        let a = ScreenRect::new(0, 0, 100, 100);
        let b = ScreenRect::new(50, -20, 100, 50);
        assert_eq!(a.intersect(&b), Some(ScreenRect::new(50, 0, 50, 30)));
        assert_eq!(a.union(&b), ScreenRect::new(0, -20, 150, 120));
        assert_eq!(a.intersect(&ScreenRect::new(200, 200, 10, 10)), None);
    }
}
