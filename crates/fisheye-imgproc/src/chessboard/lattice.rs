use std::collections::{HashMap, VecDeque};

use super::{ChessboardError, DetectorParams, PatternSize};

type Point = [f64; 2];
type Grid = Vec<Vec<Point>>;

const NEIGHBOURS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

fn sub(a: Point, b: Point) -> Point {
    [a[0] - b[0], a[1] - b[1]]
}

fn norm(a: Point) -> f64 {
    a[0].hypot(a[1])
}

fn dot(a: Point, b: Point) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

fn cross(a: Point, b: Point) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

/// A corner assigned to a lattice coordinate, with the local grid steps around it.
#[derive(Debug, Clone, Copy)]
struct Node {
    candidate: usize,
    step_u: Point,
    step_v: Point,
}

/// Index of the unused candidate closest to `target`, with its distance.
fn nearest_unused(candidates: &[Point], used: &[bool], target: Point) -> Option<(usize, f64)> {
    candidates
        .iter()
        .enumerate()
        .filter(|(idx, _)| !used[*idx])
        .map(|(idx, p)| (idx, norm(sub(*p, target))))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Two non-parallel grid steps at the seed, taken from its closest neighbours.
fn seed_steps(candidates: &[Point], seed: usize) -> Option<(Point, Point)> {
    let origin = candidates[seed];
    let mut neighbours = candidates
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != seed)
        .map(|(_, p)| sub(*p, origin))
        .collect::<Vec<_>>();
    neighbours.sort_by(|a, b| norm(*a).total_cmp(&norm(*b)));

    let step_u = *neighbours.first()?;
    let len_u = norm(step_u);
    if len_u <= f64::EPSILON {
        return None;
    }

    // the second direction must be far from parallel, which excludes the diagonals
    let step_v = neighbours.iter().skip(1).take(8).copied().find(|d| {
        let len = norm(*d);
        len < 2.0 * len_u && (dot(step_u, *d) / (len_u * len)).abs() < 0.5
    })?;

    Some((step_u, step_v))
}

/// Grow a lattice of candidates by breadth-first prediction from the seed.
fn grow_lattice(
    candidates: &[Point],
    seed: usize,
    tolerance: f64,
) -> Option<HashMap<(i32, i32), Node>> {
    let (step_u, step_v) = seed_steps(candidates, seed)?;

    let mut used = vec![false; candidates.len()];
    used[seed] = true;

    let mut lattice = HashMap::new();
    lattice.insert(
        (0, 0),
        Node {
            candidate: seed,
            step_u,
            step_v,
        },
    );

    let mut queue = VecDeque::from([(0, 0)]);
    while let Some(key) = queue.pop_front() {
        let node = lattice[&key];
        let origin = candidates[node.candidate];

        for (di, dj) in NEIGHBOURS {
            let next_key = (key.0 + di, key.1 + dj);
            if lattice.contains_key(&next_key) {
                continue;
            }

            let step = if di != 0 {
                [node.step_u[0] * di as f64, node.step_u[1] * di as f64]
            } else {
                [node.step_v[0] * dj as f64, node.step_v[1] * dj as f64]
            };
            let target = [origin[0] + step[0], origin[1] + step[1]];

            let Some((idx, dist)) = nearest_unused(candidates, &used, target) else {
                continue;
            };
            if dist > tolerance * norm(step) {
                continue;
            }

            let found = sub(candidates[idx], origin);
            let next = if di != 0 {
                Node {
                    candidate: idx,
                    step_u: [found[0] * di as f64, found[1] * di as f64],
                    step_v: node.step_v,
                }
            } else {
                Node {
                    candidate: idx,
                    step_u: node.step_u,
                    step_v: [found[0] * dj as f64, found[1] * dj as f64],
                }
            };

            used[idx] = true;
            lattice.insert(next_key, next);
            queue.push_back(next_key);
        }
    }

    Some(lattice)
}

/// Locate the unique window of the lattice holding the full pattern.
fn extract_window(
    candidates: &[Point],
    lattice: &HashMap<(i32, i32), Node>,
    pattern: PatternSize,
) -> Result<Grid, ChessboardError> {
    let (rows, cols) = (pattern.rows as i32, pattern.cols as i32);

    let min_i = lattice.keys().map(|k| k.0).min().unwrap_or(0);
    let max_i = lattice.keys().map(|k| k.0).max().unwrap_or(0);
    let min_j = lattice.keys().map(|k| k.1).min().unwrap_or(0);
    let max_j = lattice.keys().map(|k| k.1).max().unwrap_or(0);

    // (extent along i, extent along j, whether i runs down the columns)
    let mut layouts = vec![(cols, rows, false)];
    if rows != cols {
        layouts.push((rows, cols, true));
    }

    let mut windows = Vec::new();
    for (span_i, span_j, transposed) in layouts {
        for i0 in min_i..=(max_i - span_i + 1) {
            for j0 in min_j..=(max_j - span_j + 1) {
                let complete = (0..span_i)
                    .all(|di| (0..span_j).all(|dj| lattice.contains_key(&(i0 + di, j0 + dj))));
                if complete {
                    windows.push((i0, j0, transposed));
                }
            }
        }
    }

    if windows.len() != 1 {
        return Err(ChessboardError::NotFound(format!(
            "{} complete {} windows in a lattice of {} corners",
            windows.len(),
            pattern,
            lattice.len()
        )));
    }

    let (i0, j0, transposed) = windows[0];
    let grid: Grid = (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| {
                    let key = if transposed {
                        (i0 + r, j0 + c)
                    } else {
                        (i0 + c, j0 + r)
                    };
                    candidates[lattice[&key].candidate]
                })
                .collect()
        })
        .collect();

    Ok(grid)
}

/// Check that rows and columns do not fold back and every cell has the same orientation.
fn check_topology(grid: &Grid) -> Result<f64, ChessboardError> {
    let rows = grid.len();
    let cols = grid.first().map_or(0, |r| r.len());

    for row in grid {
        for k in 0..cols.saturating_sub(2) {
            let a = sub(row[k + 1], row[k]);
            let b = sub(row[k + 2], row[k + 1]);
            if dot(a, b) <= 0.0 {
                return Err(ChessboardError::NotFound("row folds back".to_string()));
            }
        }
    }

    for c in 0..cols {
        for r in 0..rows.saturating_sub(2) {
            let a = sub(grid[r + 1][c], grid[r][c]);
            let b = sub(grid[r + 2][c], grid[r + 1][c]);
            if dot(a, b) <= 0.0 {
                return Err(ChessboardError::NotFound("column folds back".to_string()));
            }
        }
    }

    let mut orientation = 0.0;
    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            let area = cross(sub(grid[r][c + 1], grid[r][c]), sub(grid[r + 1][c], grid[r][c]));
            if area == 0.0 || (orientation != 0.0 && area.signum() != orientation) {
                return Err(ChessboardError::NotFound(
                    "inconsistent cell orientation".to_string(),
                ));
            }
            orientation = area.signum();
        }
    }

    Ok(orientation)
}

fn mirror_cols(grid: &Grid) -> Grid {
    grid.iter()
        .map(|row| row.iter().rev().copied().collect())
        .collect()
}

fn rotate_180(grid: &Grid) -> Grid {
    grid.iter()
        .rev()
        .map(|row| row.iter().rev().copied().collect())
        .collect()
}

/// Quarter turn of a square grid that keeps the orientation of the cells.
fn rotate_90(grid: &Grid) -> Grid {
    let n = grid.len();
    (0..n)
        .map(|r| (0..n).map(|c| grid[c][n - 1 - r]).collect())
        .collect()
}

/// Put the grid in the canonical scan order.
fn canonical_order(grid: Grid, orientation: f64) -> Grid {
    let grid = if orientation < 0.0 {
        mirror_cols(&grid)
    } else {
        grid
    };

    let square = grid.len() == grid.first().map_or(0, |r| r.len());

    let mut options = vec![rotate_180(&grid)];
    if square {
        let quarter = rotate_90(&grid);
        options.push(rotate_180(&quarter));
        options.push(quarter);
    }

    let score = |g: &Grid| g[0][0][0] + g[0][0][1];
    options
        .into_iter()
        .fold(grid, |best, g| if score(&g) < score(&best) { g } else { best })
}

/// Arrange junction candidates into the full pattern of interior corners.
pub(crate) fn assemble_grid(
    candidates: &[Point],
    pattern: PatternSize,
    params: &DetectorParams,
) -> Result<Vec<Point>, ChessboardError> {
    let expected = pattern.num_corners();
    if candidates.len() < expected {
        return Err(ChessboardError::NotFound(format!(
            "found {} junction candidates, expected at least {}",
            candidates.len(),
            expected
        )));
    }

    // seeds closest to the centroid are most likely on the board
    let n = candidates.len() as f64;
    let centroid = candidates
        .iter()
        .fold([0.0, 0.0], |acc, p| [acc[0] + p[0] / n, acc[1] + p[1] / n]);
    let mut seeds = (0..candidates.len()).collect::<Vec<_>>();
    seeds.sort_by(|&a, &b| {
        norm(sub(candidates[a], centroid)).total_cmp(&norm(sub(candidates[b], centroid)))
    });

    let mut last_error = ChessboardError::NotFound("no usable seed".to_string());
    for &seed in seeds.iter().take(params.max_seeds.max(1)) {
        let Some(lattice) = grow_lattice(candidates, seed, params.lattice_tolerance) else {
            continue;
        };

        if lattice.len() < expected {
            last_error = ChessboardError::NotFound(format!(
                "lattice holds {} corners, expected {}",
                lattice.len(),
                expected
            ));
            continue;
        }

        let result = extract_window(candidates, &lattice, pattern).and_then(|grid| {
            let orientation = check_topology(&grid)?;
            Ok(canonical_order(grid, orientation))
        });

        match result {
            Ok(grid) => return Ok(grid.into_iter().flatten().collect()),
            Err(err) => {
                log::debug!("seed {} rejected: {}", seed, err);
                last_error = err;
            }
        }
    }

    Err(last_error)
}
