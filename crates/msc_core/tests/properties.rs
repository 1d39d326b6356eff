//! Order independence and structural properties on random fields.

use msc_common::{Direction, EdgeTopology};
use msc_core::complex::{ComplexConfig, DualComplex, MorseComplex};
use msc_core::decomposer::GridSpec;
use msc_core::hierarchy::{EventLog, PersistenceHierarchy};
use msc_core::stream::{MemoryStream, Token};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn sequential() -> ComplexConfig {
    ComplexConfig {
        threads: 1,
        ..ComplexConfig::default()
    }
}

/// Vertices of a `w` x `h` lattice with random heights, and its edges
/// (horizontal, vertical, and one diagonal per square).
fn lattice(rng: &mut StdRng, w: u32, h: u32) -> (Vec<Token>, Vec<(u32, u32)>) {
    let mut vertices = Vec::new();
    let mut edges = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let id = y * w + x;
            vertices.push(Token::Vertex {
                id,
                data: vec![x as f64, y as f64, rng.gen_range(-1.0..1.0)],
            });
            if x + 1 < w {
                edges.push((id, id + 1));
            }
            if y + 1 < h {
                edges.push((id, id + w));
            }
            if x + 1 < w && y + 1 < h {
                edges.push((id, id + w + 1));
            }
        }
    }
    (vertices, edges)
}

struct Outcome {
    steepest: Vec<Option<u32>>,
    basins: Vec<u32>,
    arcs: Vec<(u32, u32)>,
}

fn outcome(complex: &mut MorseComplex, direction: Direction) -> Outcome {
    let mut log = EventLog::new();
    complex.compute(direction, &mut log).expect("compute");
    let store = complex.store();
    Outcome {
        steepest: (0..store.len() as u32)
            .map(|i| store.steepest(i, direction).expect("steepest"))
            .collect(),
        basins: complex.basins(direction).expect("basins"),
        arcs: log.arcs(),
    }
}

fn shuffled_round(
    rng: &mut StdRng,
    vertices: &[Token],
    edges: &mut [(u32, u32)],
    flip: bool,
) -> [Outcome; 2] {
    edges.shuffle(rng);
    let mut tokens = vertices.to_vec();
    tokens.extend(
        edges
            .iter()
            .map(|&(u, v)| if flip { Token::Edge(v, u) } else { Token::Edge(u, v) }),
    );
    let mut complex = MorseComplex::from_stream(MemoryStream::new(tokens), sequential()).expect("complex");
    [
        outcome(&mut complex, Direction::Ascending),
        outcome(&mut complex, Direction::Descending),
    ]
}

#[test]
fn shuffled_edges_give_the_same_complex() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let (vertices, mut edges) = lattice(&mut rng, 13, 9);

    let expected = shuffled_round(&mut rng, &vertices, &mut edges, false);
    for round in 1..4 {
        let result = shuffled_round(&mut rng, &vertices, &mut edges, round % 2 == 1);
        for (got, want) in result.iter().zip(&expected) {
            assert_eq!(got.steepest, want.steepest, "round {round}");
            assert_eq!(got.basins, want.basins, "round {round}");
            assert_eq!(got.arcs, want.arcs, "round {round}");
        }
    }
}

#[test]
fn steepest_chains_climb_and_terminate() {
    let mut rng = StdRng::seed_from_u64(7);
    let values: Vec<f32> = (0..9 * 8 * 6).map(|_| rng.r#gen::<f32>()).collect();
    let grid = GridSpec::new(&[9, 8, 6]).with_degree(3);
    let mut complex = MorseComplex::from_grid(grid, &values, sequential()).expect("complex");

    for direction in Direction::BOTH {
        complex.compute(direction, &mut EventLog::new()).expect("compute");
        let store = complex.store();
        for start in 0..store.len() as u32 {
            let mut current = start;
            let mut steps = 0;
            while let Some(next) = store.steepest(current, direction).expect("steepest") {
                assert!(store.higher(direction, next, current));
                current = next;
                steps += 1;
                assert!(steps <= store.len());
            }
            assert_eq!(store.basin(start, direction).expect("basin"), Some(current));
        }
    }
}

#[test]
fn parallel_grid_matches_sequential() {
    let mut rng = StdRng::seed_from_u64(42);
    let dims = [10, 7, 5];
    let values: Vec<f32> = (0..350).map(|_| rng.gen_range(-4.0f32..4.0)).collect();

    for topology in [EdgeTopology::Complete, EdgeTopology::Disjunct] {
        let grid = GridSpec::new(&dims).with_degree(2).with_topology(topology);
        let mut results = Vec::new();
        for threads in [1, 3, 8] {
            let config = ComplexConfig {
                threads,
                emit_paths: true,
                ..ComplexConfig::default()
            };
            let mut complex = MorseComplex::from_grid(grid.clone(), &values, config).expect("complex");
            let up = outcome(&mut complex, Direction::Ascending);
            let down = outcome(&mut complex, Direction::Descending);
            results.push((threads, up, down));
        }

        let (_, up, down) = &results[0];
        for (threads, other_up, other_down) in &results[1..] {
            assert_eq!(other_up.steepest, up.steepest, "{threads} threads");
            assert_eq!(other_up.arcs, up.arcs, "{threads} threads");
            assert_eq!(other_down.basins, down.basins, "{threads} threads");
            assert_eq!(other_down.arcs, down.arcs, "{threads} threads");
        }
    }
}

#[test]
fn recomputing_a_direction_is_stable() {
    let mut rng = StdRng::seed_from_u64(3);
    let (mut tokens, edges) = lattice(&mut rng, 6, 6);
    tokens.extend(edges.into_iter().map(|(u, v)| Token::Edge(u, v)));
    let mut complex = MorseComplex::from_stream(MemoryStream::new(tokens), sequential()).expect("complex");

    let first = outcome(&mut complex, Direction::Ascending);
    outcome(&mut complex, Direction::Descending);
    let second = outcome(&mut complex, Direction::Ascending);
    assert_eq!(first.basins, second.basins);
    assert_eq!(first.arcs, second.arcs);
}

#[test]
fn infinite_threshold_collapses_a_connected_field() {
    let mut rng = StdRng::seed_from_u64(11);
    let values: Vec<f32> = (0..64).map(|_| rng.r#gen::<f32>()).collect();
    let complex = MorseComplex::from_grid(GridSpec::new(&[8, 8]), &values, sequential()).expect("complex");
    let mut dual: DualComplex<PersistenceHierarchy> = DualComplex::new(complex);
    let [up, down] = dual.compute().expect("compute");
    assert!(up.extrema >= 1 && down.extrema >= 1);

    let cells = dual.cells(f64::INFINITY).expect("cells");
    assert!(cells.iter().all(|&cell| cell == 0));

    let fine = dual.cells(0.0).expect("cells");
    let distinct = fine.iter().max().map_or(0, |&m| m + 1);
    assert!(distinct as usize >= up.extrema.max(down.extrema));
    assert_eq!(fine[0], 0);
}
