//! Two-pass orchestration, event emission, and dual-manifold cells.
//!
//! A [`MorseComplex`] owns the vertex store and the edge source it was built
//! from, either a restartable token stream or an implicit grid. Every call to
//! [`MorseComplex::compute`] runs the full protocol for one direction: pass 1
//! through the gradient visitor, basin resolution, pass 2 through the saddle
//! visitor, and the translation of the saddle map into hierarchy events.

use crate::decomposer::{self, GridSpec};
use crate::hierarchy::{HierarchyBuilder, PersistenceHierarchy};
use crate::stream::{Token, TokenStream};
use crate::vertex_store::{StoreLayout, VertexStore};
use crate::visitor::{BasinPair, EdgeVisitor, GradientVisitor, SaddleEntry, SaddleMap, SaddleVisitor};
use crate::{MscError, Result};
use log::{debug, info, warn};
use msc_common::{Direction, NodeKind, Recoverability, VertexId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::thread;

/// Engine configuration shared by stream and grid inputs.
#[derive(Debug, Clone)]
pub struct ComplexConfig {
    /// Number of grid workers. Token streams are always walked on the
    /// calling thread.
    pub threads: usize,

    /// Position of the scalar value inside stream embeddings; the last slot
    /// when unset. Grid vertices always carry the value last.
    pub value_slot: Option<usize>,

    pub layout: StoreLayout,

    /// Whether steepest paths are traced and submitted for every arc.
    pub emit_paths: bool,

    /// Largest persistence the hierarchy is built up to.
    pub ceiling: f64,

    pub recoverability: Recoverability,
}

impl Default for ComplexConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            value_slot: None,
            layout: StoreLayout::default(),
            emit_paths: false,
            ceiling: f64::INFINITY,
            recoverability: Recoverability::Recoverable,
        }
    }
}

impl ComplexConfig {
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(MscError::InvalidInput("thread count must be positive".into()));
        }
        if self.ceiling.is_nan() || self.ceiling < 0.0 {
            return Err(MscError::InvalidInput(format!(
                "persistence ceiling {} must be a non-negative number",
                self.ceiling
            )));
        }
        if self.layout.lock_bits > self.layout.block_bits {
            return Err(MscError::InvalidInput(format!(
                "lock granularity 2^{} exceeds block size 2^{}",
                self.layout.lock_bits, self.layout.block_bits
            )));
        }
        Ok(())
    }
}

/// Counts describing one computed direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifoldSummary {
    pub direction: Direction,
    pub edges: usize,
    pub extrema: usize,
    pub saddles: usize,
    pub multi_saddles: usize,
    pub arcs: usize,
    pub paths: usize,
}

impl ManifoldSummary {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            edges: 0,
            extrema: 0,
            saddles: 0,
            multi_saddles: 0,
            arcs: 0,
            paths: 0,
        }
    }
}

enum Source {
    Stream(Box<dyn TokenStream>),
    Grid(GridSpec),
}

/// Gradient complex of one scalar field.
pub struct MorseComplex {
    store: VertexStore,
    source: Source,
    config: ComplexConfig,
}

impl MorseComplex {
    /// Ingests every vertex record of `stream`.
    ///
    /// Edge and path records are checked against the vertices introduced
    /// before them, so an edge naming a later vertex fails here with
    /// [`MscError::InvalidReference`]. The stream is rewound before each
    /// pass.
    pub fn from_stream<S: TokenStream + 'static>(stream: S, config: ComplexConfig) -> Result<Self> {
        config.validate()?;
        let mut stream: Box<dyn TokenStream> = Box::new(stream);
        stream.rewind()?;

        let mut store: Option<VertexStore> = None;
        let mut edges = 0usize;
        loop {
            match stream.next_token()? {
                Token::End => break,
                Token::Vertex { id, data } => {
                    if store.is_none() {
                        store = Some(Self::stream_store(&config, data.len())?);
                    }
                    if let Some(store) = store.as_mut() {
                        store.add_vertex(id, &data)?;
                    }
                }
                Token::Edge(a, b) => {
                    Self::check_ids(store.as_ref(), &[a, b])?;
                    edges += 1;
                }
                Token::Path(ids) => {
                    Self::check_ids(store.as_ref(), &ids)?;
                    edges += ids.len().saturating_sub(1);
                }
                Token::Finalize => {}
            }
        }

        let store =
            store.ok_or_else(|| MscError::InvalidInput("stream holds no vertex records".into()))?;
        info!(
            "ingested {} vertices of dimension {} and {} edges from stream",
            store.len(),
            store.dimension(),
            edges
        );
        Ok(Self {
            store,
            source: Source::Stream(stream),
            config,
        })
    }

    /// Ingests a regular grid whose samples are listed axis 0 fastest.
    ///
    /// Vertex `i` gets global id `i` and the embedding made of its grid
    /// coordinates followed by its value.
    pub fn from_grid(grid: GridSpec, values: &[f32], config: ComplexConfig) -> Result<Self> {
        config.validate()?;
        grid.validate()?;
        let count = grid.vertex_count();
        if values.len() != count {
            return Err(MscError::InvalidInput(format!(
                "grid {:?} needs {} samples, got {}",
                grid.dims,
                count,
                values.len()
            )));
        }

        let d = grid.dimension();
        let mut store = VertexStore::with_layout(d + 1, d, config.layout)?;
        let mut data = vec![0.0f64; d + 1];
        for (i, &value) in values.iter().enumerate() {
            grid.coordinates_into(i, &mut data[..d]);
            data[d] = f64::from(value);
            store.add_vertex(i as VertexId, &data)?;
        }

        info!("ingested {:?} grid with {} vertices", grid.dims, count);
        Ok(Self {
            store,
            source: Source::Grid(grid),
            config,
        })
    }

    fn stream_store(config: &ComplexConfig, dimension: usize) -> Result<VertexStore> {
        if dimension == 0 {
            return Err(MscError::InvalidInput("vertex record without data".into()));
        }
        let slot = config.value_slot.unwrap_or(dimension - 1);
        VertexStore::with_layout(dimension, slot, config.layout)
    }

    fn check_ids(store: Option<&VertexStore>, ids: &[VertexId]) -> Result<()> {
        for &id in ids {
            match store {
                Some(store) => {
                    store.local_index(id)?;
                }
                None => return Err(MscError::InvalidReference { id }),
            }
        }
        Ok(())
    }

    pub fn store(&self) -> &VertexStore {
        &self.store
    }

    pub fn config(&self) -> &ComplexConfig {
        &self.config
    }

    /// Runs both passes for `direction` and submits the result to `builder`.
    ///
    /// Calling this again for the same direction recomputes it from scratch;
    /// the builder must then be a fresh one.
    pub fn compute<H: HierarchyBuilder + ?Sized>(
        &mut self,
        direction: Direction,
        builder: &mut H,
    ) -> Result<ManifoldSummary> {
        let threads = self.config.threads;
        self.store.reset_gradient(direction);

        let gradient = GradientVisitor::new(&self.store, direction);
        let edges = drive(&mut self.source, &self.store, threads, gradient)?;
        debug!("{} pass 1 visited {} edges", direction.label(), edges);
        if edges == 0 && self.store.len() > 1 {
            warn!(
                "{} vertices but no edges; every vertex is its own {} basin",
                self.store.len(),
                direction.label()
            );
        }

        self.store.resolve_basins(direction)?;

        let map = SaddleMap::new();
        let saddles = SaddleVisitor::new(&self.store, direction, &map);
        drive(&mut self.source, &self.store, threads, saddles)?;
        let entries = map.into_entries();
        debug!("{} pass 2 found {} basin pairs", direction.label(), entries.len());

        let mut summary = emit(&self.store, direction, &entries, self.config.emit_paths, builder)?;
        summary.edges = edges;
        builder.construct_hierarchy(self.config.ceiling, self.config.recoverability, direction)?;

        info!(
            "{} manifold: {} extrema, {} saddles ({} multi), {} arcs, {} paths",
            direction.label(),
            summary.extrema,
            summary.saddles,
            summary.multi_saddles,
            summary.arcs,
            summary.paths
        );
        Ok(summary)
    }

    /// Global id of the basin root of every vertex, by local index.
    pub fn basins(&self, direction: Direction) -> Result<Vec<VertexId>> {
        (0..self.store.len() as u32)
            .map(|local| Ok(self.store.global_id(self.root(local, direction)?)))
            .collect()
    }

    /// Global id of the extremum representing every vertex's basin at the
    /// builder's current persistence threshold, by local index.
    pub fn active_basins<H: HierarchyBuilder + ?Sized>(
        &self,
        direction: Direction,
        builder: &H,
    ) -> Result<Vec<VertexId>> {
        let mut active: HashMap<u32, VertexId> = HashMap::new();
        (0..self.store.len() as u32)
            .map(|local| {
                let root = self.root(local, direction)?;
                if let Some(&id) = active.get(&root) {
                    return Ok(id);
                }
                let id = builder.find_active_node(self.store.global_id(root))?.id;
                active.insert(root, id);
                Ok(id)
            })
            .collect()
    }

    fn root(&self, local: u32, direction: Direction) -> Result<u32> {
        self.store.basin(local, direction)?.ok_or_else(|| {
            MscError::InvariantViolated(format!(
                "{} basins of vertex {} were never computed",
                direction.label(),
                self.store.global_id(local)
            ))
        })
    }
}

/// Feeds every edge of `source` to `visitor`.
fn drive<V: EdgeVisitor + Clone>(
    source: &mut Source,
    store: &VertexStore,
    threads: usize,
    visitor: V,
) -> Result<usize> {
    match source {
        Source::Grid(grid) => {
            let visitors = vec![visitor; threads];
            decomposer::run(grid, &visitors)
        }
        Source::Stream(stream) => {
            stream.rewind()?;
            let mut edges = 0usize;
            loop {
                match stream.next_token()? {
                    Token::End => break,
                    Token::Edge(a, b) => {
                        visitor.add_edge(store.local_index(a)?, store.local_index(b)?)?;
                        edges += 1;
                    }
                    Token::Path(ids) => {
                        for pair in ids.windows(2) {
                            visitor.add_edge(store.local_index(pair[0])?, store.local_index(pair[1])?)?;
                            edges += 1;
                        }
                    }
                    Token::Vertex { .. } | Token::Finalize => {}
                }
            }
            Ok(edges)
        }
    }
}

/// Translates the saddle map of one direction into builder events.
///
/// Nodes go first: every extremum, then every saddle in local-index order,
/// promoted to a multi-saddle when it separates more than one basin pair.
/// Each saddle is then joined by one arc to every distinct basin root it
/// touches.
fn emit<H: HierarchyBuilder + ?Sized>(
    store: &VertexStore,
    direction: Direction,
    entries: &[(BasinPair, SaddleEntry)],
    emit_paths: bool,
    builder: &mut H,
) -> Result<ManifoldSummary> {
    let mut summary = ManifoldSummary::new(direction);
    let (low, high) = store.value_range();
    builder.min_f(low);
    builder.max_f(high);

    let extrema = store.extrema(direction);
    for &extremum in &extrema {
        builder.add_node(store.global_id(extremum), store.value(extremum), NodeKind::Maximum)?;
    }
    summary.extrema = extrema.len();

    let mut by_saddle: BTreeMap<u32, Vec<(BasinPair, SaddleEntry)>> = BTreeMap::new();
    for &(pair, entry) in entries {
        let own = store.basin(entry.saddle, direction)?;
        if pair.0 == pair.1 || (own != Some(pair.0) && own != Some(pair.1)) {
            return Err(MscError::InvariantViolated(format!(
                "saddle {} does not separate basins {} and {}",
                store.global_id(entry.saddle),
                store.global_id(pair.0),
                store.global_id(pair.1)
            )));
        }
        by_saddle.entry(entry.saddle).or_default().push((pair, entry));
    }

    let mut traced: HashSet<(u32, u32)> = HashSet::new();
    for (&saddle, group) in &by_saddle {
        let id = store.global_id(saddle);
        builder.add_node(id, store.value(saddle), NodeKind::Saddle)?;
        summary.saddles += 1;
        if group.len() > 1 {
            builder.add_multi_saddle(id)?;
            summary.multi_saddles += 1;
        }

        let roots: BTreeSet<u32> = group.iter().flat_map(|&((a, b), _)| [a, b]).collect();
        for root in roots {
            builder.add_arc(store.global_id(root), id)?;
            summary.arcs += 1;
        }

        if !emit_paths {
            continue;
        }
        for &(pair, entry) in group {
            for (basin, start) in [(pair.0, entry.incident.0), (pair.1, entry.incident.1)] {
                if !traced.insert((saddle, basin)) {
                    continue;
                }
                let path = trace_path(store, direction, saddle, start, basin)?;
                builder.add_path(&path)?;
                summary.paths += 1;
            }
        }
    }

    Ok(summary)
}

/// Global ids from `saddle` over `start` down the steepest chain to `basin`.
fn trace_path(
    store: &VertexStore,
    direction: Direction,
    saddle: u32,
    start: u32,
    basin: u32,
) -> Result<Vec<VertexId>> {
    let mut path = vec![store.global_id(saddle)];
    if start != saddle {
        path.push(store.global_id(start));
    }

    let mut current = start;
    while let Some(next) = store.steepest(current, direction)? {
        path.push(store.global_id(next));
        current = next;
        if path.len() > store.len() + 1 {
            return Err(MscError::InvariantViolated(format!(
                "path from saddle {} does not terminate",
                store.global_id(saddle)
            )));
        }
    }

    if current != basin {
        return Err(MscError::InvariantViolated(format!(
            "path from saddle {} ends at {} instead of extremum {}",
            store.global_id(saddle),
            store.global_id(current),
            store.global_id(basin)
        )));
    }
    Ok(path)
}

/// Ascending and descending complexes of the same field.
pub struct DualComplex<H: HierarchyBuilder = PersistenceHierarchy> {
    complex: MorseComplex,
    ascending: H,
    descending: H,
}

impl<H: HierarchyBuilder + Default> DualComplex<H> {
    pub fn new(complex: MorseComplex) -> Self {
        Self {
            complex,
            ascending: H::default(),
            descending: H::default(),
        }
    }

    /// Computes both directions, ascending first.
    pub fn compute(&mut self) -> Result<[ManifoldSummary; 2]> {
        self.ascending = H::default();
        self.descending = H::default();
        let up = self.complex.compute(Direction::Ascending, &mut self.ascending)?;
        let down = self.complex.compute(Direction::Descending, &mut self.descending)?;
        Ok([up, down])
    }

    pub fn complex(&self) -> &MorseComplex {
        &self.complex
    }

    pub fn hierarchy(&self, direction: Direction) -> &H {
        match direction {
            Direction::Ascending => &self.ascending,
            Direction::Descending => &self.descending,
        }
    }

    /// Cell id of every vertex after simplifying both hierarchies to
    /// `threshold`.
    ///
    /// Vertices sharing both their active ascending and active descending
    /// extremum share a cell. Cell ids are dense and handed out in the order
    /// in which their first vertex appears.
    pub fn cells(&mut self, threshold: f64) -> Result<Vec<u32>> {
        self.ascending.update_persistence(threshold);
        self.descending.update_persistence(threshold);
        let up = self.complex.active_basins(Direction::Ascending, &self.ascending)?;
        let down = self.complex.active_basins(Direction::Descending, &self.descending)?;

        let mut ids: HashMap<(VertexId, VertexId), u32> = HashMap::new();
        Ok(up
            .into_iter()
            .zip(down)
            .map(|key| {
                let next = ids.len() as u32;
                *ids.entry(key).or_insert(next)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::EventLog;
    use crate::stream::MemoryStream;

    fn single_thread() -> ComplexConfig {
        ComplexConfig {
            threads: 1,
            ..ComplexConfig::default()
        }
    }

    /// Zigzag 0,3,1,4,2,5 along a path, ascending basins resolved.
    fn zigzag_store() -> VertexStore {
        let mut store = VertexStore::new(2, 1).expect("store");
        for (i, &value) in [0.0, 3.0, 1.0, 4.0, 2.0, 5.0].iter().enumerate() {
            store.add_vertex(i as u32, &[i as f64, value]).expect("vertex");
        }
        let visitor = GradientVisitor::new(&store, Direction::Ascending);
        for i in 0..5 {
            visitor.add_edge(i, i + 1).expect("edge");
        }
        store.resolve_basins(Direction::Ascending).expect("resolve");
        store
    }

    #[test]
    fn emit_rejects_saddle_outside_its_pair() {
        let store = zigzag_store();
        // Vertex 4 drains into 5, not into 1 or 3.
        let foreign = [((1, 3), SaddleEntry { saddle: 4, incident: (3, 4) })];
        let err = emit(&store, Direction::Ascending, &foreign, false, &mut EventLog::new())
            .err()
            .expect("must fail");
        assert!(matches!(&err, MscError::InvariantViolated(m) if m.contains("does not separate")));

        let degenerate = [((3, 3), SaddleEntry { saddle: 2, incident: (2, 3) })];
        let err = emit(&store, Direction::Ascending, &degenerate, false, &mut EventLog::new())
            .err()
            .expect("must fail");
        assert!(matches!(err, MscError::InvariantViolated(_)));
    }

    #[test]
    fn trace_path_rejects_chain_ending_elsewhere() {
        let store = zigzag_store();
        assert_eq!(
            trace_path(&store, Direction::Ascending, 2, 2, 3).expect("path"),
            vec![2, 3]
        );

        store.set_steepest(2, Direction::Ascending, 1, 2.0).expect("redirect");
        let err = trace_path(&store, Direction::Ascending, 2, 2, 3)
            .err()
            .expect("must fail");
        assert!(matches!(&err, MscError::InvariantViolated(m) if m.contains("ends at 1")));
    }

    #[test]
    fn forward_reference_fails_at_ingestion() {
        let mut stream = MemoryStream::from_values(&[0.0, 1.0], &[(0, 1)]);
        stream.push(Token::Edge(1, 2));
        stream.push(Token::Vertex { id: 2, data: vec![2.0, 5.0] });
        let err = MorseComplex::from_stream(stream, single_thread()).err().expect("must fail");
        assert!(matches!(err, MscError::InvalidReference { id: 2 }));
    }

    #[test]
    fn empty_stream_is_rejected() {
        let err = MorseComplex::from_stream(MemoryStream::default(), single_thread())
            .err()
            .expect("must fail");
        assert!(matches!(err, MscError::InvalidInput(_)));
    }

    #[test]
    fn grid_sample_count_must_match() {
        let err = MorseComplex::from_grid(GridSpec::new(&[2, 2]), &[0.0; 3], single_thread())
            .err()
            .expect("must fail");
        assert!(matches!(err, MscError::InvalidInput(_)));
    }

    #[test]
    fn config_rejects_zero_threads() {
        let config = ComplexConfig {
            threads: 0,
            ..ComplexConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn basins_need_a_computed_direction() {
        let stream = MemoryStream::from_values(&[0.0, 1.0], &[(0, 1)]);
        let complex = MorseComplex::from_stream(stream, single_thread()).expect("complex");
        assert!(matches!(
            complex.basins(Direction::Ascending),
            Err(MscError::InvariantViolated(_))
        ));
    }

    #[test]
    fn isolated_vertices_are_their_own_extrema() {
        let stream = MemoryStream::from_values(&[0.0, 1.0, 2.0], &[]);
        let mut complex = MorseComplex::from_stream(stream, single_thread()).expect("complex");
        let mut log = EventLog::new();
        let summary = complex.compute(Direction::Ascending, &mut log).expect("compute");
        assert_eq!(summary.extrema, 3);
        assert_eq!(summary.saddles, 0);
        assert_eq!(log.nodes_of(NodeKind::Maximum), vec![0, 1, 2]);
        assert_eq!(complex.basins(Direction::Ascending).expect("basins"), vec![0, 1, 2]);
    }

    #[test]
    fn value_slot_can_precede_coordinates() {
        let tokens = vec![
            Token::Vertex { id: 0, data: vec![2.0, 0.0] },
            Token::Vertex { id: 1, data: vec![7.0, 1.0] },
            Token::Edge(0, 1),
        ];
        let config = ComplexConfig {
            value_slot: Some(0),
            ..single_thread()
        };
        let mut complex = MorseComplex::from_stream(MemoryStream::new(tokens), config).expect("complex");
        let mut log = EventLog::new();
        complex.compute(Direction::Ascending, &mut log).expect("compute");
        assert_eq!(log.nodes_of(NodeKind::Maximum), vec![1]);
        assert_eq!(log.range(), Some((2.0, 7.0)));
    }
}
