// lib.rs - Main library file
//!
//! Incremental constraint streams: declare constraints once as a network of
//! shared nodes, then insert, update and retract facts and read back the
//! score without recomputing it from scratch.
//!
//! ```
//! use greystream::prelude::*;
//!
//! #[derive(Debug)]
//! struct A { id: i64, x: i64 }
//! greynet_fact!(A, id);
//!
//! #[derive(Debug)]
//! struct B { id: i64, x: i64 }
//! greynet_fact!(B, id);
//!
//! let builder = ConstraintBuilder::<SimpleScore>::new();
//! builder
//!     .for_each::<A>()
//!     .join(&builder.for_each::<B>(), vec![Joiners::equal(|a: &A| a.x, |b: &B| b.x - 1)])
//!     .penalize("a before b", SimpleScore::ONE);
//! let graph = builder.build()?;
//!
//! let mut session = graph.create_session();
//! session.insert(A { id: 1, x: 1 })?;
//! session.insert_batch(vec![B { id: 2, x: 2 }, B { id: 3, x: 3 }])?;
//! assert_eq!(session.calculate_score()?, SimpleScore::of(-1));
//!
//! session.retract_by_id::<B>(2)?;
//! assert_eq!(session.calculate_score()?, SimpleScore::ZERO);
//! # Ok::<(), GreynetError>(())
//! ```

pub mod analysis;
pub mod arena;
pub mod collectors;
pub mod config;
pub mod constraint;
pub mod constraint_builder;
pub mod error;
pub mod fact;
pub mod fact_impls;
pub mod factory;
pub mod functions;
pub mod graph;
pub mod group_node;
pub mod indexer;
pub mod join_nodes;
pub mod joiner;
pub mod network;
pub mod node_memory;
pub mod node_operations;
pub mod node_sharing;
pub mod nodes;
pub mod resource_limits;
pub mod scheduler;
pub mod score;
pub mod session;
pub mod state;
pub mod stream_def;
pub mod tuple;

// Re-export core types for easier access from outside the crate.
pub use analysis::{ConstraintMatch, ConstraintMatchTotal, Indictment, NetworkStatistics, ScoreExplanation};
pub use collectors::{BaseCollector, CollectorSupplier, Collectors, UndoReceipt};
pub use config::{ConfigError, EnvironmentMode, PropagationMode, SessionConfig};
pub use constraint::{ConstraintId, ImpactType};
pub use constraint_builder::ConstraintBuilder;
pub use error::{GreynetError, Result};
pub use fact::{FactRef, GreynetFact};
pub use fact_impls::FactList;
pub use functions::Predicates;
pub use graph::ConstraintGraph;
pub use indexer::{Indexer, IndexerKey};
pub use joiner::{Joiner, JoinerType, Joiners};
pub use resource_limits::ResourceLimits;
pub use score::{HardMediumSoftScore, HardSoftScore, Score, SimpleScore};
pub use session::Session;
pub use state::TupleState;
pub use stream_def::{Arity, Arity1, Arity2, Arity3, Arity4, ConstraintHandle, Stream};
pub use tuple::{NodeId, TupleId, TupleView, MAX_ARITY};

/// Test support: panics unless a session holds no tuples.
///
/// Meant for test suites that retract every fact and want to prove the network
/// released everything it created. The session must be flushed first, since
/// retractions still queued count as live tuples.
///
/// ```
/// use greystream::prelude::*;
///
/// #[derive(Debug)]
/// struct Shift {
///     id: i64,
/// }
/// greynet_fact!(Shift, id);
///
/// let builder = ConstraintBuilder::<SimpleScore>::new();
/// builder.for_each::<Shift>().penalize("shift", SimpleScore::ONE);
/// let graph = builder.build().unwrap();
/// let mut session = graph.create_session();
/// session.insert(Shift { id: 1 }).unwrap();
/// session.retract_by_id::<Shift>(1).unwrap();
/// session.flush().unwrap();
/// greystream::assert_no_leaks!(session);
/// ```
#[macro_export]
macro_rules! assert_no_leaks {
    ($session:expr) => {{
        let tuples = $session.tuple_count();
        if tuples != 0 {
            panic!("Tuple leak detected: {} tuples still alive", tuples);
        }
    }};
}

/// Convenience function to create a new constraint builder.
pub fn builder<S: Score>() -> ConstraintBuilder<S> {
    ConstraintBuilder::new()
}

/// A "prelude" module for easily importing the most commonly used types.
pub mod prelude {
    pub use crate::{
        builder, greynet_fact, Arity1, Arity2, Arity3, Arity4, Collectors, ConstraintBuilder, ConstraintId,
        FactRef, GreynetError, GreynetFact, HardMediumSoftScore, HardSoftScore, Joiners, Predicates,
        ResourceLimits, Result, Score, Session, SessionConfig, SimpleScore, Stream, TupleView,
    };

    pub use std::rc::Rc;
}
