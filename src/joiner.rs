// joiner.rs - Joiner types and joiner sets
use crate::fact::GreynetFact;
use crate::functions::{key_extractor, pair_predicate, FunctionId, KeyExtractor, PairPredicate};
use crate::indexer::{IndexProperty, IndexerKey};
use crate::tuple::TupleView;
use crate::Result;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

/// Types of joiners supported by the constraint system.
///
/// Only `Equal` joiners are indexed; every other type is evaluated as a
/// filter against the candidates of the equality bucket.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum JoinerType {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Filtering,
}

impl JoinerType {
    /// Applies the comparison of this joiner type.
    pub fn compare<K: PartialOrd + ?Sized>(&self, left: &K, right: &K) -> bool {
        match self {
            JoinerType::Equal => left == right,
            JoinerType::NotEqual => left != right,
            JoinerType::LessThan => left < right,
            JoinerType::LessThanOrEqual => left <= right,
            JoinerType::GreaterThan => left > right,
            JoinerType::GreaterThanOrEqual => left >= right,
            JoinerType::Filtering => true,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, JoinerType::Equal)
    }
}

#[derive(Clone)]
pub enum JoinerCondition {
    Indexed { left: KeyExtractor, right: KeyExtractor },
    Filtering(PairPredicate),
}

/// One join condition between a left tuple and a right tuple.
#[derive(Clone)]
pub struct Joiner {
    pub joiner_type: JoinerType,
    pub condition: JoinerCondition,
}

/// Sharing identity of a joiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoinerKey {
    pub joiner_type: JoinerType,
    pub left: FunctionId,
    pub right: FunctionId,
}

impl Joiner {
    pub fn sharing_key(&self) -> JoinerKey {
        match &self.condition {
            JoinerCondition::Indexed { left, right } => JoinerKey {
                joiner_type: self.joiner_type,
                left: FunctionId::of(left),
                right: FunctionId::of(right),
            },
            JoinerCondition::Filtering(predicate) => JoinerKey {
                joiner_type: self.joiner_type,
                left: FunctionId::of(predicate),
                right: FunctionId(0),
            },
        }
    }
}

impl Debug for Joiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Joiner")
            .field("joiner_type", &self.joiner_type)
            .field("key", &self.sharing_key())
            .finish()
    }
}

/// Constructors for joiners.
///
/// Typed extractors read the fact at index 0 of each side unless stated
/// otherwise; use the `_tuple` variants to read arbitrary positions.
pub struct Joiners;

impl Joiners {
    /// `left(a) == right(b)`, indexed.
    pub fn equal<A, B, K, FL, FR>(left: FL, right: FR) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        K: Eq + Hash + Debug + 'static,
        FL: Fn(&A) -> K + Send + Sync + 'static,
        FR: Fn(&B) -> K + Send + Sync + 'static,
    {
        Self::equal_at(0, left, right)
    }

    /// Like [`equal`](Self::equal), reading the left fact at `left_index`.
    pub fn equal_at<A, B, K, FL, FR>(left_index: usize, left: FL, right: FR) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        K: Eq + Hash + Debug + 'static,
        FL: Fn(&A) -> K + Send + Sync + 'static,
        FR: Fn(&B) -> K + Send + Sync + 'static,
    {
        Joiner {
            joiner_type: JoinerType::Equal,
            condition: JoinerCondition::Indexed {
                left: key_extractor(move |t| {
                    Ok(Rc::new(left(t.get::<A>(left_index)?)) as Rc<dyn IndexProperty>)
                }),
                right: key_extractor(move |t| {
                    Ok(Rc::new(right(t.get::<B>(0)?)) as Rc<dyn IndexProperty>)
                }),
            },
        }
    }

    /// Same mapping on both sides; both sides share one function identity.
    pub fn equal_by<A, K, F>(mapping: F) -> Joiner
    where
        A: GreynetFact,
        K: Eq + Hash + Debug + 'static,
        F: Fn(&A) -> K + Send + Sync + 'static,
    {
        let extractor =
            key_extractor(move |t| Ok(Rc::new(mapping(t.get::<A>(0)?)) as Rc<dyn IndexProperty>));
        Joiner {
            joiner_type: JoinerType::Equal,
            condition: JoinerCondition::Indexed {
                left: extractor.clone(),
                right: extractor,
            },
        }
    }

    /// Equality on keys read from whole tuples.
    pub fn equal_tuple<K, FL, FR>(left: FL, right: FR) -> Joiner
    where
        K: Eq + Hash + Debug + 'static,
        FL: Fn(&TupleView) -> Result<K> + Send + Sync + 'static,
        FR: Fn(&TupleView) -> Result<K> + Send + Sync + 'static,
    {
        Joiner {
            joiner_type: JoinerType::Equal,
            condition: JoinerCondition::Indexed {
                left: key_extractor(move |t| Ok(Rc::new(left(t)?) as Rc<dyn IndexProperty>)),
                right: key_extractor(move |t| Ok(Rc::new(right(t)?) as Rc<dyn IndexProperty>)),
            },
        }
    }

    fn comparing<A, B, K, FL, FR>(joiner_type: JoinerType, left: FL, right: FR) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        K: PartialOrd + 'static,
        FL: Fn(&A) -> K + Send + Sync + 'static,
        FR: Fn(&B) -> K + Send + Sync + 'static,
    {
        Joiner {
            joiner_type,
            condition: JoinerCondition::Filtering(pair_predicate(move |l, r| {
                Ok(joiner_type.compare(&left(l.get::<A>(0)?), &right(r.get::<B>(0)?)))
            })),
        }
    }

    pub fn not_equal<A, B, K, FL, FR>(left: FL, right: FR) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        K: PartialOrd + 'static,
        FL: Fn(&A) -> K + Send + Sync + 'static,
        FR: Fn(&B) -> K + Send + Sync + 'static,
    {
        Self::comparing(JoinerType::NotEqual, left, right)
    }

    pub fn less_than<A, B, K, FL, FR>(left: FL, right: FR) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        K: PartialOrd + 'static,
        FL: Fn(&A) -> K + Send + Sync + 'static,
        FR: Fn(&B) -> K + Send + Sync + 'static,
    {
        Self::comparing(JoinerType::LessThan, left, right)
    }

    pub fn less_than_or_equal<A, B, K, FL, FR>(left: FL, right: FR) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        K: PartialOrd + 'static,
        FL: Fn(&A) -> K + Send + Sync + 'static,
        FR: Fn(&B) -> K + Send + Sync + 'static,
    {
        Self::comparing(JoinerType::LessThanOrEqual, left, right)
    }

    pub fn greater_than<A, B, K, FL, FR>(left: FL, right: FR) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        K: PartialOrd + 'static,
        FL: Fn(&A) -> K + Send + Sync + 'static,
        FR: Fn(&B) -> K + Send + Sync + 'static,
    {
        Self::comparing(JoinerType::GreaterThan, left, right)
    }

    pub fn greater_than_or_equal<A, B, K, FL, FR>(left: FL, right: FR) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        K: PartialOrd + 'static,
        FL: Fn(&A) -> K + Send + Sync + 'static,
        FR: Fn(&B) -> K + Send + Sync + 'static,
    {
        Self::comparing(JoinerType::GreaterThanOrEqual, left, right)
    }

    /// Arbitrary predicate over the first left fact and the right fact.
    pub fn filtering<A, B, F>(predicate: F) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        F: Fn(&A, &B) -> bool + Send + Sync + 'static,
    {
        Self::filtering_tuple(move |l, r| Ok(predicate(l.get::<A>(0)?, r.get::<B>(0)?)))
    }

    /// Predicate over a bi left tuple and the right fact.
    pub fn filtering_bi<A, B, C, F>(predicate: F) -> Joiner
    where
        A: GreynetFact,
        B: GreynetFact,
        C: GreynetFact,
        F: Fn(&A, &B, &C) -> bool + Send + Sync + 'static,
    {
        Self::filtering_tuple(move |l, r| {
            Ok(predicate(l.get::<A>(0)?, l.get::<B>(1)?, r.get::<C>(0)?))
        })
    }

    pub fn filtering_tuple<F>(predicate: F) -> Joiner
    where
        F: Fn(&TupleView, &TupleView) -> Result<bool> + Send + Sync + 'static,
    {
        Joiner {
            joiner_type: JoinerType::Filtering,
            condition: JoinerCondition::Filtering(pair_predicate(predicate)),
        }
    }
}

/// The joiners of one join or exists node, split into the indexed equality
/// part and the filtering part. Both keep declaration order.
#[derive(Clone, Default)]
pub struct JoinerSet {
    indexed: Vec<(KeyExtractor, KeyExtractor)>,
    filters: Vec<PairPredicate>,
    keys: Vec<JoinerKey>,
}

impl JoinerSet {
    pub fn new(joiners: Vec<Joiner>) -> Self {
        let mut set = JoinerSet::default();
        for joiner in joiners {
            set.keys.push(joiner.sharing_key());
            match joiner.condition {
                JoinerCondition::Indexed { left, right } => set.indexed.push((left, right)),
                JoinerCondition::Filtering(predicate) => set.filters.push(predicate),
            }
        }
        set
    }

    pub fn left_key(&self, left: &TupleView) -> Result<IndexerKey> {
        let mut key = IndexerKey::new();
        for (extractor, _) in &self.indexed {
            key.push(extractor(left)?);
        }
        Ok(key)
    }

    pub fn right_key(&self, right: &TupleView) -> Result<IndexerKey> {
        let mut key = IndexerKey::new();
        for (_, extractor) in &self.indexed {
            key.push(extractor(right)?);
        }
        Ok(key)
    }

    /// Runs the filtering joiners; stops at the first rejection.
    pub fn test(&self, left: &TupleView, right: &TupleView) -> Result<bool> {
        for filter in &self.filters {
            if !filter(left, right)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn sharing_keys(&self) -> &[JoinerKey] {
        &self.keys
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }
}

impl Debug for JoinerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinerSet")
            .field("indexed", &self.indexed.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}
