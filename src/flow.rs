//! `Flow`: the declarative, type-preserving per-channel transformation
//! pipeline.
//!
//! Each operator is an object-safe `FlowOp<T>` with its own interior-mutability
//! state, validated eagerly at the builder call site: a malformed pipeline
//! fails deterministically at the point of construction, not on first use.

use std::fmt;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::error::{SubstratesError, SubstratesResult};

/// One stage of a Flow pipeline. Object-safe: `T` is the trait's own
/// parameter, not a method generic, so `Arc<dyn FlowOp<T>>` is usable.
pub trait FlowOp<T>: Send + Sync {
    /// Applies this stage to a value that passed every upstream stage.
    /// `None` means the value is dropped for this channel's subscribers;
    /// stages downstream of a drop never see the value, so `peek` never
    /// observes a value dropped upstream.
    fn apply(&self, value: T) -> Option<T>;
}

type StageFactory<T> = Arc<dyn Fn() -> Arc<dyn FlowOp<T>> + Send + Sync>;

/// An immutable, per-channel instantiated pipeline. Each stage carries its
/// own state (counters, accumulators, last-seen values); a `Flow` is never
/// shared across two channels, so that state is never aliased.
pub struct Flow<T> {
    stages: Vec<Arc<dyn FlowOp<T>>>,
}

impl<T> Flow<T> {
    /// Threads `value` through every stage in order, short-circuiting on
    /// the first stage that drops it.
    pub fn apply_all(&self, value: T) -> Option<T> {
        let mut current = Some(value);
        for stage in &self.stages {
            match current {
                Some(v) => current = stage.apply(v),
                None => break,
            }
        }
        current
    }
}

/// A reusable template for a `Flow`, instantiated fresh (with fresh
/// per-stage state) for every channel that materializes it.
#[derive(Clone)]
pub struct FlowTemplate<T> {
    factories: Vec<StageFactory<T>>,
}

impl<T> Default for FlowTemplate<T> {
    fn default() -> Self {
        FlowTemplate {
            factories: Vec::new(),
        }
    }
}

impl<T: Send + Sync + 'static> FlowTemplate<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn FlowOp<T>> + Send + Sync + 'static,
    {
        self.factories.push(Arc::new(factory));
        self
    }

    pub fn build(&self) -> Flow<T> {
        Flow {
            stages: self.factories.iter().map(|f| f()).collect(),
        }
    }

    /// `guard(predicate)` — pass iff predicate true.
    pub fn guard<P>(self, predicate: P) -> SubstratesResult<Self>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Ok(self.push(move || {
            let predicate = predicate.clone();
            Arc::new(Guard { predicate }) as Arc<dyn FlowOp<T>>
        }))
    }

    /// `peek(receptor)` — side-effect-only; never alters value or passage.
    pub fn peek<F>(self, receptor: F) -> SubstratesResult<Self>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let receptor = Arc::new(receptor);
        Ok(self.push(move || {
            let receptor = receptor.clone();
            Arc::new(Peek { receptor }) as Arc<dyn FlowOp<T>>
        }))
    }

    /// `replace(transformer)` — replace the value with `transformer(value)`.
    pub fn replace<F>(self, transformer: F) -> SubstratesResult<Self>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let transformer = Arc::new(transformer);
        Ok(self.push(move || {
            let transformer = transformer.clone();
            Arc::new(Replace { transformer }) as Arc<dyn FlowOp<T>>
        }))
    }

    /// `sample(n)` — pass every `n`-th value; `n >= 1`; `sample(1)` is
    /// identity.
    pub fn sample_count(self, n: u64) -> SubstratesResult<Self>
    where
        T: 'static,
    {
        if n < 1 {
            return Err(SubstratesError::invalid_argument(format!(
                "sample(n): n must be >= 1, got {n}"
            )));
        }
        Ok(self.push(move || Arc::new(SampleCount::new(n)) as Arc<dyn FlowOp<T>>))
    }

    /// `skip(n)` — drop the first `n` passing values; `n >= 0`; `skip(0)` is
    /// identity.
    pub fn skip(self, n: u64) -> SubstratesResult<Self>
    where
        T: 'static,
    {
        Ok(self.push(move || Arc::new(Skip::new(n)) as Arc<dyn FlowOp<T>>))
    }

    /// `limit(n)` — pass at most `n` values total, then block indefinitely.
    /// Multiple `limit`s compose as the minimum effective bound: chaining
    /// `limit(n1).limit(n2)` is two independent counters, each capping at
    /// its own `n`, so the combined effect is exactly `min(n1, n2)`.
    pub fn limit(self, n: u64) -> SubstratesResult<Self>
    where
        T: 'static,
    {
        Ok(self.push(move || Arc::new(Limit::new(n)) as Arc<dyn FlowOp<T>>))
    }

    pub fn sift_high(self) -> SubstratesResult<Self>
    where
        T: PartialOrd + Clone + Send + Sync + 'static,
    {
        Ok(self.push(|| Arc::new(SiftHigh::<T>::new()) as Arc<dyn FlowOp<T>>))
    }

    pub fn sift_low(self) -> SubstratesResult<Self>
    where
        T: PartialOrd + Clone + Send + Sync + 'static,
    {
        Ok(self.push(|| Arc::new(SiftLow::<T>::new()) as Arc<dyn FlowOp<T>>))
    }

    pub fn sift_min(self, bound: T) -> SubstratesResult<Self>
    where
        T: PartialOrd + Clone + Send + Sync + 'static,
    {
        Ok(self.push(move || Arc::new(SiftMin { bound: bound.clone() }) as Arc<dyn FlowOp<T>>))
    }

    pub fn sift_max(self, bound: T) -> SubstratesResult<Self>
    where
        T: PartialOrd + Clone + Send + Sync + 'static,
    {
        Ok(self.push(move || Arc::new(SiftMax { bound: bound.clone() }) as Arc<dyn FlowOp<T>>))
    }

    pub fn sift_range(self, lo: T, hi: T) -> SubstratesResult<Self>
    where
        T: PartialOrd + Clone + Send + Sync + 'static,
    {
        if !(lo <= hi) {
            return Err(SubstratesError::invalid_argument(
                "sift range: lo must be <= hi",
            ));
        }
        Ok(self.push(move || {
            Arc::new(SiftRange {
                lo: lo.clone(),
                hi: hi.clone(),
            }) as Arc<dyn FlowOp<T>>
        }))
    }

    pub fn sift_above(self, lo: T) -> SubstratesResult<Self>
    where
        T: PartialOrd + Clone + Send + Sync + 'static,
    {
        Ok(self.push(move || Arc::new(SiftAbove { lo: lo.clone() }) as Arc<dyn FlowOp<T>>))
    }

    pub fn sift_below(self, hi: T) -> SubstratesResult<Self>
    where
        T: PartialOrd + Clone + Send + Sync + 'static,
    {
        Ok(self.push(move || Arc::new(SiftBelow { hi: hi.clone() }) as Arc<dyn FlowOp<T>>))
    }
}

impl<T: PartialEq + Clone + Send + Sync + 'static> FlowTemplate<T> {
    /// `diff()` — drop consecutive duplicates.
    pub fn diff(self) -> SubstratesResult<Self> {
        Ok(self.push(|| Arc::new(Diff::<T>::new(None)) as Arc<dyn FlowOp<T>>))
    }

    /// `diff(initial)` — as above, seeded with an explicit "last emitted".
    pub fn diff_with_initial(self, initial: T) -> SubstratesResult<Self> {
        Ok(self.push(move || Arc::new(Diff::new(Some(initial.clone()))) as Arc<dyn FlowOp<T>>))
    }

    /// `guard(initial, (prev, next) -> bool)` — stateful guard carrying the
    /// previous passed value.
    pub fn guard_stateful<F>(self, initial: T, predicate: F) -> SubstratesResult<Self>
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Ok(self.push(move || {
            Arc::new(StatefulGuard {
                prev: Mutex::new(initial.clone()),
                predicate: predicate.clone(),
            }) as Arc<dyn FlowOp<T>>
        }))
    }

    /// `reduce(initial, op)` — maintain an accumulator; emit the updated
    /// accumulator.
    pub fn reduce<F>(self, initial: T, op: F) -> SubstratesResult<Self>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        Ok(self.push(move || {
            Arc::new(Reduce {
                acc: Mutex::new(initial.clone()),
                op: op.clone(),
            }) as Arc<dyn FlowOp<T>>
        }))
    }
}

impl<T> FlowTemplate<T>
where
    T: Send + Sync + 'static,
{
    /// `sample(r)` — probabilistic pass with rate `r` in `[0, 1]`.
    pub fn sample_rate(self, rate: f64) -> SubstratesResult<Self> {
        if rate.is_nan() || !(0.0..=1.0).contains(&rate) {
            return Err(SubstratesError::invalid_argument(format!(
                "sample(rate): rate must be in [0, 1] and not NaN, got {rate}"
            )));
        }
        Ok(self.push(move || Arc::new(SampleRate::new(rate)) as Arc<dyn FlowOp<T>>))
    }
}

// ---- stage implementations ----

struct Guard<T> {
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> FlowOp<T> for Guard<T> {
    fn apply(&self, value: T) -> Option<T> {
        if (self.predicate)(&value) {
            Some(value)
        } else {
            None
        }
    }
}

struct StatefulGuard<T> {
    prev: Mutex<T>,
    predicate: Arc<dyn Fn(&T, &T) -> bool + Send + Sync>,
}

impl<T: Clone + Send> FlowOp<T> for StatefulGuard<T> {
    fn apply(&self, value: T) -> Option<T> {
        let mut prev = self.prev.lock();
        if (self.predicate)(&prev, &value) {
            *prev = value.clone();
            Some(value)
        } else {
            None
        }
    }
}

struct Diff<T> {
    last: Mutex<Option<T>>,
}

impl<T> Diff<T> {
    fn new(initial: Option<T>) -> Self {
        Diff {
            last: Mutex::new(initial),
        }
    }
}

impl<T: PartialEq + Clone + Send> FlowOp<T> for Diff<T> {
    fn apply(&self, value: T) -> Option<T> {
        let mut last = self.last.lock();
        let dup = last.as_ref().is_some_and(|l| l == &value);
        *last = Some(value.clone());
        if dup {
            None
        } else {
            Some(value)
        }
    }
}

struct Peek<T> {
    receptor: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T> FlowOp<T> for Peek<T> {
    fn apply(&self, value: T) -> Option<T> {
        (self.receptor)(&value);
        Some(value)
    }
}

struct Replace<T> {
    transformer: Arc<dyn Fn(T) -> T + Send + Sync>,
}

impl<T> FlowOp<T> for Replace<T> {
    fn apply(&self, value: T) -> Option<T> {
        Some((self.transformer)(value))
    }
}

struct Reduce<T> {
    acc: Mutex<T>,
    op: Arc<dyn Fn(T, T) -> T + Send + Sync>,
}

impl<T: Clone + Send> FlowOp<T> for Reduce<T> {
    fn apply(&self, value: T) -> Option<T> {
        let mut acc = self.acc.lock();
        let next = (self.op)(acc.clone(), value);
        *acc = next.clone();
        Some(next)
    }
}

struct SampleCount {
    n: u64,
    counter: Mutex<u64>,
}

impl SampleCount {
    fn new(n: u64) -> Self {
        SampleCount {
            n,
            counter: Mutex::new(0),
        }
    }
}

impl<T> FlowOp<T> for SampleCount {
    fn apply(&self, value: T) -> Option<T> {
        let mut counter = self.counter.lock();
        *counter += 1;
        if *counter % self.n == 0 {
            Some(value)
        } else {
            None
        }
    }
}

struct SampleRate {
    rate: f64,
    rng: Mutex<rand::rngs::StdRng>,
}

impl SampleRate {
    fn new(rate: f64) -> Self {
        use rand::SeedableRng;
        SampleRate {
            rate,
            rng: Mutex::new(rand::rngs::StdRng::from_entropy()),
        }
    }
}

impl<T> FlowOp<T> for SampleRate {
    fn apply(&self, value: T) -> Option<T> {
        use rand::Rng;
        let draw: f64 = self.rng.lock().gen();
        if draw < self.rate {
            Some(value)
        } else {
            None
        }
    }
}

struct Skip {
    n: u64,
    skipped: Mutex<u64>,
}

impl Skip {
    fn new(n: u64) -> Self {
        Skip {
            n,
            skipped: Mutex::new(0),
        }
    }
}

impl<T> FlowOp<T> for Skip {
    fn apply(&self, value: T) -> Option<T> {
        let mut skipped = self.skipped.lock();
        if *skipped < self.n {
            *skipped += 1;
            None
        } else {
            Some(value)
        }
    }
}

struct Limit {
    n: u64,
    passed: Mutex<u64>,
}

impl Limit {
    fn new(n: u64) -> Self {
        Limit {
            n,
            passed: Mutex::new(0),
        }
    }
}

impl<T> FlowOp<T> for Limit {
    fn apply(&self, value: T) -> Option<T> {
        let mut passed = self.passed.lock();
        if *passed < self.n {
            *passed += 1;
            Some(value)
        } else {
            None
        }
    }
}

struct SiftHigh<T> {
    max: Mutex<Option<T>>,
}

impl<T> SiftHigh<T> {
    fn new() -> Self {
        SiftHigh {
            max: Mutex::new(None),
        }
    }
}

impl<T: PartialOrd + Clone + Send> FlowOp<T> for SiftHigh<T> {
    fn apply(&self, value: T) -> Option<T> {
        let mut max = self.max.lock();
        let passes = max.as_ref().map_or(true, |m| &value > m);
        if passes {
            *max = Some(value.clone());
            Some(value)
        } else {
            None
        }
    }
}

struct SiftLow<T> {
    min: Mutex<Option<T>>,
}

impl<T> SiftLow<T> {
    fn new() -> Self {
        SiftLow {
            min: Mutex::new(None),
        }
    }
}

impl<T: PartialOrd + Clone + Send> FlowOp<T> for SiftLow<T> {
    fn apply(&self, value: T) -> Option<T> {
        let mut min = self.min.lock();
        let passes = min.as_ref().map_or(true, |m| &value < m);
        if passes {
            *min = Some(value.clone());
            Some(value)
        } else {
            None
        }
    }
}

struct SiftMin<T> {
    bound: T,
}

impl<T: PartialOrd + Send + Sync> FlowOp<T> for SiftMin<T> {
    fn apply(&self, value: T) -> Option<T> {
        if value >= self.bound {
            Some(value)
        } else {
            None
        }
    }
}

struct SiftMax<T> {
    bound: T,
}

impl<T: PartialOrd + Send + Sync> FlowOp<T> for SiftMax<T> {
    fn apply(&self, value: T) -> Option<T> {
        if value <= self.bound {
            Some(value)
        } else {
            None
        }
    }
}

struct SiftRange<T> {
    lo: T,
    hi: T,
}

impl<T: PartialOrd + Send + Sync> FlowOp<T> for SiftRange<T> {
    fn apply(&self, value: T) -> Option<T> {
        if value >= self.lo && value <= self.hi {
            Some(value)
        } else {
            None
        }
    }
}

struct SiftAbove<T> {
    lo: T,
}

impl<T: PartialOrd + Send + Sync> FlowOp<T> for SiftAbove<T> {
    fn apply(&self, value: T) -> Option<T> {
        if value > self.lo {
            Some(value)
        } else {
            None
        }
    }
}

struct SiftBelow<T> {
    hi: T,
}

impl<T: PartialOrd + Send + Sync> FlowOp<T> for SiftBelow<T> {
    fn apply(&self, value: T) -> Option<T> {
        if value < self.hi {
            Some(value)
        } else {
            None
        }
    }
}

impl<T> fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flow({} stages)", self.stages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn diff_and_guard_pipeline() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let obs = observed.clone();
        let template = FlowTemplate::<i64>::new()
            .diff()
            .unwrap()
            .diff_with_initial(0)
            .unwrap()
            .guard(|v| v % 2 == 0)
            .unwrap()
            .guard_stateful(0, |prev, next| next > prev)
            .unwrap()
            .peek(move |v| obs.lock().push(*v))
            .unwrap();
        let flow = template.build();
        for v in [2, 2, 4, 3, 6, 5, 8] {
            flow.apply_all(v);
        }
        assert_eq!(*observed.lock(), vec![2, 4, 6, 8]);
    }

    #[test]
    fn skip_zero_is_identity() {
        let flow = FlowTemplate::<i64>::new().skip(0).unwrap().build();
        let out: Vec<_> = (1..=5).filter_map(|v| flow.apply_all(v)).collect();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn skip_three_drops_the_first_three() {
        let flow = FlowTemplate::<i64>::new().skip(3).unwrap().build();
        let out: Vec<_> = (1..=10).filter_map(|v| flow.apply_all(v)).collect();
        assert_eq!(out, vec![4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn limit_composes_as_minimum() {
        let flow = FlowTemplate::<i64>::new()
            .limit(10)
            .unwrap()
            .limit(3)
            .unwrap()
            .build();
        let out: Vec<_> = (1..=20).filter_map(|v| flow.apply_all(v)).collect();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn sift_chain() {
        let pre_low = Arc::new(Mutex::new(Vec::new()));
        let pl = pre_low.clone();
        let flow = FlowTemplate::<i64>::new()
            .sift_high()
            .unwrap()
            .sift_min(2)
            .unwrap()
            .sift_max(8)
            .unwrap()
            .sift_range(3, 7)
            .unwrap()
            .sift_above(4)
            .unwrap()
            .sift_below(7)
            .unwrap()
            .peek(move |v| pl.lock().push(*v))
            .unwrap()
            .sift_low()
            .unwrap()
            .build();
        let out: Vec<_> = (1..=9).filter_map(|v| flow.apply_all(v)).collect();
        assert_eq!(*pre_low.lock(), vec![5, 6]);
        assert_eq!(out, vec![5]);
    }

    #[test]
    fn replace_identity_law() {
        let flow = FlowTemplate::<i64>::new().replace(|v| v).unwrap().build();
        assert_eq!(flow.apply_all(7), Some(7));
    }

    #[test]
    fn sample_one_is_identity() {
        let flow = FlowTemplate::<i64>::new().sample_count(1).unwrap().build();
        let out: Vec<_> = (1..=5).filter_map(|v| flow.apply_all(v)).collect();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn reduce_accumulates() {
        let flow = FlowTemplate::<i64>::new()
            .reduce(0, |acc, v| acc + v)
            .unwrap()
            .build();
        let mut last = None;
        for v in 1..=5 {
            last = flow.apply_all(v);
        }
        assert_eq!(last, Some(15));
    }

    #[test]
    fn validation_errors_surface_at_construction() {
        assert!(FlowTemplate::<i64>::new().sample_count(0).is_err());
        assert!(FlowTemplate::<f64>::new().sample_rate(-0.1).is_err());
        assert!(FlowTemplate::<f64>::new().sample_rate(1.1).is_err());
        assert!(FlowTemplate::<f64>::new().sample_rate(f64::NAN).is_err());
    }

    #[test]
    fn peek_never_observes_dropped_values() {
        let seen = Arc::new(AtomicI64::new(0));
        let s = seen.clone();
        let flow = FlowTemplate::<i64>::new()
            .guard(|v| *v > 3)
            .unwrap()
            .peek(move |v| {
                s.fetch_add(*v, Ordering::SeqCst);
            })
            .unwrap()
            .build();
        for v in 1..=3 {
            flow.apply_all(v);
        }
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        flow.apply_all(4);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }
}
