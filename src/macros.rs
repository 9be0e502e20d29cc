// (c) Copyright 2025 Helsing GmbH. All rights reserved.
/// Convenience macro for creating dot values.
///
/// NOTE! This is mostly useful for tests and documentation examples; real
/// dots are allocated by [`VersionVector::increment`].
///
/// ```rust
/// use convergent::dot;
///
/// let dot = dot!("a", 3);
/// assert_eq!(dot.counter(), 3);
/// ```
///
/// [`VersionVector::increment`]: crate::causal::VersionVector::increment
#[macro_export]
macro_rules! dot {
    ($actor:expr, $counter:expr) => {
        $crate::causal::Dot::mint($actor, $counter)
    };
}
