//! Variadic argument normalization.

use serde::{Deserialize, Serialize};

/// Arguments of one aggregated call, normalized to a single unit.
///
/// Zero arguments become [`Params::None`], exactly one becomes
/// [`Params::Single`] and anything longer becomes [`Params::Multi`] in the
/// order given. Serializes untagged, so a batch of `Params<i32>` renders as
/// e.g. `[null, 1, [1, 2, 3]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params<T> {
    None,
    Single(T),
    Multi(Vec<T>),
}

impl<T> Params<T> {
    pub fn from_args(args: impl IntoIterator<Item = T>) -> Self {
        let mut args: Vec<T> = args.into_iter().collect();
        match args.len() {
            0 => Params::None,
            1 => Params::Single(args.remove(0)),
            _ => Params::Multi(args),
        }
    }

    /// Number of positional arguments the call was made with.
    pub fn arity(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Single(_) => 1,
            Params::Multi(v) => v.len(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Params::None)
    }

    pub fn as_single(&self) -> Option<&T> {
        match self {
            Params::Single(v) => Some(v),
            _ => None,
        }
    }

    /// Back to positional form.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Params::None => Vec::new(),
            Params::Single(v) => vec![v],
            Params::Multi(v) => v,
        }
    }
}

impl<T> Default for Params<T> {
    fn default() -> Self {
        Params::None
    }
}

impl<T> From<Vec<T>> for Params<T> {
    fn from(args: Vec<T>) -> Self {
        Params::from_args(args)
    }
}

impl<T> From<Option<T>> for Params<T> {
    fn from(arg: Option<T>) -> Self {
        match arg {
            Some(v) => Params::Single(v),
            None => Params::None,
        }
    }
}

/// Build a [`Params`] from positional arguments.
///
/// ```rust
/// use aggregate_fn::{params, Params};
///
/// let none: Params<i32> = params![];
/// assert_eq!(none, Params::None);
/// assert_eq!(params![7], Params::Single(7));
/// assert_eq!(params![1, 2, 3], Params::Multi(vec![1, 2, 3]));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::batch::Params::None
    };
    ($single:expr $(,)?) => {
        $crate::batch::Params::Single($single)
    };
    ($($arg:expr),+ $(,)?) => {
        $crate::batch::Params::Multi(vec![$($arg),+])
    };
}
