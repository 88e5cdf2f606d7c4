//! Declared Sources
//!
//! The static-dependency flavor of deriveds and effects names its inputs up
//! front. Anything implementing [`Sources`] can be used as that list:
//!
//! - a single [`Signal`], [`ReadSignal`] or [`Derived`]
//! - a tuple of up to eight of them, possibly of different value types
//! - a `Vec` of same-typed handles
//!
//! The calculation receives the values in the same shape.
//!
//! ```rust,ignore
//! let s = Signal::new(1);
//! let t = Signal::new(2);
//! let sum = Derived::with_sources((s.clone(), t.clone()), |(x, y)| x + y)?;
//! ```

use std::sync::Arc;

use super::derived::Derived;
use super::signal::{ReadSignal, Signal};
use crate::error::SignalError;
use crate::graph::Upstream;

/// A handle whose value can be declared as a source.
pub trait Readable: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    #[doc(hidden)]
    fn upstream(&self) -> Arc<dyn Upstream>;

    /// Bring the node up to date and read it without consulting the
    /// reentrancy guard.
    #[doc(hidden)]
    fn fetch(&self) -> Result<Self::Value, SignalError>;
}

/// A declared list of sources.
pub trait Sources: Send + Sync + 'static {
    /// The values handed to the calculation or action.
    type Values;

    #[doc(hidden)]
    fn upstreams(&self) -> Result<Vec<Arc<dyn Upstream>>, SignalError>;

    #[doc(hidden)]
    fn fetch(&self) -> Result<Self::Values, SignalError>;
}

macro_rules! impl_sources_for_handle {
    ($($handle:ident),+) => {
        $(
            impl<T> Sources for $handle<T>
            where
                $handle<T>: Readable<Value = T>,
            {
                type Values = T;

                fn upstreams(&self) -> Result<Vec<Arc<dyn Upstream>>, SignalError> {
                    Ok(vec![self.upstream()])
                }

                fn fetch(&self) -> Result<T, SignalError> {
                    Readable::fetch(self)
                }
            }
        )+
    };
}

impl_sources_for_handle!(Signal, ReadSignal, Derived);

macro_rules! impl_sources_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: Readable),+> Sources for ($($name,)+) {
            type Values = ($($name::Value,)+);

            #[allow(non_snake_case)]
            fn upstreams(&self) -> Result<Vec<Arc<dyn Upstream>>, SignalError> {
                let ($($name,)+) = self;
                Ok(vec![$(Readable::upstream($name)),+])
            }

            #[allow(non_snake_case)]
            fn fetch(&self) -> Result<Self::Values, SignalError> {
                let ($($name,)+) = self;
                Ok(($(Readable::fetch($name)?,)+))
            }
        }
    };
}

impl_sources_for_tuple!(A);
impl_sources_for_tuple!(A, B);
impl_sources_for_tuple!(A, B, C);
impl_sources_for_tuple!(A, B, C, D);
impl_sources_for_tuple!(A, B, C, D, E);
impl_sources_for_tuple!(A, B, C, D, E, F);
impl_sources_for_tuple!(A, B, C, D, E, F, G);
impl_sources_for_tuple!(A, B, C, D, E, F, G, H);

impl<S: Readable> Sources for Vec<S> {
    type Values = Vec<S::Value>;

    fn upstreams(&self) -> Result<Vec<Arc<dyn Upstream>>, SignalError> {
        if self.is_empty() {
            return Err(SignalError::NoSources);
        }
        Ok(self.iter().map(Readable::upstream).collect())
    }

    fn fetch(&self) -> Result<Self::Values, SignalError> {
        self.iter().map(Readable::fetch).collect()
    }
}
