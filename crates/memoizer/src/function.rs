use std::sync::Arc;

use serde::Serialize;

use crate::memoizer::Memoizer;

/// Functions that can be memoized while keeping their signature.
///
/// This is implemented for every `Fn` of up to 8 arguments whose arguments are
/// [`Serialize`] and whose return value is [`Clone`]. The `Args` parameter is the tuple of
/// argument types, and is inferred by the compiler.
pub trait MemoizeFn<Args>: Sized {
    /// The memoized function, taking the same arguments and returning the same type.
    type Memoized;

    /// Memoizes `self` on the given [`Memoizer`].
    fn memoize_with(self, memoizer: &Memoizer) -> Self::Memoized;
}

macro_rules! impl_memoize_fn {
    ($($ty:ident $arg:ident),*) => {
        impl<Func, R, $($ty,)*> MemoizeFn<($($ty,)*)> for Func
        where
            Func: Fn($($ty),*) -> R + Send + Sync + 'static,
            $($ty: Serialize + 'static,)*
            R: Clone + Send + Sync + 'static,
        {
            type Memoized = Arc<dyn Fn($($ty),*) -> R + Send + Sync>;

            fn memoize_with(self, memoizer: &Memoizer) -> Self::Memoized {
                let memoized = memoizer.wrap(move |($($arg,)*): ($($ty,)*)| (self)($($arg),*));
                Arc::new(move |$($arg: $ty),*| memoized.call(($($arg,)*)))
            }
        }
    };
}

impl_memoize_fn!();
impl_memoize_fn!(A a);
impl_memoize_fn!(A a, B b);
impl_memoize_fn!(A a, B b, C c);
impl_memoize_fn!(A a, B b, C c, D d);
impl_memoize_fn!(A a, B b, C c, D d, E e);
impl_memoize_fn!(A a, B b, C c, D d, E e, F f);
impl_memoize_fn!(A a, B b, C c, D d, E e, F f, G g);
impl_memoize_fn!(A a, B b, C c, D d, E e, F f, G g, H h);
