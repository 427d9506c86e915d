/// A key type that can be stored in an [`OrderedSet`](crate::OrderedSet).
///
/// The set's internal list is bounded by two immortal sentinel nodes holding
/// [`MIN`](Element::MIN) and [`MAX`](Element::MAX). Every real element must
/// compare strictly between the two, so the sentinel values themselves cannot
/// be inserted.
///
/// Implementations are provided for the primitive integer types, using their
/// natural bounds as sentinels.
pub trait Element: Ord {
    /// The lower sentinel bound, comparing strictly less than every element.
    const MIN: Self;

    /// The upper sentinel bound, comparing strictly greater than every element.
    const MAX: Self;
}

macro_rules! impl_element {
    ($($int:ty),*) => {$(
        impl Element for $int {
            const MIN: Self = <$int>::MIN;
            const MAX: Self = <$int>::MAX;
        }
    )*};
}

impl_element! { i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize }
