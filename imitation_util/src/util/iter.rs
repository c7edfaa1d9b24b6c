//! Iteration helpers for data loaders.

use std::iter::{Chain, Cycle, Once};

use crate::error::{Result, UtilError};

/// Cycle forever over a restartable source.
///
/// The source's iterator must be `Clone` so that each pass can restart from
/// the beginning; a single-pass iterator does not satisfy the bound. An empty
/// source fails with [`UtilError::EmptyIterable`] instead of producing an
/// iterator that never yields.
///
/// ```ignore
/// let batches = vec![1, 2, 3];
/// let mut it = endless_iter(&batches)?;
/// // 1, 2, 3, 1, 2, 3, ...
/// ```
pub fn endless_iter<I>(iterable: I) -> Result<Cycle<I::IntoIter>>
where
    I: IntoIterator,
    I::IntoIter: Clone,
{
    let iter = iterable.into_iter();
    if iter.clone().next().is_none() {
        return Err(UtilError::EmptyIterable);
    }
    Ok(iter.cycle())
}

/// First element of a source plus an iterator over every element, the first
/// one included.
pub fn get_first_iter_element<I>(iterable: I) -> Result<(I::Item, Chain<Once<I::Item>, I::IntoIter>)>
where
    I: IntoIterator,
    I::Item: Clone,
{
    let mut iter = iterable.into_iter();
    let first = iter.next().ok_or(UtilError::EmptyIterable)?;
    let rest = std::iter::once(first.clone()).chain(iter);
    Ok((first, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endless_iter_cycles() {
        let data = vec![1, 2, 3];
        let got: Vec<i32> = endless_iter(&data).unwrap().take(7).copied().collect();
        assert_eq!(got, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn test_endless_iter_range() {
        let got: Vec<u32> = endless_iter(0..2).unwrap().take(5).collect();
        assert_eq!(got, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_endless_iter_empty() {
        let data: Vec<i32> = Vec::new();
        assert!(matches!(endless_iter(&data), Err(UtilError::EmptyIterable)));
    }

    #[test]
    fn test_get_first_iter_element() {
        let (first, all) = get_first_iter_element(vec![10, 20, 30]).unwrap();
        assert_eq!(first, 10);
        assert_eq!(all.collect::<Vec<_>>(), vec![10, 20, 30]);
    }

    #[test]
    fn test_get_first_from_single_pass_iterator() {
        let source = "a b c".split(' ');
        let (first, all) = get_first_iter_element(source).unwrap();
        assert_eq!(first, "a");
        assert_eq!(all.collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_get_first_iter_element_empty() {
        let empty: Vec<u8> = Vec::new();
        assert!(matches!(
            get_first_iter_element(empty),
            Err(UtilError::EmptyIterable)
        ));
    }
}
