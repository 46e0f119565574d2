//! Internal testing utilities for the nnssa crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Run table-driven tests.
///
/// Define a `#[derive(Debug)] struct Case` holding the inputs and expected
/// result of one test, build a collection of cases and call
/// [`test_each`](TestCases::test_each) with the test body:
///
/// ```
/// use nnssa_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     rank: usize,
///     expected: Vec<i64>,
/// }
///
/// let cases = [
///     Case { rank: 2, expected: vec![-1, -1] },
///     Case { rank: 0, expected: vec![] },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(vec![-1i64; case.rank], case.expected);
/// });
/// ```
///
/// Every case runs even if an earlier one fails. Panics are caught, and once
/// all cases have run the test fails with the debug representation of each
/// failing case.
///
/// Cases and anything the test body captures must be unwind safe. Wrap
/// values with interior mutability in
/// [`AssertUnwindSafe`](std::panic::AssertUnwindSafe) or create them inside
/// the test body.
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Call `test` with a clone of each case.
    ///
    /// Useful when the test body needs to consume parts of the case.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;
}

/// Panic with a summary of `failures` if it is not empty.
fn report_failures<T: Debug>(failures: &[T]) {
    if !failures.is_empty() {
        panic!(
            "{} test cases failed: {:#?}",
            failures.len(),
            failures
        );
    }
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe,
    {
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| std::panic::catch_unwind(|| test(case)).is_err())
            .collect();
        report_failures(&failures);
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe,
    {
        let test = &test;
        let failures: Vec<_> = self
            .into_iter()
            .filter(|case| {
                let value = case.clone();
                std::panic::catch_unwind(move || test(value)).is_err()
            })
            .collect();
        report_failures(&failures);
    }
}
