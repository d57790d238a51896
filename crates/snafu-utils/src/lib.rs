//! Error plumbing shared by the allocator crates.
//!
//! - [`Location`] records the caller location of an error through
//!   `#[snafu(implicit)]` fields.
//! - [`GenericError`] is a whatever-style error for binaries and examples.
//! - [`Report`] renders an error together with its `source()` chain.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, string::String};
use core::{error::Error, fmt};

use snafu::{GenerateImplicitData, Snafu};

/// Source location where an error value was built.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location(&'static core::panic::Location<'static>);

impl Location {
    /// Returns the source file of the location.
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    /// Returns the line of the location.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
pub struct GenericError {
    message: String,
    #[snafu(implicit)]
    location: Location,
    #[snafu(source(from(Box<dyn Error>, Some)))]
    source: Option<Box<dyn Error>>,
}

impl GenericError {
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }
}

/// Renders an error and every error in its `source()` chain.
///
/// ```
/// use snafu::{ResultExt as _, Snafu};
/// use snafu_utils::Report;
///
/// #[derive(Debug, Snafu)]
/// #[snafu(display("inner failure"))]
/// struct Inner;
///
/// #[derive(Debug, Snafu)]
/// #[snafu(display("outer failure"))]
/// struct Outer {
///     source: Inner,
/// }
///
/// let err = Err::<(), _>(Inner).context(OuterSnafu).unwrap_err();
/// let text = Report::new(err).to_string();
/// assert!(text.starts_with("Error: outer failure"));
/// assert!(text.contains("0: inner failure"));
/// ```
pub struct Report<E> {
    error: E,
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {s}")?;
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error }
    }
}
