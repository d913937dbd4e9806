//! Numeric dotted versions.

use crate::error::VersionError;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A dotted version such as `1.10.2`.
///
/// Versions compare component-wise as integers. The shorter version is
/// padded with zeros, so `1.0` equals `1.0.0` and `1.10.0` is greater than
/// `1.9.0`. Equality and hashing agree with the ordering.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    /// Parses a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Empty`] for an empty string and
    /// [`VersionError::InvalidComponent`] if any component is not a
    /// decimal integer.
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VersionError::Empty);
        }

        let components = text
            .split('.')
            .map(|part| {
                let valid = !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
                if !valid {
                    return Err(VersionError::InvalidComponent {
                        version: text.to_string(),
                        component: part.to_string(),
                    });
                }
                part.parse::<u64>().map_err(|_| VersionError::InvalidComponent {
                    version: text.to_string(),
                    component: part.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { components })
    }

    /// Creates a version from components. No components means `0`.
    pub fn from_components(components: impl Into<Vec<u64>>) -> Self {
        let mut components = components.into();
        if components.is_empty() {
            components.push(0);
        }
        Self { components }
    }

    /// Returns the components, `[major, minor, patch, ...]`.
    pub fn array_representation(&self) -> &[u64] {
        &self.components
    }

    /// Returns the major component.
    pub fn major(&self) -> u64 {
        self.component(0)
    }

    /// Returns the minor component, zero if absent.
    pub fn minor(&self) -> u64 {
        self.component(1)
    }

    /// Returns the patch component, zero if absent.
    pub fn patch(&self) -> u64 {
        self.component(2)
    }

    fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }

    /// Components without trailing zeros; equal versions share it.
    fn significant(&self) -> &[u64] {
        let len = self
            .components
            .iter()
            .rposition(|c| *c != 0)
            .map_or(0, |i| i + 1);
        &self.components[..len]
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.components {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn numeric_ordering() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("2") > v("1.99.99"));
        assert!(v("1.0.1") > v("1.0"));
        assert!(v("0.9") < v("1"));
    }

    #[test]
    fn zero_padding() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1"), v("1.0.0.0"));

        let set: HashSet<Version> = [v("1.0"), v("1.0.0"), v("1")].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn array_representation() {
        let version = v("3.12.7");
        assert_eq!(version.array_representation(), &[3, 12, 7]);
        assert_eq!(version.major(), 3);
        assert_eq!(version.minor(), 12);
        assert_eq!(version.patch(), 7);
        assert_eq!(v("4").patch(), 0);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Version::parse(""), Err(VersionError::Empty));
        assert_eq!(Version::parse("   "), Err(VersionError::Empty));
        assert!(matches!(
            Version::parse("1.x.0"),
            Err(VersionError::InvalidComponent { component, .. }) if component == "x"
        ));
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.-2").is_err());
        assert!(Version::parse("1.2 beta").is_err());
    }

    #[test]
    fn empty_components_are_zero() {
        let version = Version::from_components(Vec::new());
        assert_eq!(version.to_string(), "0");
        assert_eq!(Version::parse(&version.to_string()).unwrap(), version);
        assert_eq!(version, v("0.0.0"));
    }

    #[test]
    fn display() {
        assert_eq!(v("1.02.3").to_string(), "1.2.3");
        assert_eq!(" 4.5 ".parse::<Version>().unwrap().to_string(), "4.5");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn components() -> impl Strategy<Value = Vec<u64>> {
            prop::collection::vec(0u64..50, 0..5)
        }

        proptest! {
            #[test]
            fn order_is_total_and_antisymmetric(a in components(), b in components()) {
                let (a, b) = (Version::from_components(a), Version::from_components(b));
                prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
                prop_assert_eq!(a == b, a.cmp(&b) == Ordering::Equal);
            }

            #[test]
            fn order_is_transitive(a in components(), b in components(), c in components()) {
                let mut versions = [
                    Version::from_components(a),
                    Version::from_components(b),
                    Version::from_components(c),
                ];
                versions.sort();
                prop_assert!(versions[0] <= versions[2]);
            }

            #[test]
            fn trailing_zeros_are_insignificant(a in components(), zeros in 0usize..3) {
                let base = Version::from_components(a.clone());
                let mut padded = a;
                padded.extend(std::iter::repeat(0).take(zeros));
                prop_assert_eq!(base, Version::from_components(padded));
            }

            #[test]
            fn display_parses_back(a in components()) {
                let version = Version::from_components(a);
                prop_assert_eq!(Version::parse(&version.to_string()).unwrap(), version);
            }
        }
    }
}
