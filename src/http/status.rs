//! Response status classification.

use std::ops::RangeInclusive;

/// A set of HTTP status codes built from single codes and ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCodes {
    ranges: Vec<RangeInclusive<u16>>,
}

impl StatusCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// All 4xx and 5xx codes
    pub fn client_and_server_errors() -> Self {
        Self::new().with_range(400..=599)
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.ranges.push(code..=code);
        self
    }

    pub fn with_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.ranges.push(range);
        self
    }

    pub fn contains(&self, code: u16) -> bool {
        self.ranges.iter().any(|range| range.contains(&code))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.iter().all(|range| range.is_empty())
    }
}

impl FromIterator<u16> for StatusCodes {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self {
            ranges: iter.into_iter().map(|code| code..=code).collect(),
        }
    }
}

impl From<RangeInclusive<u16>> for StatusCodes {
    fn from(range: RangeInclusive<u16>) -> Self {
        Self::new().with_range(range)
    }
}

/// Decides whether a response status counts as success
///
/// A non-empty `good_codes` set is authoritative: only its codes succeed.
/// Otherwise any code in `bad_codes` fails and everything else succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPolicy {
    pub good_codes: StatusCodes,
    pub bad_codes: StatusCodes,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            good_codes: StatusCodes::new(),
            bad_codes: StatusCodes::client_and_server_errors(),
        }
    }
}

impl StatusPolicy {
    pub fn is_success(&self, status: u16) -> bool {
        if !self.good_codes.is_empty() {
            return self.good_codes.contains(status);
        }
        !self.bad_codes.contains(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_fails_4xx_and_5xx() {
        let policy = StatusPolicy::default();
        for ok in [200, 201, 204, 301, 304, 399] {
            assert!(policy.is_success(ok), "{ok}");
        }
        for bad in [400, 404, 418, 500, 503, 599] {
            assert!(!policy.is_success(bad), "{bad}");
        }
    }

    #[test]
    fn test_good_codes_are_authoritative() {
        let policy = StatusPolicy {
            good_codes: [200, 404].into_iter().collect(),
            ..StatusPolicy::default()
        };
        assert!(policy.is_success(200));
        assert!(policy.is_success(404));
        assert!(!policy.is_success(201));
        assert!(!policy.is_success(302));
    }

    #[test]
    fn test_custom_bad_codes() {
        let policy = StatusPolicy {
            good_codes: StatusCodes::new(),
            bad_codes: StatusCodes::from(500..=599).with_code(429),
        };
        assert!(policy.is_success(404));
        assert!(!policy.is_success(429));
        assert!(!policy.is_success(502));
    }

    #[test]
    fn test_empty_bad_codes_accept_everything() {
        let policy = StatusPolicy {
            good_codes: StatusCodes::new(),
            bad_codes: StatusCodes::new(),
        };
        assert!(policy.is_success(500));
    }
}
